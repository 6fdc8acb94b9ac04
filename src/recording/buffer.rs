// src/recording/buffer.rs
//! In-memory snapshot buffer
//!
//! Accumulates serialized recorder events for exactly one session/window
//! pair. `size` is a running estimate of the serialized payload and is
//! recomputed from per-event sizes whenever the buffer is sliced.

use crate::recording::event::EventType;
use serde_json::Value;

/// Per-buffer cap before a flush is forced (0.9 MiB)
pub const RECORDING_MAX_EVENT_SIZE: usize = 943_718;

/// Payloads above this are split before shipping (7 MiB)
pub const SEVEN_MEGABYTES: usize = 7 * 1024 * 1024;

/// Debounce before an armed flush fires
pub const RECORDING_BUFFER_TIMEOUT_MS: i64 = 2000;

/// One serialized event held in the buffer
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedEvent {
    pub event_type: EventType,
    pub timestamp: i64,
    pub size: usize,
    pub data: Value,
}

/// Events waiting to be shipped for one session/window
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotBuffer {
    pub session_id: String,
    pub window_id: String,
    pub size: usize,
    pub data: Vec<BufferedEvent>,
}

impl SnapshotBuffer {
    /// Create an empty buffer
    pub fn new(session_id: impl Into<String>, window_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            window_id: window_id.into(),
            size: 0,
            data: Vec::new(),
        }
    }

    fn from_events(session_id: &str, window_id: &str, data: Vec<BufferedEvent>) -> Self {
        let size = data.iter().map(|e| e.size).sum();
        Self {
            session_id: session_id.to_string(),
            window_id: window_id.to_string(),
            size,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn belongs_to(&self, session_id: &str, window_id: &str) -> bool {
        self.session_id == session_id && self.window_id == window_id
    }

    /// Whether appending `event_size` bytes would overflow the buffer
    ///
    /// Accounts for the array brackets and separators of the final payload.
    pub fn would_overflow(&self, event_size: usize) -> bool {
        let additional_bytes = 2 + self.data.len();
        self.size + event_size + additional_bytes > RECORDING_MAX_EVENT_SIZE
    }

    pub fn push(&mut self, event: BufferedEvent) {
        self.size += event.size;
        self.data.push(event);
    }

    /// Timestamp of the most recent event
    pub fn last_timestamp(&self) -> Option<i64> {
        self.data.last().map(|e| e.timestamp)
    }

    /// Time spanned by the buffered events
    pub fn buffered_span(&self) -> Option<i64> {
        let first = self.data.first()?.timestamp;
        let last = self.data.last()?.timestamp;
        Some(last - first)
    }

    /// Drop everything before the most recent meta event
    ///
    /// Without any meta event the buffer is emptied.
    pub fn retain_from_last_meta(&mut self) {
        match self
            .data
            .iter()
            .rposition(|e| e.event_type == EventType::Meta)
        {
            Some(index) => {
                self.data.drain(..index);
                self.recompute_size();
            }
            None => self.clear(),
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.size = 0;
    }

    fn recompute_size(&mut self) {
        self.size = self.data.iter().map(|e| e.size).sum();
    }

    /// Serialized events in emission order
    pub fn snapshot_data(&self) -> Vec<Value> {
        self.data.iter().map(|e| e.data.clone()).collect()
    }
}

/// Recursively halve `buffer` by event count until every part is below
/// `size_limit` or holds a single event. Event order is preserved across
/// the concatenation of the parts.
pub fn split_buffer(buffer: SnapshotBuffer, size_limit: usize) -> Vec<SnapshotBuffer> {
    if buffer.size < size_limit || buffer.data.len() <= 1 {
        return vec![buffer];
    }

    let SnapshotBuffer {
        session_id,
        window_id,
        mut data,
        ..
    } = buffer;

    let half = data.len() / 2;
    let second = data.split_off(half);

    let mut parts = split_buffer(
        SnapshotBuffer::from_events(&session_id, &window_id, data),
        size_limit,
    );
    parts.extend(split_buffer(
        SnapshotBuffer::from_events(&session_id, &window_id, second),
        size_limit,
    ));
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn event(event_type: EventType, timestamp: i64, size: usize) -> BufferedEvent {
        BufferedEvent {
            event_type,
            timestamp,
            size,
            data: json!({ "timestamp": timestamp }),
        }
    }

    #[test]
    fn test_push_tracks_size() {
        let mut buffer = SnapshotBuffer::new("s1", "w1");
        assert!(buffer.is_empty());

        buffer.push(event(EventType::Meta, 1, 10));
        buffer.push(event(EventType::FullSnapshot, 2, 90));

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.size, 100);
        assert_eq!(buffer.last_timestamp(), Some(2));
        assert_eq!(buffer.buffered_span(), Some(1));
        assert!(buffer.belongs_to("s1", "w1"));
        assert!(!buffer.belongs_to("s2", "w1"));
    }

    #[test]
    fn test_would_overflow() {
        let mut buffer = SnapshotBuffer::new("s1", "w1");
        buffer.push(event(EventType::FullSnapshot, 1, RECORDING_MAX_EVENT_SIZE - 10));

        assert!(!buffer.would_overflow(7));
        assert!(buffer.would_overflow(8));
    }

    #[test]
    fn test_retain_from_last_meta() {
        let mut buffer = SnapshotBuffer::new("s1", "w1");
        buffer.push(event(EventType::Meta, 1, 5));
        buffer.push(event(EventType::IncrementalSnapshot, 2, 7));
        buffer.push(event(EventType::Meta, 3, 11));
        buffer.push(event(EventType::FullSnapshot, 4, 13));

        buffer.retain_from_last_meta();

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.data[0].timestamp, 3);
        assert_eq!(buffer.size, 24);
    }

    #[test]
    fn test_retain_without_meta_clears() {
        let mut buffer = SnapshotBuffer::new("s1", "w1");
        buffer.push(event(EventType::IncrementalSnapshot, 2, 7));

        buffer.retain_from_last_meta();

        assert!(buffer.is_empty());
        assert_eq!(buffer.size, 0);
    }

    #[test]
    fn test_small_buffer_not_split() {
        let mut buffer = SnapshotBuffer::new("s1", "w1");
        buffer.push(event(EventType::Meta, 1, 100));

        let parts = split_buffer(buffer.clone(), SEVEN_MEGABYTES);
        assert_eq!(parts, vec![buffer]);
    }

    #[test]
    fn test_large_buffer_split() {
        let mut buffer = SnapshotBuffer::new("s1", "w1");
        for i in 0..8 {
            buffer.push(event(EventType::IncrementalSnapshot, i, 2 * 1024 * 1024));
        }

        let parts = split_buffer(buffer, SEVEN_MEGABYTES);

        assert!(parts.len() >= 2);
        for part in &parts {
            assert!(part.size < SEVEN_MEGABYTES);
            assert_eq!(part.session_id, "s1");
            assert_eq!(part.window_id, "w1");
        }
        let timestamps: Vec<i64> = parts
            .iter()
            .flat_map(|p| p.data.iter().map(|e| e.timestamp))
            .collect();
        assert_eq!(timestamps, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_single_oversized_event_kept_whole() {
        let mut buffer = SnapshotBuffer::new("s1", "w1");
        buffer.push(event(EventType::FullSnapshot, 1, SEVEN_MEGABYTES * 2));

        let parts = split_buffer(buffer, SEVEN_MEGABYTES);
        assert_eq!(parts.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_split_preserves_order_and_limit(
            sizes in proptest::collection::vec(1usize..3_000_000, 1..40)
        ) {
            let mut buffer = SnapshotBuffer::new("s", "w");
            for (i, size) in sizes.iter().enumerate() {
                buffer.push(event(EventType::IncrementalSnapshot, i as i64, *size));
            }
            let total = buffer.size;

            let parts = split_buffer(buffer, SEVEN_MEGABYTES);

            let timestamps: Vec<i64> = parts
                .iter()
                .flat_map(|p| p.data.iter().map(|e| e.timestamp))
                .collect();
            prop_assert_eq!(timestamps, (0..sizes.len() as i64).collect::<Vec<_>>());
            prop_assert_eq!(parts.iter().map(|p| p.size).sum::<usize>(), total);
            for part in &parts {
                prop_assert!(part.size < SEVEN_MEGABYTES || part.len() == 1);
                prop_assert_eq!(part.size, part.data.iter().map(|e| e.size).sum::<usize>());
            }
            if total >= SEVEN_MEGABYTES && sizes.len() > 1 {
                prop_assert!(parts.len() >= 2);
            }
        }
    }
}
