// src/recording/event_queue.rs
//! Bounded retry queue for calls into the recorder library
//!
//! The recorder library loads asynchronously and rejects calls until it is
//! ready. Rejected calls are parked here and replayed on the next real emit.
//! The queue holds at most `MAX_QUEUED_CALLS` entries; anything older than
//! `QUEUED_CALL_TTL_MS` is dropped instead of retried.

use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Queue capacity
pub const MAX_QUEUED_CALLS: usize = 10;

/// Age after which a queued call is discarded
pub const QUEUED_CALL_TTL_MS: i64 = 2000;

/// A deferred call into the recorder library
#[derive(Debug, Clone, PartialEq)]
pub enum SourceCall {
    FullSnapshot,
    CustomEvent { tag: String, payload: Value },
}

/// Queue entry
#[derive(Debug, Clone)]
pub struct QueuedCall {
    pub call: SourceCall,
    pub attempts: u32,
    pub enqueued_at: i64,
}

/// Bounded, TTL-limited retry queue
#[derive(Debug, Default)]
pub struct RetryQueue {
    queue: VecDeque<QueuedCall>,
    push_count: u64,
    drop_count: u64,
    expired_count: u64,
}

impl RetryQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a call. Returns `false` when the queue is full and the call was
    /// dropped.
    pub fn push(&mut self, call: SourceCall, now: i64) -> bool {
        if self.queue.len() >= MAX_QUEUED_CALLS {
            self.drop_count += 1;
            warn!("Retry queue full, dropping {:?}", call);
            metrics::counter!("replay_retry_queue_dropped_total", "reason" => "full").increment(1);
            return false;
        }

        self.push_count += 1;
        self.queue.push_back(QueuedCall {
            call,
            attempts: 1,
            enqueued_at: now,
        });
        true
    }

    /// Take every entry that is still fresh, discarding expired ones
    ///
    /// Each returned entry gets exactly one retry in this drain pass. The
    /// caller re-queues an entry with `requeue` if the retry fails again.
    pub fn drain_fresh(&mut self, now: i64) -> Vec<QueuedCall> {
        let mut fresh = Vec::with_capacity(self.queue.len());

        for mut entry in self.queue.drain(..) {
            if now - entry.enqueued_at > QUEUED_CALL_TTL_MS {
                self.expired_count += 1;
                debug!(
                    "Dropping queued {:?} after {}ms",
                    entry.call,
                    now - entry.enqueued_at
                );
                metrics::counter!("replay_retry_queue_dropped_total", "reason" => "expired")
                    .increment(1);
                continue;
            }
            entry.attempts += 1;
            fresh.push(entry);
        }

        fresh
    }

    /// Put back an entry whose retry failed, keeping its original age
    pub fn requeue(&mut self, entry: QueuedCall) {
        if self.queue.len() >= MAX_QUEUED_CALLS {
            self.drop_count += 1;
            return;
        }
        self.queue.push_back(entry);
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            push_count: self.push_count,
            drop_count: self.drop_count,
            expired_count: self.expired_count,
            current_size: self.queue.len(),
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    /// Total calls parked
    pub push_count: u64,

    /// Calls dropped because the queue was full
    pub drop_count: u64,

    /// Calls dropped because they outlived the TTL
    pub expired_count: u64,

    pub current_size: usize,
}
