// src/recording/session.rs
//! Session and window identity
//!
//! The recorder never generates ids itself. It asks a `SessionManager` and
//! reacts to the change reasons the manager reports.

use parking_lot::Mutex;
use serde::Serialize;
use ulid::Ulid;

/// Sessions rotate after this long regardless of activity (24h)
pub const MAX_SESSION_LENGTH_MS: i64 = 24 * 60 * 60 * 1000;

/// Why the session id changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionChangeReason {
    pub no_session_id: bool,
    pub activity_timeout: bool,
    pub session_past_maximum_length: bool,
}

impl SessionChangeReason {
    pub fn any(&self) -> bool {
        self.no_session_id || self.activity_timeout || self.session_past_maximum_length
    }

    /// A session that ended on its own, as opposed to one that never existed
    pub fn is_natural_rotation(&self) -> bool {
        !self.no_session_id && (self.activity_timeout || self.session_past_maximum_length)
    }
}

/// Snapshot of the current session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub session_id: String,
    pub window_id: String,
    pub session_start_timestamp: i64,

    /// Set when this call rotated the session
    pub change_reason: Option<SessionChangeReason>,
}

pub trait SessionManager: Send + Sync {
    /// Current ids, rotating first if the session expired
    ///
    /// `read_only` lookups do not count as activity and cannot expire the
    /// session on inactivity.
    fn check_and_get_session_and_window_id(&self, read_only: bool, timestamp: i64) -> SessionState;
}

#[derive(Debug)]
struct SessionSlot {
    session_id: Option<String>,
    window_id: String,
    session_start_timestamp: i64,
    last_activity_timestamp: i64,
}

/// Process-local session manager with ULID ids and timeout rotation
#[derive(Debug)]
pub struct InMemorySessionManager {
    timeout_ms: i64,
    slot: Mutex<SessionSlot>,
}

impl InMemorySessionManager {
    pub fn new(timeout_ms: i64) -> Self {
        Self {
            timeout_ms,
            slot: Mutex::new(SessionSlot {
                session_id: None,
                window_id: Ulid::new().to_string(),
                session_start_timestamp: 0,
                last_activity_timestamp: 0,
            }),
        }
    }
}

impl SessionManager for InMemorySessionManager {
    fn check_and_get_session_and_window_id(&self, read_only: bool, timestamp: i64) -> SessionState {
        let mut slot = self.slot.lock();

        let reason = SessionChangeReason {
            no_session_id: slot.session_id.is_none(),
            activity_timeout: !read_only
                && slot.session_id.is_some()
                && timestamp - slot.last_activity_timestamp > self.timeout_ms,
            session_past_maximum_length: slot.session_id.is_some()
                && timestamp - slot.session_start_timestamp > MAX_SESSION_LENGTH_MS,
        };

        if reason.any() {
            slot.session_id = Some(Ulid::new().to_string());
            slot.window_id = Ulid::new().to_string();
            slot.session_start_timestamp = timestamp;
            slot.last_activity_timestamp = timestamp;
        }
        if !read_only {
            slot.last_activity_timestamp = timestamp;
        }

        SessionState {
            session_id: slot.session_id.clone().unwrap_or_default(),
            window_id: slot.window_id.clone(),
            session_start_timestamp: slot.session_start_timestamp,
            change_reason: reason.any().then_some(reason),
        }
    }
}

/// Bytes shipped for the current session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushedSizeTracker {
    flushed: u64,
}

impl FlushedSizeTracker {
    pub fn add(&mut self, bytes: usize) {
        self.flushed += bytes as u64;
    }

    pub fn get(&self) -> u64 {
        self.flushed
    }

    pub fn reset(&mut self) {
        self.flushed = 0;
    }
}
