// src/recording/persistence.rs
//! Cross-reload key/value persistence
//!
//! The real store lives in the host (cookies, local storage). The recorder
//! only needs `get`, `register` and `unregister`, and must cope with keys
//! that are missing or hold unexpected values.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Persisted remote config snapshot
pub const REMOTE_CONFIG_KEY: &str = "$session_recording_remote_config";
/// Sampling decision: session id string, `false`, or legacy `true`
pub const IS_SAMPLED_KEY: &str = "$session_is_sampled";
pub const URL_TRIGGER_ACTIVATED_KEY: &str = "$session_recording_url_trigger_activated_session";
pub const EVENT_TRIGGER_ACTIVATED_KEY: &str = "$session_recording_event_trigger_activated_session";
pub const LINKED_FLAG_SEEN_KEY: &str = "$session_recording_linked_flag_seen_session";
pub const MINIMUM_DURATION_PASSED_KEY: &str = "$session_recording_minimum_duration_passed_session";
pub const START_REASON_KEY: &str = "$session_recording_start_reason";

/// Keys scoped to a single session, cleared on rotation
pub const SESSION_SCOPED_KEYS: [&str; 5] = [
    IS_SAMPLED_KEY,
    URL_TRIGGER_ACTIVATED_KEY,
    EVENT_TRIGGER_ACTIVATED_KEY,
    LINKED_FLAG_SEEN_KEY,
    MINIMUM_DURATION_PASSED_KEY,
];

/// Host-provided persistence
pub trait PersistenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    /// Store every entry of `values`
    fn register(&self, values: Map<String, Value>);

    fn unregister(&self, key: &str);
}

/// Store a single key
pub fn register_one(store: &dyn PersistenceStore, key: &str, value: Value) {
    let mut values = Map::new();
    values.insert(key.to_string(), value);
    store.register(values);
}

/// Whether `key` holds exactly `session_id`
///
/// Anything else, including a missing or corrupt value, reads as "not seen".
pub fn is_marked_for_session(store: &dyn PersistenceStore, key: &str, session_id: &str) -> bool {
    matches!(store.get(key), Some(Value::String(s)) if s == session_id)
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl PersistenceStore for MemoryPersistence {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn register(&self, values: Map<String, Value>) {
        let mut stored = self.values.write();
        for (key, value) in values {
            stored.insert(key, value);
        }
    }

    fn unregister(&self, key: &str) {
        self.values.write().remove(key);
    }
}
