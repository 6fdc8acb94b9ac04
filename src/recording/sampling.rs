// src/recording/sampling.rs
//! Deterministic session sampling

use crate::recording::persistence::{PersistenceStore, IS_SAMPLED_KEY};
use serde_json::Value;

/// 32-bit string hash, stable across platforms
pub fn simple_hash(s: &str) -> i32 {
    // UTF-16 code units, to agree with ids hashed by other clients
    s.encode_utf16().fold(0i32, |hash, unit| {
        (hash << 5).wrapping_sub(hash).wrapping_add(unit as i32)
    })
}

/// Whether `property` falls inside the sampled `rate` (0.0 - 1.0)
///
/// Pure function of its inputs: the same id and rate always agree.
pub fn sample_on_property(property: &str, rate: f64) -> bool {
    let percent = (rate * 100.0).clamp(0.0, 100.0);
    let bucket = (simple_hash(property) % 100).unsigned_abs() as f64;
    bucket < percent
}

/// Read the persisted sampling decision for `session_id`
///
/// A session id string means "sampled in for that session", `false` is a
/// prior negative decision. A literal `true` is a legacy value that did not
/// record which session it belonged to, so it reads as unknown.
pub fn stored_sampling_decision(store: &dyn PersistenceStore, session_id: &str) -> Option<bool> {
    match store.get(IS_SAMPLED_KEY) {
        Some(Value::Bool(false)) => Some(false),
        Some(Value::Bool(true)) => None,
        Some(Value::String(sampled_session)) => Some(sampled_session == session_id),
        _ => None,
    }
}

/// Whether a fresh sampling decision must be made for `session_id`
///
/// A decision recorded for another session, a legacy `true`, or nothing at
/// all require one. A stored `false` stands until the session rotates.
pub fn needs_sampling_decision(store: &dyn PersistenceStore, session_id: &str) -> bool {
    match store.get(IS_SAMPLED_KEY) {
        Some(Value::Bool(false)) => false,
        Some(Value::String(sampled_session)) => sampled_session != session_id,
        _ => true,
    }
}
