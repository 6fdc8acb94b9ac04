// src/recording/triggers/linked_flag.rs
//! Linked feature flag trigger
//!
//! Unlike the other triggers a linked flag can flip back to unseen: when a
//! later flag payload no longer carries the flag, recording is gated again.

use crate::recording::persistence::{
    is_marked_for_session, register_one, PersistenceStore, LINKED_FLAG_SEEN_KEY,
};
use crate::recording::remote_config::{LinkedFlag, SessionRecordingRemoteConfig};
use crate::recording::triggers::{TriggerMatcher, TriggerStatus};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Variant value that accepts any enabled variant
pub const ANY_VARIANT: &str = "any";

/// Effect of a flag payload on the seen state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkedFlagChange {
    Unchanged,
    BecameSeen,
    BecameUnseen,
}

pub struct LinkedFlagMatching {
    store: Arc<dyn PersistenceStore>,
    linked_flag: Option<LinkedFlag>,
}

impl LinkedFlagMatching {
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self {
            store,
            linked_flag: None,
        }
    }

    pub fn on_config(&mut self, config: &SessionRecordingRemoteConfig) {
        self.linked_flag = config.linked_flag.clone();
    }

    pub fn linked_flag(&self) -> Option<&LinkedFlag> {
        self.linked_flag.as_ref()
    }

    pub fn is_seen(&self, session_id: &str) -> bool {
        is_marked_for_session(self.store.as_ref(), LINKED_FLAG_SEEN_KEY, session_id)
    }

    /// Force the seen state
    pub fn set_seen(&mut self, session_id: &str, seen: bool) {
        if seen {
            register_one(
                self.store.as_ref(),
                LINKED_FLAG_SEEN_KEY,
                Value::String(session_id.to_string()),
            );
        } else {
            self.store.unregister(LINKED_FLAG_SEEN_KEY);
        }
    }

    /// Evaluate a flag payload
    ///
    /// `flags` lists enabled flag keys, `variants` maps keys to their value
    /// (boolean or variant name).
    pub fn on_feature_flags(
        &mut self,
        flags: &[String],
        variants: &Map<String, Value>,
        session_id: &str,
    ) -> LinkedFlagChange {
        let Some(linked_flag) = &self.linked_flag else {
            return LinkedFlagChange::Unchanged;
        };

        let matches = flag_matches(linked_flag, flags, variants);
        let was_seen = self.is_seen(session_id);

        match (was_seen, matches) {
            (false, true) => {
                debug!("Linked flag {:?} enabled", linked_flag.key());
                self.set_seen(session_id, true);
                LinkedFlagChange::BecameSeen
            }
            (true, false) => {
                debug!("Linked flag {:?} no longer enabled", linked_flag.key());
                self.set_seen(session_id, false);
                LinkedFlagChange::BecameUnseen
            }
            _ => LinkedFlagChange::Unchanged,
        }
    }
}

fn flag_matches(linked_flag: &LinkedFlag, flags: &[String], variants: &Map<String, Value>) -> bool {
    let key = linked_flag.key();
    let value = match variants.get(key) {
        Some(value) => value.clone(),
        None if flags.iter().any(|f| f == key) => Value::Bool(true),
        None => return false,
    };

    match value {
        Value::Bool(enabled) => enabled,
        Value::String(actual) => match linked_flag.variant() {
            None | Some(ANY_VARIANT) => true,
            Some(required) => actual == required,
        },
        _ => false,
    }
}

impl TriggerMatcher for LinkedFlagMatching {
    fn trigger_status(&self, session_id: &str) -> TriggerStatus {
        match &self.linked_flag {
            None => TriggerStatus::TriggerDisabled,
            Some(_) if self.is_seen(session_id) => TriggerStatus::TriggerActivated,
            Some(_) => TriggerStatus::TriggerPending,
        }
    }
}
