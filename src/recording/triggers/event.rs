// src/recording/triggers/event.rs
//! Event name trigger

use crate::recording::persistence::{
    is_marked_for_session, register_one, PersistenceStore, EVENT_TRIGGER_ACTIVATED_KEY,
};
use crate::recording::remote_config::SessionRecordingRemoteConfig;
use crate::recording::triggers::{TriggerMatcher, TriggerStatus};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Activates when any configured event name is captured
pub struct EventTriggerMatching {
    store: Arc<dyn PersistenceStore>,
    event_names: HashSet<String>,
}

impl EventTriggerMatching {
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self {
            store,
            event_names: HashSet::new(),
        }
    }

    /// Replace the configured event names
    pub fn on_config(&mut self, config: &SessionRecordingRemoteConfig) {
        self.event_names = config.event_triggers.iter().cloned().collect();
    }

    pub fn is_configured(&self) -> bool {
        !self.event_names.is_empty()
    }

    pub fn is_activated(&self, session_id: &str) -> bool {
        is_marked_for_session(self.store.as_ref(), EVENT_TRIGGER_ACTIVATED_KEY, session_id)
    }

    /// Force activation for `session_id`
    pub fn activate(&mut self, session_id: &str) {
        register_one(
            self.store.as_ref(),
            EVENT_TRIGGER_ACTIVATED_KEY,
            Value::String(session_id.to_string()),
        );
    }

    /// Feed a captured event name. Returns `true` when this call activated
    /// the trigger.
    pub fn on_event_captured(&mut self, event_name: &str, session_id: &str) -> bool {
        if !self.event_names.contains(event_name) || self.is_activated(session_id) {
            return false;
        }

        info!("Event trigger {:?} matched", event_name);
        self.activate(session_id);
        true
    }
}

impl TriggerMatcher for EventTriggerMatching {
    fn trigger_status(&self, session_id: &str) -> TriggerStatus {
        if !self.is_configured() {
            TriggerStatus::TriggerDisabled
        } else if self.is_activated(session_id) {
            TriggerStatus::TriggerActivated
        } else {
            TriggerStatus::TriggerPending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::persistence::MemoryPersistence;

    fn matcher(events: &[&str]) -> EventTriggerMatching {
        let mut matching = EventTriggerMatching::new(Arc::new(MemoryPersistence::new()));
        matching.on_config(&SessionRecordingRemoteConfig {
            event_triggers: events.iter().map(|e| e.to_string()).collect(),
            ..Default::default()
        });
        matching
    }

    #[test]
    fn test_unconfigured_is_disabled() {
        let matching = matcher(&[]);
        assert_eq!(matching.trigger_status("s1"), TriggerStatus::TriggerDisabled);
    }

    #[test]
    fn test_activates_on_listed_event() {
        let mut matching = matcher(&["purchase", "signup"]);
        assert_eq!(matching.trigger_status("s1"), TriggerStatus::TriggerPending);

        assert!(!matching.on_event_captured("$pageview", "s1"));
        assert_eq!(matching.trigger_status("s1"), TriggerStatus::TriggerPending);

        assert!(matching.on_event_captured("signup", "s1"));
        assert_eq!(matching.trigger_status("s1"), TriggerStatus::TriggerActivated);

        // already active, no second activation
        assert!(!matching.on_event_captured("purchase", "s1"));
    }

    #[test]
    fn test_activation_is_per_session() {
        let mut matching = matcher(&["purchase"]);
        matching.on_event_captured("purchase", "s1");
        assert_eq!(matching.trigger_status("s2"), TriggerStatus::TriggerPending);
    }

    #[test]
    fn test_reconfigure_replaces_names() {
        let mut matching = matcher(&["purchase"]);
        matching.on_config(&SessionRecordingRemoteConfig {
            event_triggers: vec!["other".to_string()],
            ..Default::default()
        });
        assert!(!matching.on_event_captured("purchase", "s1"));
        assert!(matching.on_event_captured("other", "s1"));
    }
}
