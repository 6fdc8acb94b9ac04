// src/recording/triggers/url.rs
//! URL trigger and URL blocklist
//!
//! Two independent concerns share this matcher. The trigger list activates
//! recording once per session; the blocklist is live and pauses recording
//! for as long as the page sits on a blocked URL.

use crate::recording::persistence::{
    is_marked_for_session, register_one, PersistenceStore, URL_TRIGGER_ACTIVATED_KEY,
};
use crate::recording::remote_config::{SessionRecordingRemoteConfig, UrlTrigger};
use crate::recording::triggers::{TriggerMatcher, TriggerStatus};
use crate::utils::errors::RecorderError;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// What a URL check changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UrlCheckOutcome {
    /// Moved onto a blocked URL
    pub paused: bool,

    /// Left a blocked URL
    pub resumed: bool,

    /// Trigger pattern matched for the first time this session
    pub activated: bool,
}

impl UrlCheckOutcome {
    pub fn is_unchanged(&self) -> bool {
        !self.paused && !self.resumed && !self.activated
    }
}

pub struct UrlTriggerMatching {
    store: Arc<dyn PersistenceStore>,
    triggers: Vec<Regex>,
    blocklist: Vec<Regex>,
    url_blocked: bool,
}

impl UrlTriggerMatching {
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self {
            store,
            triggers: Vec::new(),
            blocklist: Vec::new(),
            url_blocked: false,
        }
    }

    /// Compile trigger and blocklist patterns from `config`
    pub fn on_config(&mut self, config: &SessionRecordingRemoteConfig) {
        self.triggers = compile_patterns(&config.url_triggers);
        self.blocklist = compile_patterns(&config.url_blocklist);
    }

    pub fn is_configured(&self) -> bool {
        !self.triggers.is_empty()
    }

    pub fn url_blocked(&self) -> bool {
        self.url_blocked
    }

    pub fn is_activated(&self, session_id: &str) -> bool {
        is_marked_for_session(self.store.as_ref(), URL_TRIGGER_ACTIVATED_KEY, session_id)
    }

    /// Force activation for `session_id`
    pub fn activate(&mut self, session_id: &str) {
        register_one(
            self.store.as_ref(),
            URL_TRIGGER_ACTIVATED_KEY,
            Value::String(session_id.to_string()),
        );
    }

    /// Evaluate the current page URL
    pub fn check_url(&mut self, url: &str, session_id: &str) -> UrlCheckOutcome {
        let mut outcome = UrlCheckOutcome::default();

        let now_blocked = self.blocklist.iter().any(|re| re.is_match(url));
        match (self.url_blocked, now_blocked) {
            (true, true) => return outcome,
            (false, true) => {
                info!("URL {:?} is blocklisted, pausing recording", url);
                self.url_blocked = true;
                outcome.paused = true;
            }
            (true, false) => {
                info!("Left blocklisted URL, resuming recording");
                self.url_blocked = false;
                outcome.resumed = true;
            }
            (false, false) => {}
        }

        if self.trigger_status(session_id) == TriggerStatus::TriggerPending
            && self.triggers.iter().any(|re| re.is_match(url))
        {
            info!("URL trigger matched {:?}", url);
            self.activate(session_id);
            outcome.activated = true;
        }

        outcome
    }

    /// Drop the live blocklist state
    pub fn stop(&mut self) {
        self.url_blocked = false;
    }
}

impl TriggerMatcher for UrlTriggerMatching {
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

fn compile_patterns(entries: &[UrlTrigger]) -> Vec<Regex> {
    entries
        .iter()
        .filter_map(|entry| {
            if entry.matching != "regex" {
                warn!(
                    "Unsupported URL matching mode {:?} for {:?}",
                    entry.matching, entry.url
                );
                return None;
            }
            match Regex::new(&entry.url) {
                Ok(re) => Some(re),
                Err(source) => {
                    let err = RecorderError::InvalidPattern {
                        pattern: entry.url.clone(),
                        source,
                    };
                    warn!("Skipping URL pattern: {}", err);
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::persistence::MemoryPersistence;

    fn entry(url: &str) -> UrlTrigger {
        UrlTrigger {
            url: url.to_string(),
            matching: "regex".to_string(),
        }
    }

    fn matcher(triggers: &[&str], blocklist: &[&str]) -> UrlTriggerMatching {
        let mut matching = UrlTriggerMatching::new(Arc::new(MemoryPersistence::new()));
        matching.on_config(&SessionRecordingRemoteConfig {
            url_triggers: triggers.iter().map(|u| entry(u)).collect(),
            url_blocklist: blocklist.iter().map(|u| entry(u)).collect(),
            ..Default::default()
        });
        matching
    }

    #[test]
    fn test_trigger_activation() {
        let mut matching = matcher(&["/checkout"], &[]);
        assert_eq!(matching.trigger_status("s1"), TriggerStatus::TriggerPending);

        assert!(matching.check_url("https://shop.test/home", "s1").is_unchanged());

        let outcome = matching.check_url("https://shop.test/checkout/step-1", "s1");
        assert!(outcome.activated);
        assert_eq!(matching.trigger_status("s1"), TriggerStatus::TriggerActivated);

        // once per session
        assert!(!matching.check_url("https://shop.test/checkout", "s1").activated);
        assert_eq!(matching.trigger_status("s2"), TriggerStatus::TriggerPending);
    }

    #[test]
    fn test_blocklist_pause_and_resume() {
        let mut matching = matcher(&[], &["/admin"]);
        assert_eq!(matching.trigger_status("s1"), TriggerStatus::TriggerDisabled);

        let outcome = matching.check_url("https://app.test/admin/users", "s1");
        assert!(outcome.paused);
        assert!(matching.url_blocked());

        // still blocked, nothing new to report
        assert!(matching.check_url("https://app.test/admin/roles", "s1").is_unchanged());

        let outcome = matching.check_url("https://app.test/dashboard", "s1");
        assert!(outcome.resumed);
        assert!(!matching.url_blocked());
    }

    #[test]
    fn test_trigger_and_blocklist_on_same_url_still_pauses() {
        let mut matching = matcher(&["/secret"], &["/secret"]);
        let outcome = matching.check_url("https://app.test/secret", "s1");
        assert!(outcome.paused);
        assert!(matching.url_blocked());
    }

    #[test]
    fn test_invalid_pattern_skipped() {
        let matching = matcher(&["(unclosed", "/ok"], &["[bad"]);
        assert_eq!(matching.triggers.len(), 1);
        assert!(matching.blocklist.is_empty());
    }

    #[test]
    fn test_unsupported_matching_mode_skipped() {
        let mut matching = UrlTriggerMatching::new(Arc::new(MemoryPersistence::new()));
        matching.on_config(&SessionRecordingRemoteConfig {
            url_triggers: vec![UrlTrigger {
                url: "/x".to_string(),
                matching: "glob".to_string(),
            }],
            ..Default::default()
        });
        assert!(!matching.is_configured());
    }

    #[test]
    fn test_stop_clears_blocked() {
        let mut matching = matcher(&[], &["/admin"]);
        matching.check_url("https://app.test/admin", "s1");
        matching.stop();
        assert!(!matching.url_blocked());
    }
}
