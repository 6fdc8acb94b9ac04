// src/recording/triggers/combinator.rs
//! AND / OR combination of trigger statuses
//!
//! Disabled matchers are "not configured" and never hold recording back.

use crate::recording::remote_config::TriggerMatchType;
use crate::recording::triggers::{
    EventTriggerMatching, LinkedFlagMatching, TriggerMatcher, TriggerStatus, UrlTriggerMatching,
};

/// Every configured trigger must have fired
pub struct AndTriggerMatching<'a> {
    matchers: [&'a dyn TriggerMatcher; 3],
}

/// Any configured trigger is enough
pub struct OrTriggerMatching<'a> {
    matchers: [&'a dyn TriggerMatcher; 3],
}

impl<'a> AndTriggerMatching<'a> {
    pub fn new(
        url: &'a UrlTriggerMatching,
        event: &'a EventTriggerMatching,
        linked_flag: &'a LinkedFlagMatching,
    ) -> Self {
        Self {
            matchers: [url, event, linked_flag],
        }
    }
}

impl<'a> OrTriggerMatching<'a> {
    pub fn new(
        url: &'a UrlTriggerMatching,
        event: &'a EventTriggerMatching,
        linked_flag: &'a LinkedFlagMatching,
    ) -> Self {
        Self {
            matchers: [url, event, linked_flag],
        }
    }
}

/// Fold statuses with AND semantics
pub fn combine_all(statuses: &[TriggerStatus]) -> TriggerStatus {
    let mut remaining = statuses
        .iter()
        .copied()
        .filter(|s| *s != TriggerStatus::TriggerDisabled);

    let Some(first) = remaining.next() else {
        return TriggerStatus::TriggerDisabled;
    };
    if remaining.all(|s| s == first) {
        first
    } else {
        TriggerStatus::TriggerPending
    }
}

/// Fold statuses with OR semantics
pub fn combine_any(statuses: &[TriggerStatus]) -> TriggerStatus {
    if statuses.contains(&TriggerStatus::TriggerActivated) {
        TriggerStatus::TriggerActivated
    } else if statuses.contains(&TriggerStatus::TriggerPending) {
        TriggerStatus::TriggerPending
    } else {
        TriggerStatus::TriggerDisabled
    }
}

impl TriggerMatcher for AndTriggerMatching<'_> {
    fn trigger_status(&self, session_id: &str) -> TriggerStatus {
        let statuses = self.matchers.map(|m| m.trigger_status(session_id));
        combine_all(&statuses)
    }
}

impl TriggerMatcher for OrTriggerMatching<'_> {
    fn trigger_status(&self, session_id: &str) -> TriggerStatus {
        let statuses = self.matchers.map(|m| m.trigger_status(session_id));
        combine_any(&statuses)
    }
}

/// Combined status for `match_type`
pub fn combined_trigger_status(
    match_type: TriggerMatchType,
    url: &UrlTriggerMatching,
    event: &EventTriggerMatching,
    linked_flag: &LinkedFlagMatching,
    session_id: &str,
) -> TriggerStatus {
    match match_type {
        TriggerMatchType::All => {
            AndTriggerMatching::new(url, event, linked_flag).trigger_status(session_id)
        }
        TriggerMatchType::Any => {
            OrTriggerMatching::new(url, event, linked_flag).trigger_status(session_id)
        }
    }
}
