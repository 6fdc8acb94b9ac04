// src/recording/triggers/mod.rs
//! Recording triggers
//!
//! Each matcher records whether its condition has fired for the current
//! session. None of them decide on their own whether to record; the
//! combinator folds their statuses into one.
//!
//! - **Linked flag**: a feature flag (optionally a variant) is enabled
//! - **URL**: the page URL matched a trigger pattern; also owns the live
//!   URL blocklist
//! - **Event**: a listed event name was captured

pub mod combinator;
pub mod event;
pub mod linked_flag;
pub mod url;

pub use combinator::{AndTriggerMatching, OrTriggerMatching};
pub use event::EventTriggerMatching;
pub use linked_flag::{LinkedFlagChange, LinkedFlagMatching};
pub use url::{UrlCheckOutcome, UrlTriggerMatching};

use serde::Serialize;

/// Status of a trigger for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    /// Configured, not fired yet
    TriggerPending,
    /// Fired for this session
    TriggerActivated,
    /// Not configured
    TriggerDisabled,
}

/// Anything that can report a trigger status
pub trait TriggerMatcher {
    fn trigger_status(&self, session_id: &str) -> TriggerStatus;
}

/// Which trigger fired, used for start reasons and overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Url,
    Event,
    LinkedFlag,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Url => "url",
            TriggerKind::Event => "event",
            TriggerKind::LinkedFlag => "linked_flag",
        }
    }
}
