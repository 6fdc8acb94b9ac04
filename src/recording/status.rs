// src/recording/status.rs
//! Recording status resolution
//!
//! Status is derived on demand from the current inputs and never stored.
//! The AND and OR resolvers differ only in how they fold trigger statuses,
//! so "is the trigger pending" uses the same semantics as "has it fired".

use crate::recording::remote_config::TriggerMatchType;
use crate::recording::triggers::combinator::{combine_all, combine_any};
use crate::recording::triggers::TriggerStatus;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    /// Remote config not received yet
    LazyLoading,
    /// Triggers pending: events are held but not shipped
    Buffering,
    /// Page is on a blocklisted URL
    Paused,
    Disabled,
    /// Sampled in
    Sampled,
    Active,
}

impl RecordingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::LazyLoading => "lazy_loading",
            RecordingStatus::Buffering => "buffering",
            RecordingStatus::Paused => "paused",
            RecordingStatus::Disabled => "disabled",
            RecordingStatus::Sampled => "sampled",
            RecordingStatus::Active => "active",
        }
    }

    /// Whether a flush should be held back in this status
    pub fn holds_flush(&self) -> bool {
        matches!(
            self,
            RecordingStatus::Buffering | RecordingStatus::Paused | RecordingStatus::Disabled
        )
    }
}

impl fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything status resolution depends on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusInputs {
    pub flags_received: bool,
    pub recording_enabled: bool,
    pub is_sampled: Option<bool>,
    pub url_blocked: bool,
    /// Per-matcher statuses, in any order
    pub trigger_statuses: Vec<TriggerStatus>,
}

fn resolve_with(inputs: &StatusInputs, trigger: TriggerStatus) -> RecordingStatus {
    if !inputs.flags_received {
        return RecordingStatus::LazyLoading;
    }
    if !inputs.recording_enabled {
        return RecordingStatus::Disabled;
    }
    if inputs.is_sampled == Some(false) {
        return RecordingStatus::Disabled;
    }
    if inputs.url_blocked {
        return RecordingStatus::Paused;
    }
    if trigger == TriggerStatus::TriggerPending {
        return RecordingStatus::Buffering;
    }
    if inputs.is_sampled == Some(true) {
        return RecordingStatus::Sampled;
    }
    RecordingStatus::Active
}

/// Status when every configured trigger must fire
pub fn all_match_status(inputs: &StatusInputs) -> RecordingStatus {
    resolve_with(inputs, combine_all(&inputs.trigger_statuses))
}

/// Status when any configured trigger is enough
pub fn any_match_status(inputs: &StatusInputs) -> RecordingStatus {
    resolve_with(inputs, combine_any(&inputs.trigger_statuses))
}

pub fn resolve_status(match_type: TriggerMatchType, inputs: &StatusInputs) -> RecordingStatus {
    match match_type {
        TriggerMatchType::All => all_match_status(inputs),
        TriggerMatchType::Any => any_match_status(inputs),
    }
}
