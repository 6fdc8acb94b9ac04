// src/recording/event.rs
//! Recorder event model
//!
//! Events arrive from the DOM recorder library as JSON. The envelope
//! (`type`, `timestamp`) is typed; `data` stays a JSON value because the
//! pipeline only ever inspects a handful of fields inside it.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Custom marker tags emitted by the recorder itself
pub mod tags {
    pub const SESSION_IDLE: &str = "sessionIdle";
    pub const SESSION_NO_LONGER_IDLE: &str = "sessionNoLongerIdle";
    pub const SESSION_ENDING: &str = "$session_ending";
    pub const SESSION_STARTING: &str = "$session_starting";
    pub const SESSION_ID_CHANGE: &str = "$session_id_change";
    pub const RECORDING_PAUSED: &str = "recording paused";
    pub const RECORDING_RESUMED: &str = "recording resumed";
    pub const URL_CHANGED: &str = "$url_changed";
    pub const PAGEVIEW: &str = "$pageview";
    pub const SAMPLING_DECISION: &str = "samplingDecisionMade";
    pub const TRIGGER_ACTIVATED: &str = "trigger activated";
    pub const RATE_LIMITED: &str = "rate limited";
    pub const BROWSER_OFFLINE: &str = "browser offline";
    pub const BROWSER_ONLINE: &str = "browser online";
    pub const WINDOW_VISIBLE: &str = "window visible";
    pub const WINDOW_HIDDEN: &str = "window hidden";
}

/// Top level event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum EventType {
    DomContentLoaded,
    Load,
    FullSnapshot,
    IncrementalSnapshot,
    Meta,
    Custom,
    Plugin,
    Unknown(u8),
}

impl From<u8> for EventType {
    fn from(value: u8) -> Self {
        match value {
            0 => EventType::DomContentLoaded,
            1 => EventType::Load,
            2 => EventType::FullSnapshot,
            3 => EventType::IncrementalSnapshot,
            4 => EventType::Meta,
            5 => EventType::Custom,
            6 => EventType::Plugin,
            other => EventType::Unknown(other),
        }
    }
}

impl From<EventType> for u8 {
    fn from(value: EventType) -> Self {
        match value {
            EventType::DomContentLoaded => 0,
            EventType::Load => 1,
            EventType::FullSnapshot => 2,
            EventType::IncrementalSnapshot => 3,
            EventType::Meta => 4,
            EventType::Custom => 5,
            EventType::Plugin => 6,
            EventType::Unknown(other) => other,
        }
    }
}

/// Sources of incremental snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementalSource {
    Mutation,
    MouseMove,
    MouseInteraction,
    Scroll,
    ViewportResize,
    Input,
    TouchMove,
    MediaInteraction,
    StyleSheetRule,
    CanvasMutation,
    Font,
    Log,
    Drag,
    StyleDeclaration,
    Selection,
    AdoptedStyleSheet,
    CustomElement,
    Unknown(u64),
}

impl From<u64> for IncrementalSource {
    fn from(value: u64) -> Self {
        match value {
            0 => IncrementalSource::Mutation,
            1 => IncrementalSource::MouseMove,
            2 => IncrementalSource::MouseInteraction,
            3 => IncrementalSource::Scroll,
            4 => IncrementalSource::ViewportResize,
            5 => IncrementalSource::Input,
            6 => IncrementalSource::TouchMove,
            7 => IncrementalSource::MediaInteraction,
            8 => IncrementalSource::StyleSheetRule,
            9 => IncrementalSource::CanvasMutation,
            10 => IncrementalSource::Font,
            11 => IncrementalSource::Log,
            12 => IncrementalSource::Drag,
            13 => IncrementalSource::StyleDeclaration,
            14 => IncrementalSource::Selection,
            15 => IncrementalSource::AdoptedStyleSheet,
            16 => IncrementalSource::CustomElement,
            other => IncrementalSource::Unknown(other),
        }
    }
}

impl IncrementalSource {
    /// Sources produced directly by the user
    pub fn is_interactive(&self) -> bool {
        matches!(
            self,
            IncrementalSource::MouseMove
                | IncrementalSource::MouseInteraction
                | IncrementalSource::Scroll
                | IncrementalSource::ViewportResize
                | IncrementalSource::Input
                | IncrementalSource::TouchMove
                | IncrementalSource::MediaInteraction
                | IncrementalSource::Drag
        )
    }
}

/// One event emitted by the recorder library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,

    #[serde(default)]
    pub data: Value,

    /// Epoch milliseconds
    pub timestamp: i64,

    /// Compression format marker, set once bulky fields are compressed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cv: Option<String>,

    /// Anything else the library attached (`delay`, window ids, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RecorderEvent {
    pub fn new(event_type: EventType, data: Value, timestamp: i64) -> Self {
        Self {
            event_type,
            data,
            timestamp,
            cv: None,
            extra: Map::new(),
        }
    }

    /// Build a custom marker event
    pub fn custom(tag: &str, payload: Value, timestamp: i64) -> Self {
        Self::new(
            EventType::Custom,
            json!({ "tag": tag, "payload": payload }),
            timestamp,
        )
    }

    /// Parse a raw emit payload
    pub fn from_value(raw: Value) -> crate::utils::errors::Result<Self> {
        if !raw.is_object() {
            return Err(crate::utils::errors::RecorderError::MalformedEvent(format!(
                "expected an object, got {}",
                raw
            )));
        }
        serde_json::from_value(raw)
            .map_err(|e| crate::utils::errors::RecorderError::MalformedEvent(e.to_string()))
    }

    pub fn incremental_source(&self) -> Option<IncrementalSource> {
        if self.event_type != EventType::IncrementalSnapshot {
            return None;
        }
        self.data
            .get("source")
            .and_then(Value::as_u64)
            .map(IncrementalSource::from)
    }

    /// Whether the user caused this event
    pub fn is_interactive(&self) -> bool {
        self.incremental_source()
            .map(|source| source.is_interactive())
            .unwrap_or(false)
    }

    /// Tag of a custom event
    pub fn custom_tag(&self) -> Option<&str> {
        if self.event_type != EventType::Custom {
            return None;
        }
        self.data.get("tag").and_then(Value::as_str)
    }

    pub fn custom_payload(&self) -> Option<&Value> {
        if self.event_type != EventType::Custom {
            return None;
        }
        self.data.get("payload")
    }

    pub fn is_custom(&self, tag: &str) -> bool {
        self.custom_tag() == Some(tag)
    }

    /// Markers still buffered while the session is idle
    pub fn is_idle_allowed(&self) -> bool {
        matches!(
            self.custom_tag(),
            Some(tags::SESSION_IDLE) | Some(tags::SESSION_ENDING) | Some(tags::SESSION_STARTING)
        )
    }

    /// Markers whose timestamp is rewritten to the last user activity
    pub fn needs_timestamp_correction(&self) -> bool {
        self.is_idle_allowed()
    }

    /// Session/window a lifecycle marker is addressed to
    pub fn target_ids(&self) -> Option<(String, String)> {
        let payload = self.custom_payload()?;
        let session_id = payload.get("sessionId")?.as_str()?;
        let window_id = payload.get("windowId")?.as_str()?;
        Some((session_id.to_string(), window_id.to_string()))
    }

    /// `href` of a meta event
    pub fn href(&self) -> Option<&str> {
        if self.event_type != EventType::Meta {
            return None;
        }
        self.data.get("href").and_then(Value::as_str)
    }

    pub fn set_href(&mut self, href: &str) {
        if let Some(data) = self.data.as_object_mut() {
            data.insert("href".to_string(), Value::String(href.to_string()));
        }
    }
}
