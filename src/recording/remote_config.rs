// src/recording/remote_config.rs
//! Server-side recording configuration
//!
//! Received once per page load, persisted with a cache timestamp, and read
//! back on `start()`. Every field is optional: a missing field disables the
//! feature that depends on it rather than failing the whole config.

use crate::recording::persistence::{register_one, PersistenceStore, REMOTE_CONFIG_KEY};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Persisted configs older than this are distrusted before recording starts
pub const REMOTE_CONFIG_TTL_MS: i64 = 5 * 60 * 1000;

/// Default ingestion path
pub const DEFAULT_ENDPOINT: &str = "/s/";

/// How the trigger matchers combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMatchType {
    /// Every configured trigger must fire
    #[default]
    All,
    /// Any configured trigger is enough
    Any,
}

/// Linked feature flag, either a bare key or a key plus required variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LinkedFlag {
    Key(String),
    Variant { flag: String, variant: String },
}

impl LinkedFlag {
    pub fn key(&self) -> &str {
        match self {
            LinkedFlag::Key(key) => key,
            LinkedFlag::Variant { flag, .. } => flag,
        }
    }

    pub fn variant(&self) -> Option<&str> {
        match self {
            LinkedFlag::Key(_) => None,
            LinkedFlag::Variant { variant, .. } => Some(variant),
        }
    }
}

/// URL pattern entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlTrigger {
    pub url: String,
    #[serde(default = "default_matching")]
    pub matching: String,
}

fn default_matching() -> String {
    "regex".to_string()
}

/// Server-side masking options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMasking {
    pub mask_all_inputs: Option<bool>,
    pub mask_text_selector: Option<String>,
    pub block_selector: Option<String>,
}

/// Server-side network payload capture options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPayloadCapture {
    pub record_headers: Option<bool>,
    pub record_body: Option<bool>,
}

/// Recorder script selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptConfig {
    pub script: Option<String>,
}

/// The `sessionRecording` block of the remote config response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionRecordingRemoteConfig {
    pub endpoint: Option<String>,
    pub script_config: Option<ScriptConfig>,
    /// Decimal string, e.g. `"0.25"`. Bare numbers are accepted too.
    #[serde(deserialize_with = "string_or_number")]
    pub sample_rate: Option<String>,
    pub minimum_duration_milliseconds: Option<i64>,
    pub strict_minimum_duration: Option<bool>,
    pub masking: Option<RemoteMasking>,
    pub record_canvas: Option<bool>,
    pub canvas_fps: Option<f64>,
    pub canvas_quality: Option<String>,
    pub console_log_recording_enabled: Option<bool>,
    pub network_payload_capture: Option<NetworkPayloadCapture>,
    pub linked_flag: Option<LinkedFlag>,
    pub url_triggers: Vec<UrlTrigger>,
    pub url_blocklist: Vec<UrlTrigger>,
    pub event_triggers: Vec<String>,
    pub trigger_match_type: Option<TriggerMatchType>,
}

impl SessionRecordingRemoteConfig {
    /// Parsed sample rate; unparsable values disable sampling
    pub fn parsed_sample_rate(&self) -> Option<f64> {
        let raw = self.sample_rate.as_deref()?;
        match raw.trim().parse::<f64>() {
            Ok(rate) if rate.is_finite() => Some(rate.clamp(0.0, 1.0)),
            _ => {
                warn!("Ignoring unparsable sample rate {:?}", raw);
                None
            }
        }
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    }

    pub fn match_type(&self) -> TriggerMatchType {
        self.trigger_match_type.unwrap_or_default()
    }
}

/// Full remote config as far as the recorder is concerned
///
/// The server sends `false` for `sessionRecording` when the project has
/// recording turned off.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    #[serde(default, with = "recording_block")]
    pub session_recording: Option<SessionRecordingRemoteConfig>,
}

impl RemoteConfig {
    pub fn disabled() -> Self {
        Self {
            session_recording: None,
        }
    }

    pub fn enabled(config: SessionRecordingRemoteConfig) -> Self {
        Self {
            session_recording: Some(config),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

mod recording_block {
    use super::SessionRecordingRemoteConfig;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(
        value: &Option<SessionRecordingRemoteConfig>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(config) => config.serialize(serializer),
            None => false.serialize(serializer),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<SessionRecordingRemoteConfig>, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Object(map) => serde_json::from_value(Value::Object(map))
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}

/// Remote config as stored in persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRemoteConfig {
    #[serde(flatten)]
    pub config: RemoteConfig,
    pub cache_timestamp: i64,
}

impl PersistedRemoteConfig {
    pub fn is_stale(&self, now: i64) -> bool {
        now - self.cache_timestamp > REMOTE_CONFIG_TTL_MS
    }
}

/// Persist `config` stamped with `now`
pub fn persist_remote_config(store: &dyn PersistenceStore, config: &RemoteConfig, now: i64) {
    let persisted = PersistedRemoteConfig {
        config: config.clone(),
        cache_timestamp: now,
    };
    match serde_json::to_value(&persisted) {
        Ok(value) => register_one(store, REMOTE_CONFIG_KEY, value),
        Err(e) => warn!("Could not persist remote config: {}", e),
    }
}

/// Load the persisted remote config
///
/// A stale snapshot is only trusted when recording is already running, so
/// long-lived single page apps keep recording on the config they started
/// with. Corrupt values read as absent.
pub fn load_remote_config(
    store: &dyn PersistenceStore,
    now: i64,
    already_started: bool,
) -> Option<RemoteConfig> {
    let raw: Value = store.get(REMOTE_CONFIG_KEY)?;
    let persisted: PersistedRemoteConfig = match serde_json::from_value(raw) {
        Ok(persisted) => persisted,
        Err(e) => {
            warn!("Ignoring corrupt persisted remote config: {}", e);
            return None;
        }
    };

    if persisted.is_stale(now) && !already_started {
        debug!(
            "Persisted remote config is {}ms old, waiting for a fresh one",
            now - persisted.cache_timestamp
        );
        return None;
    }

    Some(persisted.config)
}
