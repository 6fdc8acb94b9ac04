// src/utils/config.rs
//! Client-side configuration
//!
//! These are the options the embedding application sets. Server-side
//! values arrive separately as remote config and are merged per feature
//! by `recording::options`.

use crate::utils::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Environment variable prefix (`REPLAY__RECORDING__SAMPLE_RATE=0.5`)
pub const ENV_PREFIX: &str = "REPLAY";

/// Top level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Recorder options
    pub recording: RecordingOptions,

    /// Logging options
    pub log: LogConfig,
}

impl EngineConfig {
    /// Load configuration from an optional file, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            debug!("Loading configuration from {:?}", path);
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: EngineConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config
            .recording
            .validate()
            .map_err(crate::utils::errors::RecorderError::ConfigError)?;

        Ok(config)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,

    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Mutation throttling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleOptions {
    pub enabled: bool,

    /// Mutations a single node may emit before being limited
    pub bucket_size: u32,

    /// Tokens returned to every bucket per second
    pub refill_rate: u32,
}

impl Default for ThrottleOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            bucket_size: 100,
            refill_rate: 10,
        }
    }
}

/// Client-side session recording options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingOptions {
    /// Client-side kill switch
    pub enabled: bool,

    /// Whether the host captures pageviews itself. When false the recorder
    /// emits `$url_changed` markers on navigation.
    pub capture_pageview: bool,

    /// Time without user interaction before the session is considered idle
    pub session_idle_threshold_ms: i64,

    /// Session inactivity timeout used by the session manager
    pub session_timeout_ms: i64,

    /// Interval between periodic full snapshots once recording is active
    pub full_snapshot_interval_ms: i64,

    /// Overrides the remote sample rate (0.0 - 1.0)
    pub sample_rate: Option<f64>,

    /// Overrides the remote minimum duration
    pub minimum_duration_ms: Option<i64>,

    /// Overrides the remote strict minimum duration flag
    pub strict_minimum_duration: Option<bool>,

    pub mask_all_inputs: bool,
    pub mask_text_selector: Option<String>,
    pub block_selector: Option<String>,
    pub record_cross_origin_iframes: bool,

    /// Console log capture (`None` defers to the server)
    pub console_log: Option<bool>,

    /// Network payload capture sub-flags (`None` defers to the server)
    pub record_headers: Option<bool>,
    pub record_body: Option<bool>,

    /// Canvas recording (`None` defers to the server)
    pub record_canvas: Option<bool>,
    pub canvas_fps: Option<f64>,
    pub canvas_quality: Option<f64>,

    /// Gzip bulky event payloads before buffering
    pub compress_events: bool,

    pub mutation_throttling: ThrottleOptions,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            capture_pageview: true,
            session_idle_threshold_ms: 5 * 60 * 1000,
            session_timeout_ms: 30 * 60 * 1000,
            full_snapshot_interval_ms: 5 * 60 * 1000,
            sample_rate: None,
            minimum_duration_ms: None,
            strict_minimum_duration: None,
            mask_all_inputs: true,
            mask_text_selector: None,
            block_selector: None,
            record_cross_origin_iframes: false,
            console_log: None,
            record_headers: None,
            record_body: None,
            record_canvas: None,
            canvas_fps: None,
            canvas_quality: None,
            compress_events: true,
            mutation_throttling: ThrottleOptions::default(),
        }
    }
}

impl RecordingOptions {
    /// Validate option values
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.session_idle_threshold_ms <= 0 {
            return Err("session_idle_threshold_ms must be positive".to_string());
        }
        if self.full_snapshot_interval_ms <= 0 {
            return Err("full_snapshot_interval_ms must be positive".to_string());
        }
        if let Some(rate) = self.sample_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(format!("sample_rate must be between 0 and 1, got {}", rate));
            }
        }
        if let Some(min) = self.minimum_duration_ms {
            if min < 0 {
                return Err("minimum_duration_ms cannot be negative".to_string());
            }
        }
        if self.mutation_throttling.enabled && self.mutation_throttling.bucket_size == 0 {
            return Err("mutation_throttling.bucket_size cannot be 0".to_string());
        }

        Ok(())
    }

    /// Sessions would rotate before they are ever marked idle
    pub fn idle_outlasts_session(&self) -> bool {
        self.session_idle_threshold_ms >= self.session_timeout_ms
    }
}
