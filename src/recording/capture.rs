// src/recording/capture.rs
//! Outbound transport seam

use serde::Serialize;
use serde_json::{Map, Value};

/// Event name of a shipped snapshot batch
pub const SNAPSHOT_EVENT: &str = "$snapshot";

/// Transport batch shared by all recording payloads
pub const RECORDINGS_BATCH_KEY: &str = "recordings";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureOptions {
    /// Ingestion endpoint path
    pub url: String,
    pub batch_key: String,
    pub no_truncate: bool,
    pub skip_rate_limit: bool,
}

impl CaptureOptions {
    /// Options for `$snapshot` payloads sent to `endpoint`
    pub fn snapshot(endpoint: &str) -> Self {
        Self {
            url: endpoint.to_string(),
            batch_key: RECORDINGS_BATCH_KEY.to_string(),
            no_truncate: true,
            skip_rate_limit: true,
        }
    }
}

/// Fire-and-forget event emission
pub trait CaptureSink: Send + Sync {
    fn capture(&self, event_name: &str, properties: Map<String, Value>, options: &CaptureOptions);
}
