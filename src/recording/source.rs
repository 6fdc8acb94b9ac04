// src/recording/source.rs
//! The DOM recorder library, seen from the engine

use crate::recording::event::RecorderEvent;
use crate::recording::options::RecordOptions;
use crate::utils::errors::RecorderError;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Library still loading; the call may be retried
    #[error("recorder not ready: {0}")]
    NotReady(String),

    #[error("recorder call failed: {0}")]
    Failed(String),
}

impl From<SourceError> for RecorderError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotReady(msg) => RecorderError::SourceNotReady(msg),
            SourceError::Failed(msg) => RecorderError::SourceFailed(msg),
        }
    }
}

/// Producer of recorder events
///
/// Events the library emits are fed back through
/// `SessionRecorder::on_rrweb_emit`. Custom events are returned directly so
/// the engine can route them through the same path.
pub trait EventSource: Send + Sync {
    /// Start recording with `options`
    fn record(&self, options: &RecordOptions) -> Result<(), SourceError>;

    fn stop(&self);

    fn take_full_snapshot(&self) -> Result<(), SourceError>;

    /// Stamp a custom event
    fn add_custom_event(&self, tag: &str, payload: Value) -> Result<RecorderEvent, SourceError>;
}
