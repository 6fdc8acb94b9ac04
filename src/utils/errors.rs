// src/utils/errors.rs
//! Error types for the replay recorder
//!
//! None of these errors ever reach the host page: public entry points on
//! the recorder log them and carry on.

/// Result type for recorder operations
pub type Result<T> = std::result::Result<T, RecorderError>;

/// Errors raised inside the recording pipeline
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The recorder library has not finished loading
    #[error("Event source not ready: {0}")]
    SourceNotReady(String),

    /// The recorder library rejected a call for another reason
    #[error("Event source failed: {0}")]
    SourceFailed(String),

    /// A recorder event did not have the expected shape
    #[error("Malformed recorder event: {0}")]
    MalformedEvent(String),

    /// Compressing an event failed
    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    /// A user-supplied masking function failed
    #[error("Masking failed: {0}")]
    MaskingFailed(String),

    /// A URL trigger pattern could not be compiled
    #[error("Invalid URL pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The driver task is gone
    #[error("Recorder driver closed")]
    DriverClosed,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<config::ConfigError> for RecorderError {
    fn from(err: config::ConfigError) -> Self {
        RecorderError::ConfigError(err.to_string())
    }
}
