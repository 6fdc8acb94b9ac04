// src/utils/mod.rs
//! Common utilities
//!
//! - **errors**: Error type and result alias shared by every module
//! - **config**: Client-side configuration loading

pub mod config;
pub mod errors;

pub use config::{EngineConfig, LogConfig, RecordingOptions};
pub use errors::{RecorderError, Result};
