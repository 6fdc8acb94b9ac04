// src/lib.rs
//! Session replay recorder
//!
//! Buffers the event stream of a DOM recorder library, decides whether a
//! session is recorded at all (sampling, triggers, URL blocklist, minimum
//! duration) and ships batched `$snapshot` payloads through a host
//! supplied capture sink.
//!
//! # Architecture
//!
//! - **recording**: The synchronous engine and its collaborators
//! - **runtime**: Tokio task that drives the engine and its timers
//! - **observability**: Tracing subscriber setup
//! - **utils**: Configuration and errors

pub mod observability;
pub mod recording;
pub mod runtime;
pub mod utils;

// Re-export commonly used types
pub use recording::recorder::{RecorderDeps, SessionRecorder};
pub use runtime::driver::RecorderDriver;
pub use utils::config::EngineConfig;
pub use utils::errors::{RecorderError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
