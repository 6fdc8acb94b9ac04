// src/observability/mod.rs
//! Logging setup
//!
//! The engine logs through `tracing` and counts through `metrics` macros.
//! Installing a metrics recorder is left to the host; without one the
//! counters are no-ops.

use crate::utils::config::LogConfig;
use crate::utils::errors::{RecorderError, Result};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over `config.filter` when set.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| RecorderError::ConfigError(format!("tracing: {}", e)))
}
