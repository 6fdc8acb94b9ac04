// src/runtime/mod.rs
//! Async runtime for the recorder engine
//!
//! The engine itself is synchronous. This module gives it a home on a
//! tokio task:
//!
//! ```text
//! emit() / host_event() / ...  →  mpsc channel  →  driver task
//!                                                     │
//!                              interval tick  →  poll_timers()
//! ```

pub mod driver;

pub use driver::{EngineInput, RecorderDriver, DEFAULT_TICK};
