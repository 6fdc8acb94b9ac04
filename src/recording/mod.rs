// src/recording/mod.rs
//! Session replay recording
//!
//! This module turns the raw event stream of a DOM recorder library into
//! batched `$snapshot` captures:
//!
//! - **Recorder**: The engine. Owns the buffer and every decision
//! - **Triggers**: URL, event and linked flag gating
//! - **Status**: Derives the recording status from the current inputs
//! - **Idle / Session**: Activity tracking and session rotation
//! - **Throttle**: Per-node mutation rate limiting
//! - **Compressor**: Gzip + base64 of bulky event fields
//! - **Buffer**: Size accounting and payload splitting
//! - **Event Queue**: Retry queue for calls the recorder library refused
//!
//! # Architecture
//!
//! ```text
//! recorder library ──emit──▶ SessionRecorder ──flush──▶ CaptureSink
//!        ▲                     │      ▲
//!        └── full snapshot ────┘      │
//!            custom markers      host events, remote config,
//!                                timer polls
//! ```

pub mod buffer;
pub mod capture;
pub mod compressor;
pub mod event;
pub mod event_queue;
pub mod hooks;
pub mod idle;
pub mod options;
pub mod persistence;
pub mod recorder;
pub mod remote_config;
pub mod sampling;
pub mod session;
pub mod source;
pub mod status;
pub mod throttle;
pub mod timers;
pub mod transform;
pub mod triggers;

#[cfg(test)]
pub mod testing;

// Re-export commonly used types
pub use capture::{CaptureOptions, CaptureSink};
pub use compressor::Compressor;
pub use event::{EventType, RecorderEvent};
pub use event_queue::{QueueStats, RetryQueue};
pub use hooks::{HookKind, HostEnvironment, HostEvent, ListenerHandle};
pub use persistence::{MemoryPersistence, PersistenceStore};
pub use recorder::{FlushOutcome, RecorderDeps, RecorderStats, SessionRecorder, StartReason};
pub use remote_config::{RemoteConfig, SessionRecordingRemoteConfig, TriggerMatchType};
pub use session::{InMemorySessionManager, SessionChangeReason, SessionManager, SessionState};
pub use source::{EventSource, SourceError};
pub use status::RecordingStatus;
pub use timers::{Clock, SystemClock};
pub use transform::UrlMasker;
pub use triggers::{TriggerKind, TriggerStatus};
