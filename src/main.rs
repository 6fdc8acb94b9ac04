// src/main.rs
//! Replay recorder demo
//!
//! Feeds a JSON-lines file of recorder events through the engine and
//! prints every `$snapshot` capture to stdout.
//!
//! ```text
//! replay-recorder <events.jsonl> [remote-config.json]
//! ```

use anyhow::{bail, Context, Result};
use replay_recorder::observability::init_tracing;
use replay_recorder::recording::capture::{CaptureOptions, CaptureSink};
use replay_recorder::recording::event::RecorderEvent;
use replay_recorder::recording::hooks::{HookKind, HostEnvironment, ListenerHandle};
use replay_recorder::recording::options::RecordOptions;
use replay_recorder::recording::persistence::MemoryPersistence;
use replay_recorder::recording::remote_config::{RemoteConfig, SessionRecordingRemoteConfig};
use replay_recorder::recording::session::InMemorySessionManager;
use replay_recorder::recording::source::{EventSource, SourceError};
use replay_recorder::recording::timers::{Clock, SystemClock};
use replay_recorder::runtime::driver::DEFAULT_TICK;
use replay_recorder::utils::config::EngineConfig;
use replay_recorder::{RecorderDeps, RecorderDriver, SessionRecorder};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Prints captures as JSON lines
struct StdoutSink;

impl CaptureSink for StdoutSink {
    fn capture(&self, event_name: &str, properties: Map<String, Value>, options: &CaptureOptions) {
        let line = json!({
            "event": event_name,
            "url": options.url,
            "properties": properties,
        });
        println!("{}", line);
    }
}

/// Stand-in for the DOM recorder library; events come from the input file
struct FileSource {
    clock: Arc<dyn Clock>,
}

impl EventSource for FileSource {
    fn record(&self, options: &RecordOptions) -> Result<(), SourceError> {
        info!("Recording with {:?}", options);
        Ok(())
    }

    fn stop(&self) {}

    fn take_full_snapshot(&self) -> Result<(), SourceError> {
        Ok(())
    }

    fn add_custom_event(&self, tag: &str, payload: Value) -> Result<RecorderEvent, SourceError> {
        Ok(RecorderEvent::custom(tag, payload, self.clock.now_millis()))
    }
}

struct HeadlessHost;

impl HostEnvironment for HeadlessHost {
    fn current_url(&self) -> Option<String> {
        None
    }

    fn listen(&self, kind: HookKind) -> ListenerHandle {
        ListenerHandle::detached(kind)
    }
}

fn load_remote_config(path: Option<&String>) -> Result<RemoteConfig> {
    let Some(path) = path else {
        return Ok(RemoteConfig::enabled(SessionRecordingRemoteConfig::default()));
    };
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(events_path) = args.first() else {
        bail!("usage: replay-recorder <events.jsonl> [remote-config.json]");
    };

    let config_path = std::env::var("REPLAY_CONFIG").ok();
    let config = EngineConfig::load(config_path.as_deref().map(Path::new))?;
    init_tracing(&config.log)?;

    info!("Starting replay recorder v{}", replay_recorder::VERSION);

    let remote = load_remote_config(args.get(1))?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let deps = RecorderDeps {
        source: Arc::new(FileSource {
            clock: clock.clone(),
        }),
        capture: Arc::new(StdoutSink),
        session_manager: Arc::new(InMemorySessionManager::new(
            config.recording.session_timeout_ms,
        )),
        persistence: Arc::new(MemoryPersistence::new()),
        host: Arc::new(HeadlessHost),
        clock,
    };

    let engine = SessionRecorder::new(config.recording.clone(), deps);
    let driver = RecorderDriver::spawn(engine, DEFAULT_TICK);
    driver.remote_config(remote).await?;

    let input = tokio::fs::read_to_string(events_path)
        .await
        .with_context(|| format!("reading {}", events_path))?;

    for (line_no, line) in input.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(raw) => driver.emit(raw).await?,
            Err(e) => warn!("Skipping line {}: {}", line_no + 1, e),
        }
    }

    let outcome = driver.flush().await?;
    info!("Final flush: {:?}", outcome);

    let engine = driver.shutdown().await?;
    let stats = engine.stats();
    info!(
        "Done: {} received, {} buffered, {} dropped, {} payloads ({} bytes avg)",
        stats.events_received,
        stats.events_buffered,
        stats.events_dropped,
        stats.payloads_sent,
        stats.avg_payload_bytes()
    );

    Ok(())
}
