// src/recording/testing.rs
//! In-memory collaborators for engine tests

use crate::recording::capture::{CaptureOptions, CaptureSink};
use crate::recording::event::RecorderEvent;
use crate::recording::hooks::{HookKind, HostEnvironment, ListenerHandle};
use crate::recording::options::RecordOptions;
use crate::recording::persistence::MemoryPersistence;
use crate::recording::recorder::{RecorderDeps, SessionRecorder};
use crate::recording::session::{SessionChangeReason, SessionManager, SessionState};
use crate::recording::source::{EventSource, SourceError};
use crate::recording::timers::Clock;
use crate::utils::config::RecordingOptions;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: i64) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub name: String,
    pub properties: Map<String, Value>,
    pub options: CaptureOptions,
}

impl CapturedEvent {
    pub fn session_id(&self) -> &str {
        self.properties["$session_id"].as_str().unwrap_or_default()
    }

    pub fn snapshot_data(&self) -> Vec<Value> {
        self.properties["$snapshot_data"]
            .as_array()
            .cloned()
            .unwrap_or_default()
    }

    /// Tags of the custom markers in this payload
    pub fn marker_tags(&self) -> Vec<String> {
        self.snapshot_data()
            .iter()
            .filter_map(|e| e["data"]["tag"].as_str().map(str::to_string))
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct RecordingCaptureSink {
    events: Mutex<Vec<CapturedEvent>>,
}

impl RecordingCaptureSink {
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn all_markers(&self) -> Vec<String> {
        self.events().iter().flat_map(|e| e.marker_tags()).collect()
    }
}

impl CaptureSink for RecordingCaptureSink {
    fn capture(&self, event_name: &str, properties: Map<String, Value>, options: &CaptureOptions) {
        self.events.lock().push(CapturedEvent {
            name: event_name.to_string(),
            properties,
            options: options.clone(),
        });
    }
}

/// Recorder library stand-in; stamps custom events with the test clock
pub struct FakeSource {
    clock: Arc<ManualClock>,
    ready: AtomicBool,
    pub full_snapshots: AtomicUsize,
    pub record_calls: Mutex<Vec<RecordOptions>>,
    pub stop_calls: AtomicUsize,
    pub custom_events: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            ready: AtomicBool::new(true),
            full_snapshots: AtomicUsize::new(0),
            record_calls: Mutex::new(Vec::new()),
            stop_calls: AtomicUsize::new(0),
            custom_events: Mutex::new(Vec::new()),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn full_snapshot_count(&self) -> usize {
        self.full_snapshots.load(Ordering::SeqCst)
    }

    fn check_ready(&self) -> Result<(), SourceError> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SourceError::NotReady("loading".to_string()))
        }
    }
}

impl EventSource for FakeSource {
    fn record(&self, options: &RecordOptions) -> Result<(), SourceError> {
        self.record_calls.lock().push(options.clone());
        Ok(())
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn take_full_snapshot(&self) -> Result<(), SourceError> {
        self.check_ready()?;
        self.full_snapshots.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn add_custom_event(&self, tag: &str, payload: Value) -> Result<RecorderEvent, SourceError> {
        self.check_ready()?;
        self.custom_events.lock().push(tag.to_string());
        Ok(RecorderEvent::custom(tag, payload, self.clock.now_millis()))
    }
}

/// Session manager whose answer the test controls
#[derive(Debug)]
pub struct FakeSessionManager {
    state: Mutex<SessionState>,
}

impl FakeSessionManager {
    pub fn new(session_id: &str, window_id: &str, start: i64) -> Self {
        Self {
            state: Mutex::new(SessionState {
                session_id: session_id.to_string(),
                window_id: window_id.to_string(),
                session_start_timestamp: start,
                change_reason: None,
            }),
        }
    }

    /// The next lookup reports a rotation to these ids
    pub fn rotate(&self, session_id: &str, window_id: &str, start: i64, reason: SessionChangeReason) {
        *self.state.lock() = SessionState {
            session_id: session_id.to_string(),
            window_id: window_id.to_string(),
            session_start_timestamp: start,
            change_reason: Some(reason),
        };
    }
}

impl SessionManager for FakeSessionManager {
    fn check_and_get_session_and_window_id(&self, _read_only: bool, _timestamp: i64) -> SessionState {
        let mut state = self.state.lock();
        let current = state.clone();
        state.change_reason = None;
        current
    }
}

#[derive(Debug, Default)]
pub struct FakeHost {
    url: Mutex<Option<String>>,
    active_listeners: Arc<AtomicUsize>,
}

impl FakeHost {
    pub fn set_url(&self, url: &str) {
        *self.url.lock() = Some(url.to_string());
    }

    pub fn active_listeners(&self) -> usize {
        self.active_listeners.load(Ordering::SeqCst)
    }
}

impl HostEnvironment for FakeHost {
    fn current_url(&self) -> Option<String> {
        self.url.lock().clone()
    }

    fn listen(&self, kind: HookKind) -> ListenerHandle {
        self.active_listeners.fetch_add(1, Ordering::SeqCst);
        let active = self.active_listeners.clone();
        ListenerHandle::new(kind, move || {
            active.fetch_sub(1, Ordering::SeqCst);
        })
    }
}

/// A recorder wired to fakes
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub capture: Arc<RecordingCaptureSink>,
    pub source: Arc<FakeSource>,
    pub sessions: Arc<FakeSessionManager>,
    pub store: Arc<MemoryPersistence>,
    pub host: Arc<FakeHost>,
    pub recorder: SessionRecorder,
}

impl Harness {
    pub fn new(options: RecordingOptions) -> Self {
        let clock = Arc::new(ManualClock::default());
        let capture = Arc::new(RecordingCaptureSink::default());
        let source = Arc::new(FakeSource::new(clock.clone()));
        let sessions = Arc::new(FakeSessionManager::new("s1", "w1", 0));
        let store = Arc::new(MemoryPersistence::new());
        let host = Arc::new(FakeHost::default());

        let deps = RecorderDeps {
            source: source.clone(),
            capture: capture.clone(),
            session_manager: sessions.clone(),
            persistence: store.clone(),
            host: host.clone(),
            clock: clock.clone(),
        };

        Self {
            recorder: SessionRecorder::new(options, deps),
            clock,
            capture,
            source,
            sessions,
            store,
            host,
        }
    }
}
