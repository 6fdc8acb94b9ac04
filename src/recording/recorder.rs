// src/recording/recorder.rs
//! Session recorder engine
//!
//! A synchronous state machine. Every input is a method call on
//! `SessionRecorder`: recorder library emits, host notifications, remote
//! config and timer polls. Nothing blocks and nothing spawns; the runtime
//! driver owns the engine and feeds it.
//!
//! Per-event pipeline:
//!
//! ```text
//! on_rrweb_emit → retry queue drain → parse → URL masking / URL conditions
//!   → mutation throttling → rotation check → idle detection
//!   → timestamp correction → compression → buffer (or drop)
//!                                            ↓
//!                                  flush → capture("$snapshot")
//! ```

use crate::recording::buffer::{split_buffer, BufferedEvent, SnapshotBuffer, SEVEN_MEGABYTES};
use crate::recording::capture::{CaptureOptions, CaptureSink, SNAPSHOT_EVENT};
use crate::recording::compressor::Compressor;
use crate::recording::event::{tags, EventType, RecorderEvent};
use crate::recording::event_queue::{QueueStats, RetryQueue, SourceCall};
use crate::recording::hooks::{
    HookKind, HostEnvironment, HostEvent, LifecycleHooks, ListenerHandle, LIFECYCLE_HOOKS,
};
use crate::recording::idle::{ActivityDetector, ActivityTransition};
use crate::recording::options::RecordOptions;
use crate::recording::persistence::{
    is_marked_for_session, register_one, PersistenceStore, IS_SAMPLED_KEY,
    MINIMUM_DURATION_PASSED_KEY, SESSION_SCOPED_KEYS, START_REASON_KEY,
};
use crate::recording::remote_config::{
    load_remote_config, persist_remote_config, RemoteConfig, SessionRecordingRemoteConfig,
    TriggerMatchType, DEFAULT_ENDPOINT,
};
use crate::recording::sampling::{
    needs_sampling_decision, sample_on_property, stored_sampling_decision,
};
use crate::recording::session::{FlushedSizeTracker, SessionChangeReason, SessionManager};
use crate::recording::source::{EventSource, SourceError};
use crate::recording::status::{resolve_status, RecordingStatus, StatusInputs};
use crate::recording::throttle::MutationThrottler;
use crate::recording::timers::{Clock, Timers};
use crate::recording::transform::{estimate_size, UrlMasker};
use crate::recording::triggers::combinator::combined_trigger_status;
use crate::recording::triggers::{
    EventTriggerMatching, LinkedFlagChange, LinkedFlagMatching, TriggerKind, TriggerMatcher,
    TriggerStatus, UrlTriggerMatching,
};
use crate::utils::config::RecordingOptions;
use crate::utils::errors::{RecorderError, Result};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Full snapshot cadence while a trigger is still pending
pub const TRIGGER_PENDING_FULL_SNAPSHOT_INTERVAL_MS: i64 = 60_000;

/// Why recording was (re)started, persisted for the host to report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartReason {
    RecordingInitialized,
    SamplingOverridden,
    LinkedFlagOverridden,
    UrlTriggerOverridden,
    EventTriggerOverridden,
    SessionIdChanged,
    LinkedFlagMatched,
    UrlTriggerMatched,
    EventTriggerMatched,
}

impl StartReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartReason::RecordingInitialized => "recording_initialized",
            StartReason::SamplingOverridden => "sampling_overridden",
            StartReason::LinkedFlagOverridden => "linked_flag_overridden",
            StartReason::UrlTriggerOverridden => "url_trigger_overridden",
            StartReason::EventTriggerOverridden => "event_trigger_overridden",
            StartReason::SessionIdChanged => "session_id_changed",
            StartReason::LinkedFlagMatched => "linked_flag_matched",
            StartReason::UrlTriggerMatched => "url_trigger_matched",
            StartReason::EventTriggerMatched => "event_trigger_matched",
        }
    }

    fn matched(kind: TriggerKind) -> Self {
        match kind {
            TriggerKind::Url => StartReason::UrlTriggerMatched,
            TriggerKind::Event => StartReason::EventTriggerMatched,
            TriggerKind::LinkedFlag => StartReason::LinkedFlagMatched,
        }
    }
}

impl fmt::Display for StartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a flush did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Buffer shipped as this many payloads
    Shipped(usize),
    /// Nothing to ship
    Empty,
    /// Gated by status or minimum duration; the timer was re-armed
    Held,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushMode {
    Scheduled,
    /// Idle transition: skips the minimum duration gate
    Idle,
}

/// One-shot overrides requested before recording started
#[derive(Debug, Default, Clone, Copy)]
struct PendingOverrides {
    sampling: bool,
    linked_flag: bool,
    event_trigger: bool,
    url_trigger: bool,
}

/// Collaborators the engine calls out to
#[derive(Clone)]
pub struct RecorderDeps {
    pub source: Arc<dyn EventSource>,
    pub capture: Arc<dyn CaptureSink>,
    pub session_manager: Arc<dyn SessionManager>,
    pub persistence: Arc<dyn PersistenceStore>,
    pub host: Arc<dyn HostEnvironment>,
    pub clock: Arc<dyn Clock>,
}

/// Session replay recorder
pub struct SessionRecorder {
    options: RecordingOptions,
    deps: RecorderDeps,
    masker: UrlMasker,
    compressor: Compressor,

    started: bool,
    remote_config_received: bool,
    server_enabled: bool,
    endpoint: String,
    match_type: TriggerMatchType,
    sample_rate: Option<f64>,
    minimum_duration_ms: Option<i64>,
    strict_minimum_duration: bool,

    url_trigger: UrlTriggerMatching,
    event_trigger: EventTriggerMatching,
    linked_flag: LinkedFlagMatching,
    throttler: MutationThrottler,
    idle: ActivityDetector,
    retry_queue: RetryQueue,
    timers: Timers,
    hooks: LifecycleHooks,
    session_listener: Option<ListenerHandle>,
    pending: PendingOverrides,

    session_id: String,
    window_id: String,
    session_start_timestamp: i64,
    buffer: SnapshotBuffer,
    flushed_size: FlushedSizeTracker,
    last_href: Option<String>,

    stats: RecorderStats,
}

impl SessionRecorder {
    pub fn new(options: RecordingOptions, deps: RecorderDeps) -> Self {
        let now = deps.clock.now_millis();
        let store = deps.persistence.clone();

        if let Err(e) = options.validate() {
            warn!("Recording options are invalid: {}", e);
        }
        if options.idle_outlasts_session() {
            warn!(
                "session_idle_threshold_ms ({}) is not below the session timeout ({}); \
                 sessions will rotate before they are marked idle",
                options.session_idle_threshold_ms, options.session_timeout_ms
            );
        }

        Self {
            idle: ActivityDetector::new(options.session_idle_threshold_ms, now),
            throttler: MutationThrottler::new(options.mutation_throttling.clone()),
            url_trigger: UrlTriggerMatching::new(store.clone()),
            event_trigger: EventTriggerMatching::new(store.clone()),
            linked_flag: LinkedFlagMatching::new(store),
            options,
            deps,
            masker: UrlMasker::default(),
            compressor: Compressor::default(),
            started: false,
            remote_config_received: false,
            server_enabled: false,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            match_type: TriggerMatchType::default(),
            sample_rate: None,
            minimum_duration_ms: None,
            strict_minimum_duration: false,
            retry_queue: RetryQueue::new(),
            timers: Timers::new(),
            hooks: LifecycleHooks::default(),
            session_listener: None,
            pending: PendingOverrides::default(),
            session_id: String::new(),
            window_id: String::new(),
            session_start_timestamp: now,
            buffer: SnapshotBuffer::new("", ""),
            flushed_size: FlushedSizeTracker::default(),
            last_href: None,
            stats: RecorderStats::default(),
        }
    }

    /// Install user supplied URL masking
    pub fn set_url_masker(&mut self, masker: UrlMasker) {
        self.masker = masker;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn window_id(&self) -> &str {
        &self.window_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn buffer(&self) -> &SnapshotBuffer {
        &self.buffer
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    pub fn last_href(&self) -> Option<&str> {
        self.last_href.as_deref()
    }

    /// Earliest pending deadline, for drivers that sleep until it
    pub fn next_deadline(&self) -> Option<i64> {
        self.timers.next_deadline()
    }

    /// Current recording status, derived on every call
    pub fn status(&self) -> RecordingStatus {
        self.status_for(&self.session_id)
    }

    /// Combined trigger status for the current session
    pub fn trigger_status(&self) -> TriggerStatus {
        self.trigger_status_for(&self.session_id)
    }

    pub fn stats(&self) -> RecorderStats {
        self.stats.clone()
    }

    pub fn retry_queue_stats(&self) -> QueueStats {
        self.retry_queue.stats()
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Accept a remote config response
    pub fn on_remote_config(&mut self, config: RemoteConfig) {
        let now = self.now();
        persist_remote_config(self.deps.persistence.as_ref(), &config, now);
        self.remote_config_received = true;

        if config.session_recording.is_some() {
            self.server_enabled = true;
            self.start(StartReason::RecordingInitialized);
        } else {
            info!("Session recording disabled by remote config");
            self.server_enabled = false;
            self.stop();
        }
    }

    /// Start recording, or refresh config if already started
    pub fn start(&mut self, reason: StartReason) {
        if !self.options.enabled {
            debug!("Session recording disabled client side");
            return;
        }

        let now = self.now();
        let Some(remote) = load_remote_config(self.deps.persistence.as_ref(), now, self.started)
        else {
            debug!("No usable remote config, not starting ({})", reason);
            return;
        };
        self.remote_config_received = true;

        let Some(recording) = remote.session_recording else {
            self.server_enabled = false;
            debug!("Session recording disabled server side");
            return;
        };
        self.server_enabled = true;
        self.apply_remote_config(&recording);

        if !self.started {
            let session = self
                .deps
                .session_manager
                .check_and_get_session_and_window_id(true, now);
            self.adopt_session(
                session.session_id,
                session.window_id,
                session.session_start_timestamp,
            );
        }

        self.apply_pending_overrides();

        if !self.started {
            let record_options = RecordOptions::build(&self.options, &recording);
            if let Err(e) = self.deps.source.record(&record_options) {
                error!("Failed to start recorder: {}", RecorderError::from(e));
                return;
            }

            self.started = true;
            self.hooks = LifecycleHooks::acquire(self.deps.host.as_ref(), &LIFECYCLE_HOOKS);
            if self.session_listener.is_none() {
                self.session_listener = Some(self.deps.host.listen(HookKind::SessionId));
            }
            self.idle.reset(now);
            self.persist_start_reason(reason);

            info!(
                "Session recording started for session {} ({})",
                self.session_id, reason
            );
            metrics::counter!("replay_recordings_started_total", "reason" => reason.as_str())
                .increment(1);
        }

        self.make_sampling_decision();
        self.schedule_full_snapshot(now);
    }

    /// Stop recording. Safe to call when never started, and more than once.
    pub fn stop(&mut self) {
        if self.started {
            self.flush_buffer(FlushMode::Scheduled);
            self.deps.source.stop();
            self.started = false;
            info!("Session recording stopped for session {}", self.session_id);
        }

        self.timers.clear_all();
        self.hooks.release();
        self.session_listener = None;
        self.retry_queue.clear();
        self.url_trigger.stop();
        self.throttler.reset();
    }

    fn apply_remote_config(&mut self, recording: &SessionRecordingRemoteConfig) {
        self.endpoint = recording.endpoint().to_string();
        self.match_type = recording.match_type();
        self.sample_rate = self
            .options
            .sample_rate
            .or_else(|| recording.parsed_sample_rate());
        self.minimum_duration_ms = self
            .options
            .minimum_duration_ms
            .or(recording.minimum_duration_milliseconds);
        self.strict_minimum_duration = self
            .options
            .strict_minimum_duration
            .or(recording.strict_minimum_duration)
            .unwrap_or(false);

        self.url_trigger.on_config(recording);
        self.event_trigger.on_config(recording);
        self.linked_flag.on_config(recording);
    }

    fn adopt_session(&mut self, session_id: String, window_id: String, session_start: i64) {
        if self.buffer.is_empty() {
            self.buffer = SnapshotBuffer::new(session_id.clone(), window_id.clone());
        }
        self.session_id = session_id;
        self.window_id = window_id;
        self.session_start_timestamp = session_start;
    }

    fn persist_start_reason(&self, reason: StartReason) {
        register_one(
            self.deps.persistence.as_ref(),
            START_REASON_KEY,
            Value::String(reason.as_str().to_string()),
        );
    }

    // ---------------------------------------------------------------------
    // Overrides
    // ---------------------------------------------------------------------

    /// Record this session regardless of the sample rate
    pub fn override_sampling(&mut self) {
        self.request_override(|p| p.sampling = true, StartReason::SamplingOverridden);
    }

    /// Treat the linked flag as enabled for this session
    pub fn override_linked_flag(&mut self) {
        self.request_override(|p| p.linked_flag = true, StartReason::LinkedFlagOverridden);
    }

    /// Treat a trigger as fired for this session
    pub fn override_trigger(&mut self, kind: TriggerKind) {
        match kind {
            TriggerKind::Url => {
                self.request_override(|p| p.url_trigger = true, StartReason::UrlTriggerOverridden)
            }
            TriggerKind::Event => self.request_override(
                |p| p.event_trigger = true,
                StartReason::EventTriggerOverridden,
            ),
            TriggerKind::LinkedFlag => self.override_linked_flag(),
        }
    }

    fn request_override(&mut self, set: fn(&mut PendingOverrides), reason: StartReason) {
        set(&mut self.pending);

        if !self.started {
            self.start(reason);
            return;
        }

        self.apply_pending_overrides();
        self.persist_start_reason(reason);
        info!("Recording override applied ({})", reason);
        self.flush_buffer(FlushMode::Scheduled);
        let now = self.now();
        self.schedule_full_snapshot(now);
    }

    fn apply_pending_overrides(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        let session_id = self.session_id.clone();

        if pending.sampling {
            register_one(
                self.deps.persistence.as_ref(),
                IS_SAMPLED_KEY,
                Value::String(session_id.clone()),
            );
        }
        if pending.linked_flag {
            self.linked_flag.set_seen(&session_id, true);
        }
        if pending.event_trigger {
            self.event_trigger.activate(&session_id);
        }
        if pending.url_trigger {
            self.url_trigger.activate(&session_id);
        }
    }

    // ---------------------------------------------------------------------
    // Status
    // ---------------------------------------------------------------------

    fn trigger_status_for(&self, session_id: &str) -> TriggerStatus {
        combined_trigger_status(
            self.match_type,
            &self.url_trigger,
            &self.event_trigger,
            &self.linked_flag,
            session_id,
        )
    }

    fn status_for(&self, session_id: &str) -> RecordingStatus {
        let inputs = StatusInputs {
            flags_received: self.remote_config_received,
            recording_enabled: self.options.enabled && self.server_enabled,
            is_sampled: stored_sampling_decision(self.deps.persistence.as_ref(), session_id),
            url_blocked: self.url_trigger.url_blocked(),
            trigger_statuses: vec![
                self.url_trigger.trigger_status(session_id),
                self.event_trigger.trigger_status(session_id),
                self.linked_flag.trigger_status(session_id),
            ],
        };
        resolve_status(self.match_type, &inputs)
    }

    fn make_sampling_decision(&mut self) {
        let store = self.deps.persistence.clone();
        let session_id = self.session_id.clone();

        let Some(rate) = self.sample_rate else {
            // keep an override for this session
            if !is_marked_for_session(store.as_ref(), IS_SAMPLED_KEY, &session_id) {
                store.unregister(IS_SAMPLED_KEY);
            }
            return;
        };

        if !needs_sampling_decision(store.as_ref(), &session_id) {
            return;
        }

        let sampled = sample_on_property(&session_id, rate);
        let decision = if sampled {
            Value::String(session_id.clone())
        } else {
            Value::Bool(false)
        };
        register_one(store.as_ref(), IS_SAMPLED_KEY, decision);

        if sampled {
            debug!("Session {} sampled in at rate {}", session_id, rate);
        } else {
            info!("Session {} sampled out at rate {}", session_id, rate);
        }
        metrics::counter!(
            "replay_sampling_decisions_total",
            "sampled" => if sampled { "true" } else { "false" }
        )
        .increment(1);

        self.emit_marker(
            tags::SAMPLING_DECISION,
            json!({ "sampleRate": rate, "isSampled": sampled }),
        );
    }

    // ---------------------------------------------------------------------
    // Event pipeline
    // ---------------------------------------------------------------------

    /// Entry point for everything the recorder library emits
    pub fn on_rrweb_emit(&mut self, raw: Value) {
        self.stats.events_received += 1;
        self.drain_retry_queue();

        let event = match RecorderEvent::from_value(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping recorder event: {}", e);
                self.drop_event("malformed");
                return;
            }
        };

        if let Err(e) = self.process_event(event) {
            error!("Failed to process recorder event: {}", e);
        }
    }

    fn process_event(&mut self, mut event: RecorderEvent) -> Result<()> {
        if !self.started {
            self.drop_event("not_started");
            return Ok(());
        }

        if event.event_type == EventType::Meta {
            if let Some(href) = event.href().map(str::to_string) {
                match self.masker.mask_url(&href) {
                    Some(masked) => {
                        event.set_href(&masked);
                        self.last_href = Some(masked);
                    }
                    None => {
                        debug!("Meta event URL masked away, dropping event");
                        self.drop_event("masked");
                        return Ok(());
                    }
                }
            }
        } else if !self.options.capture_pageview {
            self.emit_url_change();
        }

        self.check_url_conditions();

        // the pause marker itself must get through
        if self.url_trigger.url_blocked() && !event.is_custom(tags::RECORDING_PAUSED) {
            self.drop_event("url_blocked");
            return Ok(());
        }

        if event.event_type == EventType::FullSnapshot {
            self.schedule_full_snapshot(self.now());
            if self.trigger_status() == TriggerStatus::TriggerPending {
                self.buffer.retain_from_last_meta();
            }
        }

        let throttled = self.throttler.throttle(event);
        for node_id in throttled.newly_limited {
            self.emit_marker(tags::RATE_LIMITED, json!({ "nodeId": node_id }));
        }
        let Some(mut event) = throttled.event else {
            self.drop_event("rate_limited");
            return Ok(());
        };

        // rotation sees the activity from before this event
        let last_activity = self.idle.last_activity_timestamp();
        self.check_session_rotation(&event, last_activity);

        match self.idle.observe(&event) {
            ActivityTransition::BecameIdle {
                last_activity_timestamp,
                event_timestamp,
            } => self.on_became_idle(last_activity_timestamp, event_timestamp),
            ActivityTransition::ReturnedFromIdle => self.on_returned_from_idle(&event),
            ActivityTransition::None => {}
        }
        if self.idle.is_idle() && !event.is_idle_allowed() {
            self.drop_event("idle");
            return Ok(());
        }

        let corrected = event
            .custom_payload()
            .filter(|_| event.needs_timestamp_correction())
            .and_then(|p| p.get("lastActivityTimestamp"))
            .and_then(Value::as_i64);
        if let Some(ts) = corrected {
            event.timestamp = ts;
        }

        if self.options.compress_events {
            event = self.compressor.compress_event(event);
        }

        let (session_id, window_id) = event
            .target_ids()
            .unwrap_or_else(|| (self.session_id.clone(), self.window_id.clone()));

        if self.status_for(&session_id) == RecordingStatus::Disabled {
            self.buffer.clear();
            self.drop_event("disabled");
            return Ok(());
        }

        self.buffer_event(event, session_id, window_id)
    }

    fn emit_url_change(&mut self) {
        let Some(url) = self.deps.host.current_url() else {
            return;
        };
        let Some(href) = self.masker.mask_url(&url) else {
            return;
        };
        if self.last_href.as_deref() == Some(href.as_str()) {
            return;
        }

        self.last_href = Some(href.clone());
        self.emit_marker(tags::URL_CHANGED, json!({ "href": href }));
    }

    fn check_url_conditions(&mut self) {
        let Some(url) = self.deps.host.current_url() else {
            return;
        };

        let session_id = self.session_id.clone();
        let outcome = self.url_trigger.check_url(&url, &session_id);

        if outcome.paused {
            self.timers.clear_full_snapshot();
            self.emit_marker(tags::RECORDING_PAUSED, json!({ "reason": "url blocker" }));
        }
        if outcome.resumed {
            self.emit_marker(tags::RECORDING_RESUMED, json!({ "reason": "left blocked url" }));
            self.try_take_full_snapshot();
            self.schedule_full_snapshot(self.now());
        }
        if outcome.activated {
            self.on_trigger_activated(TriggerKind::Url);
        }
    }

    fn on_became_idle(&mut self, last_activity_timestamp: i64, event_timestamp: i64) {
        info!(
            "Session {} idle since {}, flushing",
            self.session_id, last_activity_timestamp
        );
        self.timers.clear_full_snapshot();

        self.emit_marker(
            tags::SESSION_IDLE,
            json!({
                "eventTimestamp": event_timestamp,
                "lastActivityTimestamp": last_activity_timestamp,
                "threshold": self.idle.threshold_ms(),
                "bufferLength": self.buffer.len(),
                "bufferSize": self.buffer.size,
            }),
        );
        self.flush_buffer(FlushMode::Idle);
    }

    fn on_returned_from_idle(&mut self, event: &RecorderEvent) {
        let event_type: u8 = event.event_type.into();
        self.emit_marker(
            tags::SESSION_NO_LONGER_IDLE,
            json!({ "reason": "user activity", "type": event_type }),
        );
        self.try_take_full_snapshot();
        self.schedule_full_snapshot(self.now());
    }

    fn check_session_rotation(&mut self, event: &RecorderEvent, last_activity: i64) {
        let state = self
            .deps
            .session_manager
            .check_and_get_session_and_window_id(!event.is_interactive(), event.timestamp);

        if state.session_id != self.session_id || state.window_id != self.window_id {
            self.on_session_change(
                state.session_id,
                state.window_id,
                state.change_reason,
                Some(state.session_start_timestamp),
                last_activity,
            );
        }
    }

    /// React to new session/window ids
    fn on_session_change(
        &mut self,
        session_id: String,
        window_id: String,
        reason: Option<SessionChangeReason>,
        session_start: Option<i64>,
        last_activity: i64,
    ) {
        if session_id == self.session_id {
            if window_id != self.window_id {
                debug!("Window id changed to {}", window_id);
                self.flush_buffer(FlushMode::Scheduled);
                self.window_id = window_id;
                self.try_take_full_snapshot();
            }
            return;
        }

        let now = self.now();
        let reason = reason.unwrap_or(SessionChangeReason {
            no_session_id: true,
            ..Default::default()
        });
        let previous_session_id = std::mem::replace(&mut self.session_id, session_id.clone());
        let previous_window_id = std::mem::replace(&mut self.window_id, window_id.clone());
        info!(
            "Session changed from {} to {} ({:?})",
            previous_session_id, session_id, reason
        );
        // a new session starts out active
        self.idle.reset(now);

        if reason.is_natural_rotation() {
            self.emit_marker(
                tags::SESSION_ENDING,
                json!({
                    "nextSessionId": session_id,
                    "nextWindowId": window_id,
                    "changeReason": reason,
                    "lastActivityTimestamp": last_activity,
                    "flushed_size": self.flushed_size.get(),
                    "sessionId": previous_session_id,
                    "windowId": previous_window_id,
                }),
            );
            self.flushed_size.reset();
        }

        // ship the old session while its start time and persisted state still apply
        self.flush_buffer(FlushMode::Scheduled);
        self.session_start_timestamp = session_start.unwrap_or(now);

        // the new session's sampling decision precedes its first marker
        for key in SESSION_SCOPED_KEYS {
            self.deps.persistence.unregister(key);
        }
        self.throttler.reset();
        if self.started {
            self.make_sampling_decision();
        }

        self.emit_marker(
            tags::SESSION_ID_CHANGE,
            json!({
                "sessionId": session_id,
                "windowId": window_id,
                "changeReason": reason,
            }),
        );

        if self.started {
            self.try_take_full_snapshot();
            self.schedule_full_snapshot(now);
        } else {
            self.start(StartReason::SessionIdChanged);
        }

        if reason.is_natural_rotation() {
            self.emit_marker(
                tags::SESSION_STARTING,
                json!({
                    "previousSessionId": previous_session_id,
                    "previousWindowId": previous_window_id,
                    "changeReason": reason,
                    "lastActivityTimestamp": last_activity,
                    "sessionId": session_id,
                    "windowId": window_id,
                }),
            );
        }
    }

    fn on_trigger_activated(&mut self, kind: TriggerKind) {
        info!(
            "{} trigger activated for session {}",
            kind.as_str(),
            self.session_id
        );
        self.persist_start_reason(StartReason::matched(kind));
        metrics::counter!("replay_triggers_activated_total", "trigger" => kind.as_str())
            .increment(1);

        self.emit_marker(tags::TRIGGER_ACTIVATED, json!({ "type": kind.as_str() }));
        self.flush_buffer(FlushMode::Scheduled);
        self.schedule_full_snapshot(self.now());
    }

    // ---------------------------------------------------------------------
    // Buffer & flush
    // ---------------------------------------------------------------------

    fn buffer_event(
        &mut self,
        event: RecorderEvent,
        session_id: String,
        window_id: String,
    ) -> Result<()> {
        let event_type = event.event_type;
        let timestamp = event.timestamp;
        let data = serde_json::to_value(&event)?;
        let size = estimate_size(&data);

        if !self.buffer.belongs_to(&session_id, &window_id) {
            if self.flush_buffer(FlushMode::Scheduled) == FlushOutcome::Held
                && !self.buffer.is_empty()
            {
                warn!(
                    "Discarding {} held events for session {}",
                    self.buffer.len(),
                    self.buffer.session_id
                );
                metrics::counter!("replay_events_dropped_total", "reason" => "session_mismatch")
                    .increment(self.buffer.len() as u64);
            }
            self.buffer = SnapshotBuffer::new(session_id, window_id);
        } else if !self.idle.is_idle() && self.buffer.would_overflow(size) {
            self.flush_buffer(FlushMode::Scheduled);
        }

        self.buffer.push(BufferedEvent {
            event_type,
            timestamp,
            size,
            data,
        });
        self.stats.events_buffered += 1;
        metrics::counter!("replay_events_buffered_total").increment(1);

        if !self.idle.is_idle() {
            let now = self.now();
            self.timers.arm_flush(now);
        }
        Ok(())
    }

    /// Flush the buffer now
    pub fn flush(&mut self) -> FlushOutcome {
        self.flush_buffer(FlushMode::Scheduled)
    }

    fn flush_buffer(&mut self, mode: FlushMode) -> FlushOutcome {
        let now = self.now();
        self.timers.clear_flush();

        let status = self.status_for(&self.buffer.session_id);
        if status.holds_flush() {
            debug!("Holding {} buffered events while {}", self.buffer.len(), status);
            self.timers.arm_flush(now);
            return FlushOutcome::Held;
        }
        if mode == FlushMode::Scheduled && self.below_minimum_duration() {
            debug!("Session below minimum duration, holding buffer");
            self.timers.arm_flush(now);
            return FlushOutcome::Held;
        }
        if self.buffer.is_empty() {
            return FlushOutcome::Empty;
        }

        let fresh = SnapshotBuffer::new(self.buffer.session_id.clone(), self.buffer.window_id.clone());
        let buffer = std::mem::replace(&mut self.buffer, fresh);
        let parts = split_buffer(buffer, SEVEN_MEGABYTES);
        let count = parts.len();
        for part in parts {
            self.ship(part);
        }

        self.stats.flushes += 1;
        metrics::counter!("replay_flushes_total").increment(1);
        FlushOutcome::Shipped(count)
    }

    fn below_minimum_duration(&self) -> bool {
        let Some(minimum) = self.minimum_duration_ms else {
            return false;
        };
        let duration = self
            .buffer
            .last_timestamp()
            .map(|ts| ts - self.session_start_timestamp);

        if !self.strict_minimum_duration {
            return matches!(duration, Some(d) if (0..minimum).contains(&d));
        }

        let store = self.deps.persistence.as_ref();
        let session_id = &self.buffer.session_id;
        if is_marked_for_session(store, MINIMUM_DURATION_PASSED_KEY, session_id) {
            return false;
        }

        let reached = duration.max(self.buffer.buffered_span());
        if reached.is_some_and(|d| d >= minimum) {
            register_one(
                store,
                MINIMUM_DURATION_PASSED_KEY,
                Value::String(session_id.clone()),
            );
            return false;
        }
        true
    }

    fn ship(&mut self, part: SnapshotBuffer) {
        let bytes = part.size;
        debug!(
            "Shipping {} events ({} bytes) for session {}",
            part.len(),
            bytes,
            part.session_id
        );

        let mut properties = Map::new();
        properties.insert("$snapshot_bytes".to_string(), json!(bytes));
        properties.insert(
            "$snapshot_data".to_string(),
            Value::Array(part.data.into_iter().map(|e| e.data).collect()),
        );
        properties.insert("$session_id".to_string(), Value::String(part.session_id));
        properties.insert("$window_id".to_string(), Value::String(part.window_id));

        self.deps.capture.capture(
            SNAPSHOT_EVENT,
            properties,
            &CaptureOptions::snapshot(&self.endpoint),
        );

        self.flushed_size.add(bytes);
        self.stats.payloads_sent += 1;
        self.stats.bytes_flushed += bytes as u64;
        metrics::counter!("replay_snapshot_bytes_total").increment(bytes as u64);
    }

    // ---------------------------------------------------------------------
    // Calls into the recorder library
    // ---------------------------------------------------------------------

    fn emit_marker(&mut self, tag: &str, payload: Value) {
        if !self.started {
            let now = self.now();
            self.retry_queue.push(
                SourceCall::CustomEvent {
                    tag: tag.to_string(),
                    payload,
                },
                now,
            );
            return;
        }

        match self.deps.source.add_custom_event(tag, payload.clone()) {
            Ok(event) => {
                self.stats.markers_emitted += 1;
                if let Err(e) = self.process_event(event) {
                    error!("Failed to process {:?} marker: {}", tag, e);
                }
            }
            Err(SourceError::NotReady(why)) => {
                debug!("Recorder not ready ({}), queueing {:?}", why, tag);
                let now = self.now();
                self.retry_queue.push(
                    SourceCall::CustomEvent {
                        tag: tag.to_string(),
                        payload,
                    },
                    now,
                );
            }
            Err(e) => warn!("Could not add {:?} marker: {}", tag, e),
        }
    }

    fn try_take_full_snapshot(&mut self) {
        if !self.started {
            return;
        }

        match self.deps.source.take_full_snapshot() {
            Ok(()) => self.stats.full_snapshots_requested += 1,
            Err(SourceError::NotReady(why)) => {
                debug!("Recorder not ready ({}), queueing full snapshot", why);
                let now = self.now();
                self.retry_queue.push(SourceCall::FullSnapshot, now);
            }
            Err(e) => warn!("Full snapshot failed: {}", e),
        }
    }

    fn drain_retry_queue(&mut self) {
        if self.retry_queue.is_empty() {
            return;
        }

        let now = self.now();
        for entry in self.retry_queue.drain_fresh(now) {
            let result = match &entry.call {
                SourceCall::FullSnapshot => self.deps.source.take_full_snapshot().map(|()| None),
                SourceCall::CustomEvent { tag, payload } => self
                    .deps
                    .source
                    .add_custom_event(tag, payload.clone())
                    .map(Some),
            };

            match result {
                Ok(Some(event)) => {
                    self.stats.markers_emitted += 1;
                    if let Err(e) = self.process_event(event) {
                        error!("Failed to process queued marker: {}", e);
                    }
                }
                Ok(None) => self.stats.full_snapshots_requested += 1,
                Err(SourceError::NotReady(_)) => self.retry_queue.requeue(entry),
                Err(e) => warn!("Dropping queued {:?}: {}", entry.call, e),
            }
        }
    }

    // ---------------------------------------------------------------------
    // Timers & host
    // ---------------------------------------------------------------------

    fn schedule_full_snapshot(&mut self, now: i64) {
        if !self.started || self.idle.is_idle() {
            self.timers.clear_full_snapshot();
            return;
        }

        let interval = if self.trigger_status() == TriggerStatus::TriggerPending {
            TRIGGER_PENDING_FULL_SNAPSHOT_INTERVAL_MS
        } else {
            self.options.full_snapshot_interval_ms
        };
        self.timers.schedule_full_snapshot(now, interval);
    }

    /// Fire any deadline that has passed
    pub fn poll_timers(&mut self) {
        let now = self.now();
        let due = self.timers.due(now);

        if due.flush {
            self.flush_buffer(FlushMode::Scheduled);
        }
        if due.full_snapshot {
            self.try_take_full_snapshot();
            self.schedule_full_snapshot(now);
        }
    }

    /// Deliver a host notification. Ignored unless its hook is held.
    pub fn handle_host_event(&mut self, event: HostEvent) {
        let kind = event.kind();
        let listening = match kind {
            HookKind::SessionId => self.session_listener.is_some(),
            _ => self.hooks.is_listening(kind),
        };
        if !listening {
            debug!("Ignoring {:?} notification, not subscribed", kind);
            return;
        }

        match event {
            HostEvent::BeforeUnload => {
                self.flush_buffer(FlushMode::Scheduled);
            }
            HostEvent::Offline => self.emit_marker(tags::BROWSER_OFFLINE, json!({})),
            HostEvent::Online => self.emit_marker(tags::BROWSER_ONLINE, json!({})),
            HostEvent::VisibilityChange { visible } => {
                let tag = if visible {
                    tags::WINDOW_VISIBLE
                } else {
                    tags::WINDOW_HIDDEN
                };
                self.emit_marker(tag, json!({}));
            }
            HostEvent::FeatureFlags { flags, variants } => {
                self.on_feature_flags(&flags, &variants)
            }
            HostEvent::EventCaptured {
                event_name,
                properties,
            } => self.on_event_captured(&event_name, &properties),
            HostEvent::SessionIdChanged {
                session_id,
                window_id,
                reason,
            } => {
                let last_activity = self.idle.last_activity_timestamp();
                self.on_session_change(session_id, window_id, reason, None, last_activity);
            }
        }
    }

    fn on_feature_flags(&mut self, flags: &[String], variants: &Map<String, Value>) {
        let session_id = self.session_id.clone();
        match self.linked_flag.on_feature_flags(flags, variants, &session_id) {
            LinkedFlagChange::BecameSeen => {
                self.try_take_full_snapshot();
                self.on_trigger_activated(TriggerKind::LinkedFlag);
            }
            LinkedFlagChange::BecameUnseen => {
                info!("Linked flag no longer enabled, buffering");
                self.schedule_full_snapshot(self.now());
            }
            LinkedFlagChange::Unchanged => {}
        }
    }

    fn on_event_captured(&mut self, event_name: &str, properties: &Map<String, Value>) {
        if event_name == tags::PAGEVIEW {
            let href = properties
                .get("$current_url")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| self.deps.host.current_url());
            if let Some(href) = href.and_then(|h| self.masker.mask_url(&h)) {
                self.emit_marker(tags::PAGEVIEW, json!({ "href": href }));
            }
        }

        let session_id = self.session_id.clone();
        if self.event_trigger.on_event_captured(event_name, &session_id) {
            self.on_trigger_activated(TriggerKind::Event);
        }
    }

    fn drop_event(&mut self, reason: &'static str) {
        self.stats.events_dropped += 1;
        metrics::counter!("replay_events_dropped_total", "reason" => reason).increment(1);
    }

    fn now(&self) -> i64 {
        self.deps.clock.now_millis()
    }
}

/// Recorder statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecorderStats {
    /// Raw events received from the recorder library
    pub events_received: u64,

    pub events_buffered: u64,

    /// Events dropped anywhere in the pipeline
    pub events_dropped: u64,

    /// Custom markers the engine emitted
    pub markers_emitted: u64,

    pub flushes: u64,

    /// `$snapshot` captures sent; a split flush sends several
    pub payloads_sent: u64,

    pub bytes_flushed: u64,

    pub full_snapshots_requested: u64,
}

impl RecorderStats {
    pub fn avg_payload_bytes(&self) -> u64 {
        if self.payloads_sent == 0 {
            0
        } else {
            self.bytes_flushed / self.payloads_sent
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::persistence::{PersistenceStore, EVENT_TRIGGER_ACTIVATED_KEY};
    use crate::recording::remote_config::{LinkedFlag, UrlTrigger};
    use crate::recording::testing::Harness;
    use crate::recording::transform::NetworkRequest;

    fn mouse(ts: i64) -> Value {
        json!({ "type": 3, "data": { "source": 1, "positions": [] }, "timestamp": ts })
    }

    fn mutation(ts: i64) -> Value {
        json!({
            "type": 3,
            "data": { "source": 0, "adds": [], "removes": [], "texts": [], "attributes": [] },
            "timestamp": ts
        })
    }

    fn meta(ts: i64, href: &str) -> Value {
        json!({ "type": 4, "data": { "href": href, "width": 800, "height": 600 }, "timestamp": ts })
    }

    fn full_snapshot(ts: i64) -> Value {
        json!({ "type": 2, "data": { "node": { "id": 1 }, "initialOffset": {} }, "timestamp": ts })
    }

    fn regex(url: &str) -> UrlTrigger {
        UrlTrigger {
            url: url.to_string(),
            matching: "regex".to_string(),
        }
    }

    fn started(config: SessionRecordingRemoteConfig) -> Harness {
        started_with(RecordingOptions::default(), config)
    }

    fn started_with(options: RecordingOptions, config: SessionRecordingRemoteConfig) -> Harness {
        let mut h = Harness::new(options);
        h.recorder.on_remote_config(RemoteConfig::enabled(config));
        assert!(h.recorder.is_started());
        h
    }

    fn emit(h: &mut Harness, raw: Value) {
        let ts = raw["timestamp"].as_i64().unwrap_or_default();
        h.clock.set(ts);
        h.recorder.on_rrweb_emit(raw);
    }

    #[test]
    fn test_engine_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<SessionRecorder>();
    }

    #[test]
    fn test_stop_when_never_started_is_safe() {
        let mut h = Harness::new(RecordingOptions::default());
        h.recorder.stop();
        h.recorder.stop();

        assert!(!h.recorder.is_started());
        assert_eq!(h.recorder.next_deadline(), None);
        assert_eq!(h.source.stop_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_releases_everything() {
        let mut h = started(SessionRecordingRemoteConfig::default());
        assert_eq!(h.host.active_listeners(), LIFECYCLE_HOOKS.len() + 1);
        emit(&mut h, mouse(10));
        assert!(h.recorder.next_deadline().is_some());

        h.recorder.stop();
        h.recorder.stop();

        assert!(!h.recorder.is_started());
        assert_eq!(h.host.active_listeners(), 0);
        assert_eq!(h.recorder.next_deadline(), None);
        assert_eq!(h.source.stop_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        // stop flushed what was buffered
        assert_eq!(h.capture.count(), 1);
    }

    #[test]
    fn test_start_requires_remote_config() {
        let mut h = Harness::new(RecordingOptions::default());
        h.recorder.start(StartReason::RecordingInitialized);

        assert!(!h.recorder.is_started());
        assert_eq!(h.recorder.status(), RecordingStatus::LazyLoading);
    }

    #[test]
    fn test_start_attaches_once() {
        let mut h = started(SessionRecordingRemoteConfig::default());
        h.recorder.on_remote_config(RemoteConfig::enabled(Default::default()));
        h.recorder.start(StartReason::RecordingInitialized);

        assert_eq!(h.source.record_calls.lock().len(), 1);
        assert_eq!(h.host.active_listeners(), LIFECYCLE_HOOKS.len() + 1);
        assert_eq!(h.recorder.session_id(), "s1");
        assert_eq!(h.recorder.endpoint(), DEFAULT_ENDPOINT);
        assert_eq!(
            h.store.get(START_REASON_KEY),
            Some(json!("recording_initialized"))
        );
    }

    #[test]
    fn test_stale_remote_config_not_trusted() {
        let mut h = Harness::new(RecordingOptions::default());
        persist_remote_config(
            h.store.as_ref(),
            &RemoteConfig::enabled(Default::default()),
            0,
        );
        h.clock.set(crate::recording::remote_config::REMOTE_CONFIG_TTL_MS + 1);

        h.recorder.start(StartReason::RecordingInitialized);
        assert!(!h.recorder.is_started());
    }

    #[test]
    fn test_client_disabled_never_starts() {
        let mut h = Harness::new(RecordingOptions {
            enabled: false,
            ..Default::default()
        });
        h.recorder.on_remote_config(RemoteConfig::enabled(Default::default()));
        assert!(!h.recorder.is_started());
        assert_eq!(h.recorder.status(), RecordingStatus::Disabled);
    }

    #[test]
    fn test_remote_disable_stops_recording() {
        let mut h = started(SessionRecordingRemoteConfig::default());
        h.recorder.on_remote_config(RemoteConfig::disabled());

        assert!(!h.recorder.is_started());
        assert_eq!(h.recorder.status(), RecordingStatus::Disabled);
    }

    #[test]
    fn test_sample_rate_zero_never_captures() {
        let mut h = started(SessionRecordingRemoteConfig {
            sample_rate: Some("0.00".to_string()),
            ..Default::default()
        });
        assert_eq!(h.recorder.status(), RecordingStatus::Disabled);
        assert_eq!(h.store.get(IS_SAMPLED_KEY), Some(json!(false)));

        for ts in [10, 20, 30] {
            emit(&mut h, mouse(ts));
        }
        h.recorder.flush();
        h.clock.set(10_000);
        h.recorder.poll_timers();

        assert_eq!(h.capture.count(), 0);
        assert!(h.recorder.buffer().is_empty());
    }

    #[test]
    fn test_sample_rate_one_ships_all_buffered_events() {
        let mut h = started(SessionRecordingRemoteConfig {
            sample_rate: Some("1.00".to_string()),
            ..Default::default()
        });
        assert_eq!(h.recorder.status(), RecordingStatus::Sampled);
        assert_eq!(h.store.get(IS_SAMPLED_KEY), Some(json!("s1")));

        emit(&mut h, mouse(10));
        emit(&mut h, mouse(20));
        assert_eq!(h.recorder.flush(), FlushOutcome::Shipped(1));

        let captured = h.capture.events();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].name, SNAPSHOT_EVENT);
        assert_eq!(captured[0].session_id(), "s1");
        assert_eq!(captured[0].options.batch_key, "recordings");
        assert!(captured[0].options.no_truncate);
        // sampling marker plus both events
        assert_eq!(captured[0].snapshot_data().len(), 3);
        assert_eq!(captured[0].marker_tags(), vec![tags::SAMPLING_DECISION]);
    }

    #[test]
    fn test_client_sample_rate_overrides_remote() {
        let h = started_with(
            RecordingOptions {
                sample_rate: Some(0.0),
                ..Default::default()
            },
            SessionRecordingRemoteConfig {
                sample_rate: Some("1.00".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(h.recorder.status(), RecordingStatus::Disabled);
    }

    #[test]
    fn test_linked_flag_toggles_status() {
        let mut h = started(SessionRecordingRemoteConfig {
            linked_flag: Some(LinkedFlag::Key("k".to_string())),
            ..Default::default()
        });
        assert_eq!(h.recorder.status(), RecordingStatus::Buffering);
        let snapshots_before = h.source.full_snapshot_count();

        let mut variants = Map::new();
        variants.insert("k".to_string(), json!(true));
        h.recorder.handle_host_event(HostEvent::FeatureFlags {
            flags: vec!["k".to_string()],
            variants,
        });

        assert_eq!(h.recorder.status(), RecordingStatus::Active);
        assert_eq!(h.source.full_snapshot_count(), snapshots_before + 1);

        h.recorder.handle_host_event(HostEvent::FeatureFlags {
            flags: vec![],
            variants: Map::new(),
        });
        assert_eq!(h.recorder.status(), RecordingStatus::Buffering);
    }

    fn two_trigger_config(match_type: TriggerMatchType) -> SessionRecordingRemoteConfig {
        SessionRecordingRemoteConfig {
            url_triggers: vec![regex("/checkout")],
            event_triggers: vec!["purchase".to_string()],
            trigger_match_type: Some(match_type),
            ..Default::default()
        }
    }

    fn capture_event(h: &mut Harness, name: &str) {
        h.recorder.handle_host_event(HostEvent::EventCaptured {
            event_name: name.to_string(),
            properties: Map::new(),
        });
    }

    #[test]
    fn test_all_triggers_must_fire() {
        let mut h = started(two_trigger_config(TriggerMatchType::All));
        assert_eq!(h.recorder.status(), RecordingStatus::Buffering);

        capture_event(&mut h, "purchase");
        assert_eq!(h.recorder.status(), RecordingStatus::Buffering);

        h.host.set_url("https://shop.test/checkout");
        emit(&mut h, mouse(10));
        assert_eq!(h.recorder.status(), RecordingStatus::Active);
    }

    #[test]
    fn test_any_trigger_is_enough() {
        let mut h = started(two_trigger_config(TriggerMatchType::Any));
        assert_eq!(h.recorder.status(), RecordingStatus::Buffering);

        capture_event(&mut h, "purchase");
        assert_eq!(h.recorder.status(), RecordingStatus::Active);
        assert_eq!(h.store.get(EVENT_TRIGGER_ACTIVATED_KEY), Some(json!("s1")));
        assert_eq!(
            h.store.get(START_REASON_KEY),
            Some(json!("event_trigger_matched"))
        );
    }

    #[test]
    fn test_trigger_activation_ships_buffered_events() {
        let mut h = started(SessionRecordingRemoteConfig {
            event_triggers: vec!["purchase".to_string()],
            ..Default::default()
        });
        emit(&mut h, mouse(10));
        assert_eq!(h.recorder.flush(), FlushOutcome::Held);
        assert_eq!(h.capture.count(), 0);

        h.clock.set(20);
        capture_event(&mut h, "purchase");

        assert_eq!(h.capture.count(), 1);
        assert_eq!(h.capture.events()[0].marker_tags(), vec![tags::TRIGGER_ACTIVATED]);
    }

    #[test]
    fn test_lenient_minimum_duration() {
        let mut h = started(SessionRecordingRemoteConfig {
            minimum_duration_milliseconds: Some(1500),
            ..Default::default()
        });

        emit(&mut h, mouse(100));
        assert_eq!(h.recorder.flush(), FlushOutcome::Held);
        assert_eq!(h.capture.count(), 0);

        emit(&mut h, mouse(1501));
        assert_eq!(h.recorder.flush(), FlushOutcome::Shipped(1));
        assert_eq!(h.capture.events()[0].snapshot_data().len(), 2);

        // duration tracking restarts with the next event
        assert_eq!(h.recorder.buffer().last_timestamp(), None);
        assert_eq!(h.recorder.flush(), FlushOutcome::Empty);
    }

    #[test]
    fn test_strict_minimum_duration_persists_marker() {
        let mut h = started(SessionRecordingRemoteConfig {
            minimum_duration_milliseconds: Some(1500),
            strict_minimum_duration: Some(true),
            ..Default::default()
        });

        emit(&mut h, mouse(100));
        assert_eq!(h.recorder.flush(), FlushOutcome::Held);
        assert_eq!(h.store.get(MINIMUM_DURATION_PASSED_KEY), None);

        emit(&mut h, mouse(1600));
        assert_eq!(h.recorder.flush(), FlushOutcome::Shipped(1));
        assert_eq!(h.store.get(MINIMUM_DURATION_PASSED_KEY), Some(json!("s1")));
    }

    #[test]
    fn test_flush_timer_fires_through_poll() {
        let mut h = started(SessionRecordingRemoteConfig::default());
        emit(&mut h, mouse(0));

        h.clock.set(1999);
        h.recorder.poll_timers();
        assert_eq!(h.capture.count(), 0);

        h.clock.set(2000);
        h.recorder.poll_timers();
        assert_eq!(h.capture.count(), 1);
        assert!(!h.recorder.timers().flush_armed());
    }

    #[test]
    fn test_idle_suppression() {
        let mut h = started_with(
            RecordingOptions {
                session_idle_threshold_ms: 1000,
                ..Default::default()
            },
            SessionRecordingRemoteConfig::default(),
        );

        emit(&mut h, mouse(0));
        emit(&mut h, mutation(1001));

        // idle flush carries the pre-idle event and the idle marker
        assert_eq!(h.capture.count(), 1);
        let idle_payload = &h.capture.events()[0];
        assert_eq!(idle_payload.marker_tags(), vec![tags::SESSION_IDLE]);
        assert_eq!(idle_payload.snapshot_data().len(), 2);
        assert!(!h.recorder.timers().full_snapshot_scheduled());

        emit(&mut h, mutation(1500));
        emit(&mut h, mutation(3000));
        h.clock.set(60_000);
        h.recorder.poll_timers();
        h.recorder.flush();
        assert_eq!(h.capture.count(), 1);

        let snapshots_before = h.source.full_snapshot_count();
        emit(&mut h, mouse(61_000));
        assert_eq!(h.source.full_snapshot_count(), snapshots_before + 1);
        h.recorder.flush();

        assert_eq!(h.capture.count(), 2);
        let resumed = &h.capture.events()[1];
        assert_eq!(resumed.marker_tags(), vec![tags::SESSION_NO_LONGER_IDLE]);
        assert_eq!(resumed.snapshot_data().len(), 2);
        assert_eq!(
            h.capture
                .all_markers()
                .iter()
                .filter(|t| *t == tags::SESSION_IDLE)
                .count(),
            1
        );
    }

    #[test]
    fn test_idle_marker_timestamp_corrected() {
        let mut h = started_with(
            RecordingOptions {
                session_idle_threshold_ms: 1000,
                ..Default::default()
            },
            SessionRecordingRemoteConfig::default(),
        );
        emit(&mut h, mouse(500));
        emit(&mut h, mutation(5000));

        let data = h.capture.events()[0].snapshot_data();
        let marker = data.iter().find(|e| e["data"]["tag"] == tags::SESSION_IDLE).unwrap();
        assert_eq!(marker["timestamp"], json!(500));
        assert_eq!(marker["data"]["payload"]["eventTimestamp"], json!(5000));
    }

    #[test]
    fn test_natural_rotation_markers_and_attribution() {
        let mut h = started(SessionRecordingRemoteConfig::default());
        emit(&mut h, mouse(10));
        emit(&mut h, mutation(20));

        h.sessions.rotate(
            "s2",
            "w2",
            30,
            SessionChangeReason {
                activity_timeout: true,
                ..Default::default()
            },
        );
        emit(&mut h, mouse(30));
        h.recorder.flush();

        let captured = h.capture.events();
        assert_eq!(captured.len(), 2);

        assert_eq!(captured[0].session_id(), "s1");
        assert_eq!(captured[0].marker_tags(), vec![tags::SESSION_ENDING]);
        assert_eq!(captured[0].snapshot_data().len(), 3);
        let ending = captured[0].snapshot_data()[2].clone();
        assert_eq!(ending["data"]["payload"]["nextSessionId"], json!("s2"));
        assert_eq!(ending["timestamp"], json!(10));

        assert_eq!(captured[1].session_id(), "s2");
        assert_eq!(
            captured[1].marker_tags(),
            vec![tags::SESSION_ID_CHANGE, tags::SESSION_STARTING]
        );
        let starting = &captured[1].snapshot_data()[1];
        assert_eq!(starting["data"]["payload"]["previousSessionId"], json!("s1"));

        assert_eq!(h.recorder.session_id(), "s2");
    }

    #[test]
    fn test_every_payload_matches_its_session() {
        let mut h = started(SessionRecordingRemoteConfig::default());
        let rotation = SessionChangeReason {
            activity_timeout: true,
            ..Default::default()
        };

        let mut ts = 0;
        for round in 0..4 {
            for _ in 0..3 {
                ts += 10;
                emit(&mut h, mouse(ts));
            }
            let next = format!("s{}", round + 2);
            h.sessions.rotate(&next, &format!("w{}", round + 2), ts, rotation);
        }
        ts += 10;
        emit(&mut h, mouse(ts));
        h.recorder.flush();

        for payload in h.capture.events() {
            for event in payload.snapshot_data() {
                if let Some(target) = event["data"]["payload"]["sessionId"].as_str() {
                    assert_eq!(target, payload.session_id());
                }
            }
        }
        let sessions: Vec<String> = h
            .capture
            .events()
            .iter()
            .map(|p| p.session_id().to_string())
            .collect();
        assert_eq!(sessions.first().map(String::as_str), Some("s1"));
        assert_eq!(sessions.last().map(String::as_str), Some("s5"));
    }

    #[test]
    fn test_reset_rotation_skips_linking_markers() {
        let mut h = started(SessionRecordingRemoteConfig::default());
        emit(&mut h, mouse(10));

        let reset = SessionChangeReason {
            no_session_id: true,
            ..Default::default()
        };
        h.sessions.rotate("s2", "w2", 10, reset);
        h.recorder.handle_host_event(HostEvent::SessionIdChanged {
            session_id: "s2".to_string(),
            window_id: "w2".to_string(),
            reason: Some(reset),
        });
        h.recorder.flush();

        let markers = h.capture.all_markers();
        assert_eq!(markers, vec![tags::SESSION_ID_CHANGE]);
        assert_eq!(h.recorder.session_id(), "s2");
    }

    #[test]
    fn test_rotation_clears_session_scoped_state() {
        let mut h = started(SessionRecordingRemoteConfig {
            event_triggers: vec!["purchase".to_string()],
            ..Default::default()
        });
        capture_event(&mut h, "purchase");
        assert_eq!(h.recorder.status(), RecordingStatus::Active);

        let expired = SessionChangeReason {
            session_past_maximum_length: true,
            ..Default::default()
        };
        h.sessions.rotate("s2", "w2", 0, expired);
        h.recorder.handle_host_event(HostEvent::SessionIdChanged {
            session_id: "s2".to_string(),
            window_id: "w2".to_string(),
            reason: Some(expired),
        });

        assert_eq!(h.store.get(EVENT_TRIGGER_ACTIVATED_KEY), None);
        assert_eq!(h.recorder.status(), RecordingStatus::Buffering);
    }

    #[test]
    fn test_sampled_rotation_keeps_id_change_marker() {
        let mut h = started(SessionRecordingRemoteConfig {
            sample_rate: Some("1.00".to_string()),
            ..Default::default()
        });
        emit(&mut h, mouse(10));

        h.sessions.rotate(
            "s2",
            "w2",
            20,
            SessionChangeReason {
                activity_timeout: true,
                ..Default::default()
            },
        );
        emit(&mut h, mouse(20));
        h.recorder.flush();

        assert_eq!(
            h.capture.all_markers(),
            vec![
                tags::SAMPLING_DECISION,
                tags::SESSION_ENDING,
                tags::SAMPLING_DECISION,
                tags::SESSION_ID_CHANGE,
                tags::SESSION_STARTING,
            ]
        );
        assert_eq!(h.store.get(IS_SAMPLED_KEY), Some(json!("s2")));
    }

    #[test]
    fn test_sampled_reset_rotation_ships_id_change() {
        let mut h = started(SessionRecordingRemoteConfig {
            sample_rate: Some("1.00".to_string()),
            ..Default::default()
        });
        emit(&mut h, mouse(10));

        let reset = SessionChangeReason {
            no_session_id: true,
            ..Default::default()
        };
        h.sessions.rotate("s2", "w2", 10, reset);
        h.recorder.handle_host_event(HostEvent::SessionIdChanged {
            session_id: "s2".to_string(),
            window_id: "w2".to_string(),
            reason: Some(reset),
        });
        h.recorder.flush();

        let captured = h.capture.events();
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[1].session_id(), "s2");
        assert_eq!(
            captured[1].marker_tags(),
            vec![tags::SAMPLING_DECISION, tags::SESSION_ID_CHANGE]
        );
    }

    #[test]
    fn test_rotation_after_idle_keeps_old_last_activity() {
        let mut h = started_with(
            RecordingOptions {
                session_idle_threshold_ms: 1000,
                ..Default::default()
            },
            SessionRecordingRemoteConfig::default(),
        );
        emit(&mut h, mouse(500));
        emit(&mut h, mutation(5000));

        h.sessions.rotate(
            "s2",
            "w2",
            100_000,
            SessionChangeReason {
                activity_timeout: true,
                ..Default::default()
            },
        );
        emit(&mut h, mouse(100_000));
        h.recorder.flush();

        let captured = h.capture.events();
        let ending = captured
            .iter()
            .flat_map(|p| p.snapshot_data())
            .find(|e| e["data"]["tag"] == tags::SESSION_ENDING)
            .unwrap();
        assert_eq!(ending["timestamp"], json!(500));
        assert_eq!(ending["data"]["payload"]["lastActivityTimestamp"], json!(500));

        // waking up is part of the new session, not a late event of the old one
        assert_eq!(
            h.capture.all_markers(),
            vec![
                tags::SESSION_IDLE,
                tags::SESSION_ENDING,
                tags::SESSION_ID_CHANGE,
                tags::SESSION_STARTING,
            ]
        );
        assert_eq!(captured.last().unwrap().session_id(), "s2");
        assert!(!h.recorder.timers().flush_armed());
    }

    #[test]
    fn test_strict_minimum_duration_with_skewed_session_start() {
        let mut h = started(SessionRecordingRemoteConfig {
            minimum_duration_milliseconds: Some(1500),
            strict_minimum_duration: Some(true),
            ..Default::default()
        });

        // session start reported after the events' own clock
        h.sessions.rotate(
            "s2",
            "w2",
            10_000,
            SessionChangeReason {
                no_session_id: true,
                ..Default::default()
            },
        );
        emit(&mut h, mouse(100));
        assert_eq!(h.recorder.flush(), FlushOutcome::Held);

        emit(&mut h, mouse(1000));
        assert_eq!(h.recorder.flush(), FlushOutcome::Held);
        assert_eq!(h.store.get(MINIMUM_DURATION_PASSED_KEY), None);

        emit(&mut h, mouse(1600));
        assert_eq!(h.recorder.flush(), FlushOutcome::Shipped(1));
        assert_eq!(h.store.get(MINIMUM_DURATION_PASSED_KEY), Some(json!("s2")));

        emit(&mut h, mouse(1700));
        assert_eq!(h.recorder.flush(), FlushOutcome::Shipped(1));
    }

    #[test]
    fn test_lenient_minimum_duration_ships_negative_duration() {
        let mut h = started(SessionRecordingRemoteConfig {
            minimum_duration_milliseconds: Some(1500),
            ..Default::default()
        });

        h.sessions.rotate(
            "s2",
            "w2",
            10_000,
            SessionChangeReason {
                no_session_id: true,
                ..Default::default()
            },
        );
        emit(&mut h, mouse(100));

        assert_eq!(h.recorder.flush(), FlushOutcome::Shipped(1));
        let captured = h.capture.events();
        assert_eq!(captured[0].session_id(), "s2");
        assert_eq!(captured[0].snapshot_data().len(), 2);
    }

    #[test]
    fn test_duplicate_session_notification_ignored() {
        let mut h = started(SessionRecordingRemoteConfig::default());
        let markers_before = h.source.custom_events.lock().len();

        h.recorder.handle_host_event(HostEvent::SessionIdChanged {
            session_id: "s1".to_string(),
            window_id: "w1".to_string(),
            reason: None,
        });

        assert_eq!(h.source.custom_events.lock().len(), markers_before);
    }

    #[test]
    fn test_window_change_requests_full_snapshot() {
        let mut h = started(SessionRecordingRemoteConfig::default());
        emit(&mut h, mouse(10));
        let snapshots_before = h.source.full_snapshot_count();

        h.sessions.rotate("s1", "w2", 0, SessionChangeReason::default());
        emit(&mut h, mouse(20));
        h.recorder.flush();

        assert_eq!(h.source.full_snapshot_count(), snapshots_before + 1);
        let captured = h.capture.events();
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[0].properties["$window_id"], json!("w1"));
        assert_eq!(captured[1].properties["$window_id"], json!("w2"));
    }

    #[test]
    fn test_url_blocklist_pauses_and_resumes() {
        let mut h = started(SessionRecordingRemoteConfig {
            url_blocklist: vec![regex("/admin")],
            ..Default::default()
        });

        h.host.set_url("https://app.test/admin/users");
        emit(&mut h, mouse(10));
        emit(&mut h, mouse(15));
        assert_eq!(h.recorder.status(), RecordingStatus::Paused);
        assert_eq!(h.recorder.flush(), FlushOutcome::Held);

        let snapshots_before = h.source.full_snapshot_count();
        h.host.set_url("https://app.test/home");
        emit(&mut h, mouse(20));
        assert_eq!(h.source.full_snapshot_count(), snapshots_before + 1);
        h.recorder.flush();

        let captured = h.capture.events();
        assert_eq!(captured.len(), 1);
        assert_eq!(
            captured[0].marker_tags(),
            vec![tags::RECORDING_PAUSED, tags::RECORDING_RESUMED]
        );
        // blocked events never made it in
        assert_eq!(captured[0].snapshot_data().len(), 3);
    }

    #[test]
    fn test_url_trigger_activates_on_navigation() {
        let mut h = started(SessionRecordingRemoteConfig {
            url_triggers: vec![regex("/checkout")],
            ..Default::default()
        });
        assert_eq!(h.recorder.timers().full_snapshot_interval_ms(), Some(60_000));

        h.host.set_url("https://shop.test/checkout");
        emit(&mut h, mouse(10));

        assert_eq!(h.recorder.status(), RecordingStatus::Active);
        assert_eq!(
            h.recorder.timers().full_snapshot_interval_ms(),
            Some(RecordingOptions::default().full_snapshot_interval_ms)
        );
    }

    #[test]
    fn test_full_snapshot_trims_buffer_while_pending() {
        let mut h = started(SessionRecordingRemoteConfig {
            event_triggers: vec!["purchase".to_string()],
            ..Default::default()
        });

        emit(&mut h, meta(10, "https://a.test/one"));
        emit(&mut h, mouse(20));
        emit(&mut h, meta(30, "https://a.test/two"));
        emit(&mut h, full_snapshot(31));

        let buffer = h.recorder.buffer();
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.data[0].event_type, EventType::Meta);
        assert_eq!(buffer.data[1].event_type, EventType::FullSnapshot);
        assert_eq!(h.recorder.last_href(), Some("https://a.test/two"));
    }

    #[test]
    fn test_meta_href_masked() {
        let mut h = started(SessionRecordingRemoteConfig::default());
        h.recorder.set_url_masker(UrlMasker::new().with_mask_fn(Arc::new(
            |request: NetworkRequest| -> anyhow::Result<Option<NetworkRequest>> {
                Ok(Some(NetworkRequest {
                    url: request.url.replace("token=abc", "token=***"),
                }))
            },
        )));

        emit(&mut h, meta(10, "https://a.test/?token=abc"));
        assert_eq!(h.recorder.last_href(), Some("https://a.test/?token=***"));
        assert_eq!(
            h.recorder.buffer().data[0].data["data"]["href"],
            json!("https://a.test/?token=***")
        );
    }

    #[test]
    fn test_meta_dropped_when_masked_away() {
        let mut h = started(SessionRecordingRemoteConfig::default());
        h.recorder.set_url_masker(UrlMasker::new().with_mask_fn(Arc::new(
            |_request: NetworkRequest| -> anyhow::Result<Option<NetworkRequest>> { Ok(None) },
        )));

        emit(&mut h, meta(10, "https://a.test/private"));
        assert!(h.recorder.buffer().is_empty());
        assert_eq!(h.recorder.stats().events_dropped, 1);
    }

    #[test]
    fn test_url_changed_marker_without_pageview_capture() {
        let mut h = started_with(
            RecordingOptions {
                capture_pageview: false,
                ..Default::default()
            },
            SessionRecordingRemoteConfig::default(),
        );
        h.host.set_url("https://a.test/one");
        emit(&mut h, mouse(10));
        emit(&mut h, mouse(20));
        h.host.set_url("https://a.test/two");
        emit(&mut h, mouse(30));
        h.recorder.flush();

        assert_eq!(
            h.capture.all_markers(),
            vec![tags::URL_CHANGED, tags::URL_CHANGED]
        );
    }

    #[test]
    fn test_host_markers() {
        let mut h = started(SessionRecordingRemoteConfig::default());
        h.recorder.handle_host_event(HostEvent::Offline);
        h.recorder.handle_host_event(HostEvent::Online);
        h.recorder
            .handle_host_event(HostEvent::VisibilityChange { visible: false });
        h.recorder
            .handle_host_event(HostEvent::VisibilityChange { visible: true });

        let mut properties = Map::new();
        properties.insert("$current_url".to_string(), json!("https://a.test/page"));
        h.recorder.handle_host_event(HostEvent::EventCaptured {
            event_name: "$pageview".to_string(),
            properties,
        });

        h.recorder.handle_host_event(HostEvent::BeforeUnload);
        assert_eq!(
            h.capture.all_markers(),
            vec![
                tags::BROWSER_OFFLINE,
                tags::BROWSER_ONLINE,
                tags::WINDOW_HIDDEN,
                tags::WINDOW_VISIBLE,
                tags::PAGEVIEW
            ]
        );
    }

    #[test]
    fn test_host_events_ignored_when_not_listening() {
        let mut h = Harness::new(RecordingOptions::default());
        h.recorder.handle_host_event(HostEvent::Offline);
        h.recorder.handle_host_event(HostEvent::SessionIdChanged {
            session_id: "s9".to_string(),
            window_id: "w9".to_string(),
            reason: None,
        });

        assert!(h.source.custom_events.lock().is_empty());
        assert_eq!(h.recorder.session_id(), "");
    }

    #[test]
    fn test_retry_queue_replays_markers() {
        let mut h = Harness::new(RecordingOptions::default());
        h.source.set_ready(false);
        h.recorder.on_remote_config(RemoteConfig::enabled(SessionRecordingRemoteConfig {
            sample_rate: Some("1.00".to_string()),
            ..Default::default()
        }));
        assert_eq!(h.recorder.retry_queue_stats().current_size, 1);

        h.source.set_ready(true);
        emit(&mut h, mouse(100));
        h.recorder.flush();

        let captured = h.capture.events();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].marker_tags(), vec![tags::SAMPLING_DECISION]);
        assert_eq!(h.recorder.retry_queue_stats().current_size, 0);
    }

    #[test]
    fn test_retry_queue_drops_expired_calls() {
        let mut h = Harness::new(RecordingOptions::default());
        h.source.set_ready(false);
        h.recorder.on_remote_config(RemoteConfig::enabled(SessionRecordingRemoteConfig {
            sample_rate: Some("1.00".to_string()),
            ..Default::default()
        }));

        h.source.set_ready(true);
        emit(&mut h, mouse(3000));
        h.recorder.flush();

        assert!(h.capture.all_markers().is_empty());
        assert_eq!(h.recorder.retry_queue_stats().expired_count, 1);
    }

    #[test]
    fn test_malformed_event_dropped() {
        let mut h = started(SessionRecordingRemoteConfig::default());
        h.recorder.on_rrweb_emit(json!("not an event"));
        h.recorder.on_rrweb_emit(json!({ "type": 3 }));

        assert!(h.recorder.buffer().is_empty());
        assert_eq!(h.recorder.stats().events_dropped, 2);
    }

    #[test]
    fn test_buffer_overflow_forces_flush() {
        let mut h = started(SessionRecordingRemoteConfig::default());
        let big = "x".repeat(500_000);
        emit(
            &mut h,
            json!({ "type": 6, "data": { "plugin": "a", "payload": big }, "timestamp": 10 }),
        );
        emit(
            &mut h,
            json!({ "type": 6, "data": { "plugin": "b", "payload": big }, "timestamp": 20 }),
        );

        assert_eq!(h.capture.count(), 1);
        assert_eq!(h.capture.events()[0].snapshot_data().len(), 1);
        assert_eq!(h.recorder.buffer().len(), 1);
    }

    #[test]
    fn test_pending_override_applied_on_start() {
        let mut h = Harness::new(RecordingOptions::default());
        h.recorder.override_sampling();
        assert!(!h.recorder.is_started());

        h.recorder.on_remote_config(RemoteConfig::enabled(SessionRecordingRemoteConfig {
            sample_rate: Some("0.00".to_string()),
            ..Default::default()
        }));

        assert_eq!(h.recorder.status(), RecordingStatus::Sampled);
        assert_eq!(h.store.get(IS_SAMPLED_KEY), Some(json!("s1")));
    }

    #[test]
    fn test_trigger_override_while_started() {
        let mut h = started(SessionRecordingRemoteConfig {
            url_triggers: vec![regex("/never")],
            ..Default::default()
        });
        assert_eq!(h.recorder.status(), RecordingStatus::Buffering);

        h.recorder.override_trigger(TriggerKind::Url);
        assert_eq!(h.recorder.status(), RecordingStatus::Active);
        assert_eq!(
            h.store.get(START_REASON_KEY),
            Some(json!("url_trigger_overridden"))
        );
    }

    #[test]
    fn test_rate_limited_marker() {
        let mut options = RecordingOptions::default();
        options.mutation_throttling.bucket_size = 2;
        let mut h = started_with(options, SessionRecordingRemoteConfig::default());

        emit(
            &mut h,
            json!({
                "type": 3,
                "data": {
                    "source": 0,
                    "attributes": [
                        { "id": 5, "attributes": {} },
                        { "id": 5, "attributes": {} },
                        { "id": 5, "attributes": {} }
                    ]
                },
                "timestamp": 10
            }),
        );

        assert!(h
            .source
            .custom_events
            .lock()
            .contains(&tags::RATE_LIMITED.to_string()));
        h.recorder.flush();
        assert_eq!(h.capture.all_markers(), vec![tags::RATE_LIMITED]);
    }

    #[test]
    fn test_periodic_full_snapshot() {
        let mut h = started(SessionRecordingRemoteConfig::default());
        let before = h.source.full_snapshot_count();

        h.clock.set(RecordingOptions::default().full_snapshot_interval_ms);
        h.recorder.poll_timers();

        assert_eq!(h.source.full_snapshot_count(), before + 1);
        assert!(h.recorder.timers().full_snapshot_scheduled());
    }
}
