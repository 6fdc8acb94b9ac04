// src/runtime/driver.rs
//! Tokio task that owns a `SessionRecorder`

use crate::recording::hooks::HostEvent;
use crate::recording::recorder::{FlushOutcome, RecorderStats, SessionRecorder, StartReason};
use crate::recording::remote_config::RemoteConfig;
use crate::recording::status::RecordingStatus;
use crate::utils::errors::{RecorderError, Result};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How often deadlines are checked
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

const CHANNEL_CAPACITY: usize = 1024;

/// Everything the driver task can be asked to do
#[derive(Debug)]
pub enum EngineInput {
    Emit(Value),
    Host(HostEvent),
    RemoteConfig(RemoteConfig),
    Start(StartReason),
    Stop,
    Flush(oneshot::Sender<FlushOutcome>),
    Status(oneshot::Sender<RecordingStatus>),
    Stats(oneshot::Sender<RecorderStats>),
}

/// Handle to a running engine task
pub struct RecorderDriver {
    tx: mpsc::Sender<EngineInput>,
    handle: Option<JoinHandle<SessionRecorder>>,
}

impl RecorderDriver {
    /// Move `engine` onto a new task, polling timers every `tick`
    pub fn spawn(engine: SessionRecorder, tick: Duration) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = tokio::spawn(run(engine, rx, tick));

        info!("Recorder driver started (tick {:?})", tick);
        Self {
            tx,
            handle: Some(handle),
        }
    }

    async fn send(&self, input: EngineInput) -> Result<()> {
        self.tx
            .send(input)
            .await
            .map_err(|_| RecorderError::DriverClosed)
    }

    /// Forward a raw recorder library event
    pub async fn emit(&self, raw: Value) -> Result<()> {
        self.send(EngineInput::Emit(raw)).await
    }

    pub async fn host_event(&self, event: HostEvent) -> Result<()> {
        self.send(EngineInput::Host(event)).await
    }

    pub async fn remote_config(&self, config: RemoteConfig) -> Result<()> {
        self.send(EngineInput::RemoteConfig(config)).await
    }

    pub async fn start(&self, reason: StartReason) -> Result<()> {
        self.send(EngineInput::Start(reason)).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(EngineInput::Stop).await
    }

    /// Flush and wait for the outcome
    pub async fn flush(&self) -> Result<FlushOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineInput::Flush(reply)).await?;
        rx.await.map_err(|_| RecorderError::DriverClosed)
    }

    pub async fn status(&self) -> Result<RecordingStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineInput::Status(reply)).await?;
        rx.await.map_err(|_| RecorderError::DriverClosed)
    }

    pub async fn stats(&self) -> Result<RecorderStats> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineInput::Stats(reply)).await?;
        rx.await.map_err(|_| RecorderError::DriverClosed)
    }

    /// Stop recording, end the task and hand the engine back
    pub async fn shutdown(mut self) -> Result<SessionRecorder> {
        info!("Shutting down recorder driver");

        self.send(EngineInput::Stop).await?;
        let handle = self.handle.take().ok_or(RecorderError::DriverClosed)?;
        drop(self);

        handle.await.map_err(|e| {
            warn!("Recorder task failed: {}", e);
            RecorderError::DriverClosed
        })
    }
}

impl Drop for RecorderDriver {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            debug!("Recorder driver dropped without shutdown");
            handle.abort();
        }
    }
}

async fn run(
    mut engine: SessionRecorder,
    mut rx: mpsc::Receiver<EngineInput>,
    tick: Duration,
) -> SessionRecorder {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => engine.poll_timers(),

            input = rx.recv() => match input {
                Some(input) => apply(&mut engine, input),
                None => break,
            },
        }
    }

    debug!("Recorder driver channel closed");
    engine
}

fn apply(engine: &mut SessionRecorder, input: EngineInput) {
    match input {
        EngineInput::Emit(raw) => engine.on_rrweb_emit(raw),
        EngineInput::Host(event) => engine.handle_host_event(event),
        EngineInput::RemoteConfig(config) => engine.on_remote_config(config),
        EngineInput::Start(reason) => engine.start(reason),
        EngineInput::Stop => engine.stop(),
        EngineInput::Flush(reply) => {
            let _ = reply.send(engine.flush());
        }
        EngineInput::Status(reply) => {
            let _ = reply.send(engine.status());
        }
        EngineInput::Stats(reply) => {
            let _ = reply.send(engine.stats());
        }
    }
}
