// src/recording/timers.rs
//! Engine-owned deadlines
//!
//! Nothing here sleeps. The driver calls `SessionRecorder::poll_timers`
//! and whatever deadline has passed fires.

use crate::recording::buffer::RECORDING_BUFFER_TIMEOUT_MS;

/// Source of epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Deadlines that have passed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DueTimers {
    pub flush: bool,
    pub full_snapshot: bool,
}

#[derive(Debug, Default, Clone)]
pub struct Timers {
    flush_at: Option<i64>,
    full_snapshot_at: Option<i64>,
    full_snapshot_interval_ms: i64,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the debounce flush unless already armed
    pub fn arm_flush(&mut self, now: i64) {
        if self.flush_at.is_none() {
            self.flush_at = Some(now + RECORDING_BUFFER_TIMEOUT_MS);
        }
    }

    pub fn flush_armed(&self) -> bool {
        self.flush_at.is_some()
    }

    pub fn clear_flush(&mut self) {
        self.flush_at = None;
    }

    /// Periodic full snapshot every `interval_ms` starting from `now`
    pub fn schedule_full_snapshot(&mut self, now: i64, interval_ms: i64) {
        self.full_snapshot_interval_ms = interval_ms;
        self.full_snapshot_at = Some(now + interval_ms);
    }

    pub fn full_snapshot_scheduled(&self) -> bool {
        self.full_snapshot_at.is_some()
    }

    pub fn full_snapshot_interval_ms(&self) -> Option<i64> {
        self.full_snapshot_at.map(|_| self.full_snapshot_interval_ms)
    }

    pub fn clear_full_snapshot(&mut self) {
        self.full_snapshot_at = None;
    }

    pub fn clear_all(&mut self) {
        self.clear_flush();
        self.clear_full_snapshot();
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<i64> {
        match (self.flush_at, self.full_snapshot_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Which deadlines have passed at `now`
    ///
    /// Due deadlines are not cleared; the flush clears its own and the full
    /// snapshot reschedules itself.
    pub fn due(&self, now: i64) -> DueTimers {
        DueTimers {
            flush: self.flush_at.is_some_and(|at| now >= at),
            full_snapshot: self.full_snapshot_at.is_some_and(|at| now >= at),
        }
    }
}
