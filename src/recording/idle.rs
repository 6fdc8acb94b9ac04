// src/recording/idle.rs
//! User activity tracking
//!
//! Classifies each event as interactive or not and decides when the
//! session goes idle and when it wakes up again.

use crate::recording::event::RecorderEvent;
use tracing::debug;

/// Idle state of the current session
///
/// `Unknown` is the startup state: the first interaction moves it to
/// `Active` without a "no longer idle" marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    Unknown,
    Idle,
    Active,
}

/// Result of feeding one event to the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityTransition {
    /// Nothing changed
    None,

    /// The session just became idle
    BecameIdle {
        last_activity_timestamp: i64,
        event_timestamp: i64,
    },

    /// User activity after a real idle period
    ReturnedFromIdle,
}

/// Tracks last activity and idle transitions
#[derive(Debug, Clone)]
pub struct ActivityDetector {
    state: IdleState,
    last_activity_timestamp: i64,
    threshold_ms: i64,
}

impl ActivityDetector {
    pub fn new(threshold_ms: i64, now: i64) -> Self {
        Self {
            state: IdleState::Unknown,
            last_activity_timestamp: now,
            threshold_ms,
        }
    }

    pub fn state(&self) -> IdleState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == IdleState::Idle
    }

    pub fn last_activity_timestamp(&self) -> i64 {
        self.last_activity_timestamp
    }

    pub fn threshold_ms(&self) -> i64 {
        self.threshold_ms
    }

    /// Forget idle state, e.g. after a session rotation
    pub fn reset(&mut self, now: i64) {
        self.state = IdleState::Unknown;
        self.last_activity_timestamp = now;
    }

    /// Update state for `event`
    pub fn observe(&mut self, event: &RecorderEvent) -> ActivityTransition {
        let interactive = event.is_interactive();

        if !interactive && self.state != IdleState::Idle {
            let since_last_activity = event.timestamp - self.last_activity_timestamp;
            if since_last_activity > self.threshold_ms {
                debug!(
                    "No user activity for {}ms, session is idle",
                    since_last_activity
                );
                self.state = IdleState::Idle;
                return ActivityTransition::BecameIdle {
                    last_activity_timestamp: self.last_activity_timestamp,
                    event_timestamp: event.timestamp,
                };
            }
        }

        if interactive {
            self.last_activity_timestamp = event.timestamp;
            match self.state {
                IdleState::Idle => {
                    debug!("User activity, session is no longer idle");
                    self.state = IdleState::Active;
                    return ActivityTransition::ReturnedFromIdle;
                }
                IdleState::Unknown => self.state = IdleState::Active,
                IdleState::Active => {}
            }
        }

        ActivityTransition::None
    }
}
