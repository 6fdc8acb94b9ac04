// src/recording/throttle.rs
//! Per-node mutation rate limiting
//!
//! A token bucket per DOM node. Each mutation touching a node takes one
//! token; an empty bucket drops the mutation. Buckets refill lazily from
//! event timestamps, `refill_rate` tokens per elapsed second.

use crate::recording::event::{IncrementalSource, RecorderEvent};
use crate::utils::config::ThrottleOptions;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

const REFILL_INTERVAL_MS: i64 = 1000;

/// Result of throttling one event
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleOutcome {
    /// The event with rate limited mutations removed, `None` if nothing
    /// survived
    pub event: Option<RecorderEvent>,

    /// Nodes that ran out of tokens for the first time
    pub newly_limited: Vec<u64>,
}

#[derive(Debug)]
pub struct MutationThrottler {
    options: ThrottleOptions,
    buckets: HashMap<u64, u32>,
    reported: HashSet<u64>,
    last_refill: Option<i64>,
}

impl MutationThrottler {
    pub fn new(options: ThrottleOptions) -> Self {
        Self {
            options,
            buckets: HashMap::new(),
            reported: HashSet::new(),
            last_refill: None,
        }
    }

    /// Forget all buckets
    pub fn reset(&mut self) {
        self.buckets.clear();
        self.reported.clear();
        self.last_refill = None;
    }

    pub fn throttle(&mut self, mut event: RecorderEvent) -> ThrottleOutcome {
        if !self.options.enabled || event.incremental_source() != Some(IncrementalSource::Mutation)
        {
            return ThrottleOutcome {
                event: Some(event),
                newly_limited: Vec::new(),
            };
        }

        self.refill(event.timestamp);

        let before = change_count(&event.data);
        let mut newly_limited = Vec::new();

        if let Some(data) = event.data.as_object_mut() {
            for (field, key) in [("attributes", "id"), ("texts", "id"), ("adds", "parentId")] {
                if let Some(Value::Array(entries)) = data.get_mut(field) {
                    entries.retain(|entry| {
                        let Some(node_id) = entry.get(key).and_then(Value::as_u64) else {
                            return true;
                        };
                        self.take_token(node_id, &mut newly_limited)
                    });
                }
            }
        }

        if before > 0 && change_count(&event.data) == 0 {
            debug!("Dropping fully rate limited mutation at {}", event.timestamp);
            return ThrottleOutcome {
                event: None,
                newly_limited,
            };
        }

        ThrottleOutcome {
            event: Some(event),
            newly_limited,
        }
    }

    fn take_token(&mut self, node_id: u64, newly_limited: &mut Vec<u64>) -> bool {
        let bucket = self
            .buckets
            .entry(node_id)
            .or_insert(self.options.bucket_size);

        if *bucket == 0 {
            if self.reported.insert(node_id) {
                newly_limited.push(node_id);
            }
            return false;
        }

        *bucket -= 1;
        true
    }

    fn refill(&mut self, now: i64) {
        let Some(last) = self.last_refill else {
            self.last_refill = Some(now);
            return;
        };

        let ticks = (now - last) / REFILL_INTERVAL_MS;
        if ticks <= 0 {
            return;
        }
        self.last_refill = Some(last + ticks * REFILL_INTERVAL_MS);

        let tokens = (ticks as u64).saturating_mul(self.options.refill_rate as u64);
        let bucket_size = self.options.bucket_size;
        let reported = &mut self.reported;
        self.buckets.retain(|node_id, bucket| {
            let refilled = (*bucket as u64 + tokens).min(bucket_size as u64) as u32;
            if refilled >= bucket_size {
                reported.remove(node_id);
                false
            } else {
                *bucket = refilled;
                true
            }
        });
    }
}

fn change_count(data: &Value) -> usize {
    ["adds", "removes", "texts", "attributes"]
        .iter()
        .filter_map(|field| data.get(*field).and_then(Value::as_array))
        .map(Vec::len)
        .sum()
}
