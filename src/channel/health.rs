//! Per-channel health tracking.
//!
//! Counts consecutive failures per [`ChannelKind`]. A channel with too
//! many consecutive failures is considered degraded and the router
//! moves it to the back of the non-urgent fallback ladder. Successes
//! reset the streak.

use crate::message::ChannelKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Consecutive failures before a channel is treated as degraded.
const DEGRADE_THRESHOLD: u32 = 3;

/// Health counters for one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelHealth {
    /// Channel these counters belong to.
    pub channel: ChannelKind,
    /// Consecutive failures since last success.
    pub consecutive_failures: u32,
    /// Total attempts recorded.
    pub total_attempts: u64,
    /// Total failures recorded.
    pub total_failures: u64,
    /// Last observed error message.
    pub last_error: Option<String>,
    /// When counters last changed.
    pub updated_at: DateTime<Utc>,
}

impl ChannelHealth {
    fn new(channel: ChannelKind) -> Self {
        Self {
            channel,
            consecutive_failures: 0,
            total_attempts: 0,
            total_failures: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// Whether the channel is currently degraded.
    pub fn is_degraded(&self) -> bool {
        self.consecutive_failures >= DEGRADE_THRESHOLD
    }

    /// Failure rate as a fraction (0.0–1.0).
    pub fn failure_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.total_attempts as f64
        }
    }
}

/// Shared health board over all channel kinds.
#[derive(Debug, Default)]
pub struct ChannelHealthBoard {
    state: Mutex<HashMap<ChannelKind, ChannelHealth>>,
}

impl ChannelHealthBoard {
    /// Create an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful attempt on a channel.
    pub fn record_success(&self, channel: ChannelKind) {
        let mut state = self.state.lock().expect("health board poisoned");
        let health = state
            .entry(channel)
            .or_insert_with(|| ChannelHealth::new(channel));
        health.total_attempts += 1;
        health.consecutive_failures = 0;
        health.last_error = None;
        health.updated_at = Utc::now();
    }

    /// Record a failed attempt on a channel.
    pub fn record_failure(&self, channel: ChannelKind, error: &str) {
        let mut state = self.state.lock().expect("health board poisoned");
        let health = state
            .entry(channel)
            .or_insert_with(|| ChannelHealth::new(channel));
        health.total_attempts += 1;
        health.total_failures += 1;
        health.consecutive_failures += 1;
        health.last_error = Some(error.to_string());
        health.updated_at = Utc::now();
    }

    /// Whether a channel is currently degraded.
    pub fn is_degraded(&self, channel: ChannelKind) -> bool {
        self.state
            .lock()
            .expect("health board poisoned")
            .get(&channel)
            .map(ChannelHealth::is_degraded)
            .unwrap_or(false)
    }

    /// Snapshot of one channel's counters.
    pub fn snapshot(&self, channel: ChannelKind) -> Option<ChannelHealth> {
        self.state
            .lock()
            .expect("health board poisoned")
            .get(&channel)
            .cloned()
    }

    /// Reorder a candidate ladder so degraded channels come last,
    /// preserving relative order within each group.
    pub fn order_by_health(&self, candidates: &[ChannelKind]) -> Vec<ChannelKind> {
        let mut healthy = Vec::new();
        let mut degraded = Vec::new();
        for &kind in candidates {
            if self.is_degraded(kind) {
                degraded.push(kind);
            } else {
                healthy.push(kind);
            }
        }
        healthy.extend(degraded);
        healthy
    }
}
