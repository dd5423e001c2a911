//! Gateway configuration
//!
//! Loaded once at startup. Environment variables override defaults:
//! `GATEWAY_DRY_RUN`, `GATEWAY_ROSTER_PATH`, `GATEWAY_DEDUP_WINDOW_SECS`,
//! `GATEWAY_NUDGE_WINDOW_SECS`, `GATEWAY_MAX_CONCURRENCY`,
//! `GATEWAY_INBOX_ROOT`.

use crate::message::ChannelKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Path to the recipient roster JSON.
    pub roster_path: PathBuf,
    /// Dry-run mode: actuation logs would-be input instead of performing it.
    pub dry_run: bool,
    /// Sliding dedup window for regular messages, in seconds.
    pub dedup_window_secs: u64,
    /// Shorter dedup window for lifecycle nudges, in seconds.
    pub nudge_window_secs: u64,
    /// Maximum entries held in the dedup window.
    pub dedup_capacity: usize,
    /// Global in-flight delivery limit shared by send and broadcast.
    pub max_concurrency: usize,
    /// Root directory for per-recipient inbox files.
    pub inbox_root: PathBuf,
    /// Channel order used when a target configures no explicit fallbacks.
    pub default_fallback: Vec<ChannelKind>,
    /// Overall delivery deadline per message, in seconds. Zero disables.
    pub delivery_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            roster_path: PathBuf::from("roster.json"),
            dry_run: false,
            dedup_window_secs: 300,
            nudge_window_secs: 60,
            dedup_capacity: 1024,
            max_concurrency: 8,
            inbox_root: PathBuf::from("inboxes"),
            default_fallback: ChannelKind::all().to_vec(),
            delivery_timeout_secs: 300,
        }
    }
}

impl GatewayConfig {
    /// Build a config from defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("GATEWAY_DRY_RUN") {
            config.dry_run = val == "1" || val.eq_ignore_ascii_case("true");
        }
        if let Ok(val) = std::env::var("GATEWAY_ROSTER_PATH") {
            config.roster_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("GATEWAY_INBOX_ROOT") {
            config.inbox_root = PathBuf::from(val);
        }
        if let Some(secs) = parse_env_number("GATEWAY_DEDUP_WINDOW_SECS") {
            config.dedup_window_secs = secs;
        }
        if let Some(secs) = parse_env_number("GATEWAY_NUDGE_WINDOW_SECS") {
            config.nudge_window_secs = secs;
        }
        if let Some(n) = parse_env_number::<usize>("GATEWAY_MAX_CONCURRENCY") {
            if n > 0 {
                config.max_concurrency = n;
            } else {
                warn!(var = "GATEWAY_MAX_CONCURRENCY", "Ignoring zero concurrency override");
            }
        }

        config
    }

    /// Dedup window as a [`Duration`].
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    /// Nudge dedup window as a [`Duration`].
    pub fn nudge_window(&self) -> Duration {
        Duration::from_secs(self.nudge_window_secs)
    }

    /// Delivery deadline as a [`Duration`], `None` when disabled.
    pub fn delivery_timeout(&self) -> Option<Duration> {
        if self.delivery_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.delivery_timeout_secs))
        }
    }
}

/// Read and parse a numeric override. A malformed value is reported
/// and the default kept, never silently dropped.
fn parse_env_number<T: std::str::FromStr>(var: &str) -> Option<T> {
    let val = std::env::var(var).ok()?;
    match val.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(var, value = %val, "Ignoring malformed numeric override");
            None
        }
    }
}
