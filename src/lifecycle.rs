//! Agent lifecycle coordination.
//!
//! Each recipient owns one [`AgentLifecycleRecord`] driven through a
//! fixed phase table: `Idle → Observe → Debate → Act → Observe` (loop),
//! with `Recover` reachable from any live phase and `Terminated` from
//! `Recover` or `Idle`. Transitions outside the table fail with an
//! illegal-transition error — there is no coercion to a "nearest legal"
//! phase.
//!
//! The coordinator also nudges agents that sit in `Idle` past a
//! timeout, through the router but on a separate, shorter dedup window
//! so nudge suppression never starves regular coordination traffic.

use crate::dedup::DeduplicationGuard;
use crate::error::{GatewayError, GatewayResult};
use crate::events::GatewayEvent;
use crate::message::{DispatchResult, Message, Priority};
use crate::router::MessageRouter;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Lifecycle phase of one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    Idle,
    Observe,
    Debate,
    Act,
    Recover,
    Terminated,
}

impl AgentPhase {
    /// Whether this phase is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Phases legally reachable from this one.
    pub fn valid_transitions(self) -> &'static [AgentPhase] {
        match self {
            Self::Idle => &[Self::Observe, Self::Recover, Self::Terminated],
            Self::Observe => &[Self::Debate, Self::Recover],
            Self::Debate => &[Self::Act, Self::Recover],
            Self::Act => &[Self::Observe, Self::Recover],
            Self::Recover => &[Self::Idle, Self::Observe, Self::Terminated],
            Self::Terminated => &[],
        }
    }

    /// Whether `to` is a legal next phase.
    pub fn can_transition_to(self, to: AgentPhase) -> bool {
        self.valid_transitions().contains(&to)
    }
}

impl std::fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Observe => write!(f, "observe"),
            Self::Debate => write!(f, "debate"),
            Self::Act => write!(f, "act"),
            Self::Recover => write!(f, "recover"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// One phase entry in an agent's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseEntry {
    pub phase: AgentPhase,
    pub entered_at: DateTime<Utc>,
}

/// Lifecycle state for one recipient. Mutated only through
/// [`LifecycleCoordinator::transition`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLifecycleRecord {
    /// Recipient this record tracks.
    pub recipient_id: String,
    /// Current phase.
    pub phase: AgentPhase,
    /// When the current phase was entered.
    pub entered_at: DateTime<Utc>,
    /// Ordered phase history, including the current phase.
    pub history: Vec<PhaseEntry>,
}

impl AgentLifecycleRecord {
    fn new(recipient_id: &str) -> Self {
        let now = Utc::now();
        Self {
            recipient_id: recipient_id.to_string(),
            phase: AgentPhase::Idle,
            entered_at: now,
            history: vec![PhaseEntry {
                phase: AgentPhase::Idle,
                entered_at: now,
            }],
        }
    }

    /// Time spent in the current phase.
    pub fn time_in_phase(&self, now: DateTime<Utc>) -> ChronoDuration {
        now - self.entered_at
    }
}

/// Coordinator over all lifecycle records.
pub struct LifecycleCoordinator {
    router: Arc<MessageRouter>,
    records: Mutex<HashMap<String, AgentLifecycleRecord>>,
    /// Separate, shorter window for nudge suppression.
    nudge_guard: DeduplicationGuard,
    /// How long an agent may sit in Idle before being nudged.
    idle_timeout: ChronoDuration,
    /// Sender name stamped on nudge messages.
    coordinator_name: String,
}

impl LifecycleCoordinator {
    /// Create a coordinator. `nudge_window` should be shorter than the
    /// router's dedup window.
    pub fn new(router: Arc<MessageRouter>, idle_timeout: Duration, nudge_window: Duration) -> Self {
        Self {
            router,
            records: Mutex::new(HashMap::new()),
            nudge_guard: DeduplicationGuard::new(nudge_window, 256),
            idle_timeout: ChronoDuration::from_std(idle_timeout)
                .unwrap_or_else(|_| ChronoDuration::seconds(600)),
            coordinator_name: "lifecycle-coordinator".to_string(),
        }
    }

    /// Register a recipient, starting in `Idle`. Registering an
    /// existing recipient is a no-op.
    pub async fn register(&self, recipient_id: &str) {
        let mut records = self.records.lock().await;
        records
            .entry(recipient_id.to_string())
            .or_insert_with(|| AgentLifecycleRecord::new(recipient_id));
    }

    /// Snapshot of one record.
    pub async fn record(&self, recipient_id: &str) -> GatewayResult<AgentLifecycleRecord> {
        let records = self.records.lock().await;
        records
            .get(recipient_id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownAgent {
                recipient: recipient_id.to_string(),
            })
    }

    /// Drive a recipient to `target_phase`.
    ///
    /// Fails with an illegal-transition error when the phase table
    /// forbids the move; the record is left untouched in that case.
    pub async fn transition(
        &self,
        recipient_id: &str,
        target_phase: AgentPhase,
    ) -> GatewayResult<AgentLifecycleRecord> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(recipient_id)
            .ok_or_else(|| GatewayError::UnknownAgent {
                recipient: recipient_id.to_string(),
            })?;

        if !record.phase.can_transition_to(target_phase) {
            return Err(GatewayError::illegal_transition(
                recipient_id,
                record.phase,
                target_phase,
            ));
        }

        let from = record.phase;
        let now = Utc::now();
        record.phase = target_phase;
        record.entered_at = now;
        record.history.push(PhaseEntry {
            phase: target_phase,
            entered_at: now,
        });

        info!(
            recipient = %recipient_id,
            from = %from,
            to = %target_phase,
            "Lifecycle transition"
        );
        self.router.bus().publish(GatewayEvent::PhaseChanged {
            recipient: recipient_id.to_string(),
            from: from.to_string(),
            to: target_phase.to_string(),
            timestamp: now,
        });

        Ok(record.clone())
    }

    /// All records, sorted by recipient.
    pub async fn snapshot(&self) -> Vec<AgentLifecycleRecord> {
        let records = self.records.lock().await;
        let mut all: Vec<AgentLifecycleRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.recipient_id.cmp(&b.recipient_id));
        all
    }

    /// Nudge every agent sitting in `Idle` past the timeout.
    ///
    /// Nudges flow through the router but against the coordinator's
    /// own shorter dedup window. Returns the receipts for nudges that
    /// were actually dispatched.
    pub async fn poll_idle(&self, now: DateTime<Utc>) -> GatewayResult<Vec<DispatchResult>> {
        let stale: Vec<String> = {
            let records = self.records.lock().await;
            records
                .values()
                .filter(|r| r.phase == AgentPhase::Idle && r.time_in_phase(now) >= self.idle_timeout)
                .map(|r| r.recipient_id.clone())
                .collect()
        };

        let mut results = Vec::new();
        for recipient in stale {
            let mut tags = BTreeSet::new();
            tags.insert("nudge".to_string());
            let message = Message::with_tags(
                &self.coordinator_name,
                &recipient,
                "You have been idle past the coordination timeout. Please advance to the observe phase.",
                Priority::High,
                tags,
            );
            debug!(recipient = %recipient, "Nudging idle agent");
            let result = self
                .router
                .send_with_guard(
                    message,
                    Some(&self.nudge_guard),
                    &tokio_util::sync::CancellationToken::new(),
                )
                .await?;
            results.push(result);
        }
        Ok(results)
    }
}
