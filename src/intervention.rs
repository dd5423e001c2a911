//! Intervention protocols — health-triggered automated responses.
//!
//! Protocols pair a trigger condition over health snapshots with an
//! action dispatched through the router. Each protocol carries a
//! cooldown so a persistently-bad metric fires once per window instead
//! of flooding recipients.

use crate::error::{GatewayError, GatewayResult};
use crate::events::GatewayEvent;
use crate::message::{DispatchResult, Message, Priority};
use crate::router::MessageRouter;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// A point-in-time reading of named health metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub taken_at: DateTime<Utc>,
    pub metrics: HashMap<String, f64>,
}

impl HealthSnapshot {
    pub fn new(metrics: HashMap<String, f64>) -> Self {
        Self {
            taken_at: Utc::now(),
            metrics,
        }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// Condition a snapshot must satisfy for a protocol to fire.
///
/// A referenced metric that is absent from the snapshot evaluates
/// false; missing data never triggers an intervention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerCondition {
    MetricAbove { metric: String, threshold: f64 },
    MetricBelow { metric: String, threshold: f64 },
    Any { conditions: Vec<TriggerCondition> },
    All { conditions: Vec<TriggerCondition> },
}

impl TriggerCondition {
    pub fn evaluate(&self, snapshot: &HealthSnapshot) -> bool {
        match self {
            Self::MetricAbove { metric, threshold } => {
                snapshot.metric(metric).is_some_and(|v| v > *threshold)
            }
            Self::MetricBelow { metric, threshold } => {
                snapshot.metric(metric).is_some_and(|v| v < *threshold)
            }
            Self::Any { conditions } => conditions.iter().any(|c| c.evaluate(snapshot)),
            Self::All { conditions } => {
                !conditions.is_empty() && conditions.iter().all(|c| c.evaluate(snapshot))
            }
        }
    }
}

/// What a protocol does when its trigger fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InterventionAction {
    /// High-priority alert to every recipient in the directory.
    BroadcastAlert { body: String },
    /// Urgent freeze directive to one agent.
    FreezeAgent { recipient: String },
    /// Urgent escalation to the configured escalation contacts.
    Escalate { reason: String },
}

impl InterventionAction {
    /// Machine-readable action label for events and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::BroadcastAlert { .. } => "broadcast_alert",
            Self::FreezeAgent { .. } => "freeze_agent",
            Self::Escalate { .. } => "escalate",
        }
    }
}

/// One registered intervention protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterventionProtocol {
    pub id: String,
    pub trigger: TriggerCondition,
    pub action: InterventionAction,
    /// Minimum seconds between fires.
    pub cooldown_seconds: i64,
    /// When the protocol last fired.
    pub last_fired_at: Option<DateTime<Utc>>,
}

impl InterventionProtocol {
    pub fn new(
        id: &str,
        trigger: TriggerCondition,
        action: InterventionAction,
        cooldown_seconds: i64,
    ) -> Self {
        Self {
            id: id.to_string(),
            trigger,
            action,
            cooldown_seconds,
            last_fired_at: None,
        }
    }

    /// Whether the cooldown window has elapsed.
    fn cooled_down(&self, now: DateTime<Utc>) -> bool {
        match self.last_fired_at {
            None => true,
            Some(last) => now - last >= ChronoDuration::seconds(self.cooldown_seconds),
        }
    }
}

/// Evaluates snapshots against registered protocols and dispatches the
/// resulting actions through the router.
pub struct InterventionManager {
    router: Arc<MessageRouter>,
    protocols: Mutex<HashMap<String, InterventionProtocol>>,
    escalation_contacts: Vec<String>,
    sender_name: String,
}

impl InterventionManager {
    pub fn new(router: Arc<MessageRouter>, escalation_contacts: Vec<String>) -> Self {
        Self {
            router,
            protocols: Mutex::new(HashMap::new()),
            escalation_contacts,
            sender_name: "intervention-manager".to_string(),
        }
    }

    /// Register a protocol, replacing any with the same id.
    pub async fn register(&self, protocol: InterventionProtocol) {
        info!(
            protocol_id = %protocol.id,
            action = protocol.action.label(),
            cooldown_seconds = protocol.cooldown_seconds,
            "Intervention protocol registered"
        );
        self.protocols
            .lock()
            .await
            .insert(protocol.id.clone(), protocol);
    }

    /// Snapshot of a registered protocol.
    pub async fn protocol(&self, protocol_id: &str) -> GatewayResult<InterventionProtocol> {
        self.protocols
            .lock()
            .await
            .get(protocol_id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownProtocol {
                protocol_id: protocol_id.to_string(),
            })
    }

    /// Evaluate a snapshot against every protocol. Triggered protocols
    /// still inside their cooldown are skipped. Returns the ids of
    /// protocols that fired.
    pub async fn observe(&self, snapshot: &HealthSnapshot) -> GatewayResult<Vec<String>> {
        let triggered: Vec<InterventionProtocol> = {
            let mut protocols = self.protocols.lock().await;
            let now = snapshot.taken_at;
            let mut due = Vec::new();
            for protocol in protocols.values_mut() {
                if !protocol.trigger.evaluate(snapshot) {
                    continue;
                }
                if !protocol.cooled_down(now) {
                    info!(
                        protocol_id = %protocol.id,
                        "Trigger matched but protocol is cooling down"
                    );
                    continue;
                }
                protocol.last_fired_at = Some(now);
                due.push(protocol.clone());
            }
            due
        };

        let mut fired = Vec::new();
        for protocol in triggered {
            warn!(
                protocol_id = %protocol.id,
                action = protocol.action.label(),
                "Intervention protocol firing"
            );
            self.execute(&protocol).await?;
            self.router.bus().publish(GatewayEvent::ProtocolFired {
                protocol_id: protocol.id.clone(),
                action: protocol.action.label().to_string(),
                timestamp: Utc::now(),
            });
            fired.push(protocol.id);
        }
        Ok(fired)
    }

    async fn execute(&self, protocol: &InterventionProtocol) -> GatewayResult<Vec<DispatchResult>> {
        let mut tags = BTreeSet::new();
        tags.insert("intervention".to_string());
        tags.insert(protocol.id.clone());

        match &protocol.action {
            InterventionAction::BroadcastAlert { body } => {
                let recipients = self.router.directory().recipients();
                let template = Message::with_tags(
                    &self.sender_name,
                    recipients.first().map(String::as_str).unwrap_or_default(),
                    body,
                    Priority::High,
                    tags,
                );
                self.router.broadcast(&template, &recipients).await
            }
            InterventionAction::FreezeAgent { recipient } => {
                let message = Message::with_tags(
                    &self.sender_name,
                    recipient,
                    &format!("FREEZE: halt all activity (protocol {})", protocol.id),
                    Priority::Urgent,
                    tags,
                );
                Ok(vec![self.router.send(message).await?])
            }
            InterventionAction::Escalate { reason } => {
                let template = Message::with_tags(
                    &self.sender_name,
                    self.escalation_contacts
                        .first()
                        .map(String::as_str)
                        .unwrap_or_default(),
                    &format!("ESCALATION (protocol {}): {reason}", protocol.id),
                    Priority::Urgent,
                    tags,
                );
                self.router
                    .broadcast(&template, &self.escalation_contacts)
                    .await
            }
        }
    }
}
