//! Gateway event bus.
//!
//! Publishes routing and orchestration events over a Tokio broadcast
//! channel so operators and tests can observe dispatch outcomes,
//! suppressions, protocol fires, and state transitions without
//! polling the ledger.

use crate::message::FinalStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Broadcast channel capacity.
const CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// A dispatch reached a terminal status.
    Dispatched {
        message_id: Uuid,
        recipient: String,
        final_status: FinalStatus,
        backend_used: String,
        total_attempts: u32,
        timestamp: DateTime<Utc>,
    },
    /// A message was suppressed as a duplicate.
    DuplicateSuppressed {
        message_id: Uuid,
        recipient: String,
        content_hash: String,
        timestamp: DateTime<Utc>,
    },
    /// An intervention protocol fired.
    ProtocolFired {
        protocol_id: String,
        action: String,
        timestamp: DateTime<Utc>,
    },
    /// An agent moved between lifecycle phases.
    PhaseChanged {
        recipient: String,
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },
    /// A debate session reached a terminal phase.
    DebateClosed {
        session_id: String,
        phase: String,
        outcome: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl GatewayEvent {
    /// Machine-readable event type label.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Dispatched { .. } => "dispatched",
            Self::DuplicateSuppressed { .. } => "duplicate_suppressed",
            Self::ProtocolFired { .. } => "protocol_fired",
            Self::PhaseChanged { .. } => "phase_changed",
            Self::DebateClosed { .. } => "debate_closed",
        }
    }

    /// Event timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Dispatched { timestamp, .. }
            | Self::DuplicateSuppressed { timestamp, .. }
            | Self::ProtocolFired { timestamp, .. }
            | Self::PhaseChanged { timestamp, .. }
            | Self::DebateClosed { timestamp, .. } => *timestamp,
        }
    }
}

/// Shared reference to the gateway bus.
pub type SharedGatewayBus = Arc<GatewayBus>;

/// Broadcast bus for gateway events.
pub struct GatewayBus {
    sender: broadcast::Sender<GatewayEvent>,
}

impl GatewayBus {
    /// Create a new bus.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this bus.
    pub fn shared(self) -> SharedGatewayBus {
        Arc::new(self)
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: GatewayEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "Gateway event published"),
            Err(_) => debug!(event_type, "Gateway event published (no receivers)"),
        }
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }

    /// Current subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for GatewayBus {
    fn default() -> Self {
        Self::new()
    }
}
