//! Delivery channels — one mechanism per attempt, behind a common trait.
//!
//! Channels perform exactly one delivery attempt against one resolved
//! target. Retry, backoff, and fallback live in the scheduler; channels
//! only report [`ChannelOutcome`]. A typed [`ChannelRegistry`] maps
//! [`ChannelKind`] to constructed implementations — no string-based or
//! reflective dispatch.

mod actuation;
mod file_inbox;
mod health;
mod http;
mod websocket;

pub use actuation::{ActuationChannel, InputSynthesizer};
pub use file_inbox::{FileInboxChannel, InboxRecord};
pub use health::{ChannelHealth, ChannelHealthBoard};
pub use http::HttpChannel;
pub use websocket::WebSocketChannel;

use crate::config::GatewayConfig;
use crate::directory::RecipientTarget;
use crate::error::{GatewayError, GatewayResult};
use crate::message::{ChannelKind, Message};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    /// The channel confirmed delivery.
    Sent,
    /// The attempt failed with a reason.
    Failed(String),
}

impl ChannelOutcome {
    /// Whether the attempt succeeded.
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent)
    }

    /// Failure reason, if any.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Sent => None,
            Self::Failed(reason) => Some(reason),
        }
    }
}

/// One delivery mechanism.
///
/// Implementations must be side-effect-idempotent under retry: invoking
/// `attempt` again with the same message must not duplicate visible
/// state beyond what the dedup guard already admitted upstream.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Which kind of channel this is.
    fn kind(&self) -> ChannelKind;

    /// Label recorded as `backend_used` when this channel serves a
    /// delivery (e.g. "actuation:dry").
    fn backend_label(&self) -> String {
        self.kind().to_string()
    }

    /// Perform one delivery attempt.
    async fn attempt(&self, target: &RecipientTarget, message: &Message) -> ChannelOutcome;
}

impl std::fmt::Debug for dyn DeliveryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryChannel")
            .field("kind", &self.kind())
            .finish()
    }
}

/// Shared reference to a channel implementation.
pub type SharedChannel = Arc<dyn DeliveryChannel>;

/// Typed kind → implementation registry.
pub struct ChannelRegistry {
    channels: HashMap<ChannelKind, SharedChannel>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Register (or replace) a channel implementation.
    pub fn register(&mut self, channel: SharedChannel) -> &mut Self {
        self.channels.insert(channel.kind(), channel);
        self
    }

    /// Build the standard four-channel registry from config.
    pub fn standard(config: &GatewayConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ActuationChannel::new(config.dry_run)));
        registry.register(Arc::new(FileInboxChannel::new(config.inbox_root.clone())));
        registry.register(Arc::new(HttpChannel::new()));
        registry.register(Arc::new(WebSocketChannel::new()));
        registry
    }

    /// Look up a channel by kind.
    pub fn get(&self, kind: ChannelKind) -> GatewayResult<SharedChannel> {
        self.channels.get(&kind).cloned().ok_or_else(|| {
            GatewayError::channel(kind.to_string(), "channel kind not registered")
        })
    }

    /// Whether a kind is registered.
    pub fn contains(&self, kind: ChannelKind) -> bool {
        self.channels.contains_key(&kind)
    }

    /// Registered kinds from `candidates`, preserving order.
    pub fn filter_registered(&self, candidates: &[ChannelKind]) -> Vec<ChannelKind> {
        candidates
            .iter()
            .copied()
            .filter(|kind| self.contains(*kind))
            .collect()
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
