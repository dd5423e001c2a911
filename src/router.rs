//! Message router — the top-level dispatch façade.
//!
//! `send` resolves the recipient (fail-fast on unknown names), consults
//! the dedup guard, builds a candidate channel ladder from priority
//! rules, and delegates to the retry scheduler. Every terminal receipt
//! is recorded in the ledger and published on the event bus, including
//! dedup suppressions — suppressed traffic is reported, never hidden.
//!
//! `broadcast` fans the same content out to many recipients as
//! independent deliveries bounded by a global concurrency limit. Each
//! copy carries a recipient-keyed content hash, so dedup never
//! cross-suppresses between recipients.

use crate::channel::{ChannelHealthBoard, ChannelRegistry};
use crate::config::GatewayConfig;
use crate::dedup::DeduplicationGuard;
use crate::directory::RecipientDirectory;
use crate::error::GatewayResult;
use crate::events::{GatewayBus, GatewayEvent, SharedGatewayBus};
use crate::ledger::DispatchLedger;
use crate::message::{
    AttemptStatus, ChannelKind, DispatchAttempt, DispatchResult, FinalStatus, Message, Priority,
};
use crate::retry::{BackoffPolicy, RetryScheduler};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Top-level router over directory, dedup, scheduler, and ledger.
pub struct MessageRouter {
    directory: Arc<RecipientDirectory>,
    registry: Arc<ChannelRegistry>,
    health: Arc<ChannelHealthBoard>,
    dedup: DeduplicationGuard,
    scheduler: RetryScheduler,
    semaphore: Arc<Semaphore>,
    ledger: Arc<DispatchLedger>,
    bus: SharedGatewayBus,
    delivery_timeout: Option<Duration>,
}

impl MessageRouter {
    /// Build a router from config with the default backoff policy.
    pub fn new(
        directory: Arc<RecipientDirectory>,
        registry: Arc<ChannelRegistry>,
        config: &GatewayConfig,
    ) -> Self {
        Self::with_policy(directory, registry, config, BackoffPolicy::default())
    }

    /// Build a router with an explicit backoff policy (tests use short
    /// delays here).
    pub fn with_policy(
        directory: Arc<RecipientDirectory>,
        registry: Arc<ChannelRegistry>,
        config: &GatewayConfig,
        policy: BackoffPolicy,
    ) -> Self {
        let health = Arc::new(ChannelHealthBoard::new());
        let scheduler =
            RetryScheduler::with_policy(Arc::clone(&registry), Arc::clone(&health), policy);
        Self {
            directory,
            registry,
            health,
            dedup: DeduplicationGuard::new(config.dedup_window(), config.dedup_capacity),
            scheduler,
            semaphore: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            ledger: Arc::new(DispatchLedger::default()),
            bus: GatewayBus::new().shared(),
            delivery_timeout: config.delivery_timeout(),
        }
    }

    /// The audit ledger of terminal receipts.
    pub fn ledger(&self) -> &Arc<DispatchLedger> {
        &self.ledger
    }

    /// The gateway event bus.
    pub fn bus(&self) -> &SharedGatewayBus {
        &self.bus
    }

    /// Channel health counters.
    pub fn health(&self) -> &Arc<ChannelHealthBoard> {
        &self.health
    }

    /// The recipient directory.
    pub fn directory(&self) -> &Arc<RecipientDirectory> {
        &self.directory
    }

    /// Dispatch one message to its recipient.
    ///
    /// Fails fast with `UnknownRecipient` before touching the
    /// scheduler. A dedup suppression yields a terminal
    /// `SkippedDuplicate` receipt with zero channel invocations.
    pub async fn send(&self, message: Message) -> GatewayResult<DispatchResult> {
        self.send_with_guard(message, None, &CancellationToken::new())
            .await
    }

    /// Like [`send`](Self::send), but cancellable.
    pub async fn send_cancellable(
        &self,
        message: Message,
        cancel: &CancellationToken,
    ) -> GatewayResult<DispatchResult> {
        self.send_with_guard(message, None, cancel).await
    }

    /// Dispatch using a caller-supplied dedup guard instead of the
    /// router's default window. Lifecycle nudges use this with their
    /// own shorter window so they never starve coordination traffic.
    pub async fn send_with_guard(
        &self,
        message: Message,
        guard: Option<&DeduplicationGuard>,
        cancel: &CancellationToken,
    ) -> GatewayResult<DispatchResult> {
        // Addressing errors surface immediately; retrying a wrong
        // address only reproduces misrouting.
        let target = self.directory.resolve(&message.recipient)?;

        let guard = guard.unwrap_or(&self.dedup);
        if guard.should_suppress(&message) {
            let result = suppressed_receipt(&message);
            self.bus.publish(GatewayEvent::DuplicateSuppressed {
                message_id: message.id,
                recipient: message.recipient.clone(),
                content_hash: message.content_hash.clone(),
                timestamp: Utc::now(),
            });
            info!(
                message_id = %message.id,
                recipient = %message.recipient,
                "Duplicate suppressed, no channel invoked"
            );
            self.ledger.record(result.clone());
            return Ok(result);
        }

        let candidates = self.candidate_channels(&message.priority, &target.fallback_channels);
        let deadline = self.delivery_timeout.map(|t| Instant::now() + t);

        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("router semaphore closed");

        let result = if message.priority == Priority::Urgent {
            self.scheduler
                .deliver_racing(&message, &target, &candidates, deadline, cancel)
                .await
        } else {
            self.scheduler
                .deliver(&message, &target, &candidates, deadline, cancel)
                .await
        };

        info!(
            message_id = %message.id,
            recipient = %result.recipient,
            status = %result.final_status,
            backend = %result.backend_used,
            attempts = result.total_attempts,
            "Dispatch complete"
        );
        self.bus.publish(GatewayEvent::Dispatched {
            message_id: result.message_id,
            recipient: result.recipient.clone(),
            final_status: result.final_status,
            backend_used: result.backend_used.clone(),
            total_attempts: result.total_attempts,
            timestamp: Utc::now(),
        });
        self.ledger.record(result.clone());
        Ok(result)
    }

    /// Fan a message template out to many recipients.
    ///
    /// All recipients are resolved up front; an unknown name fails the
    /// whole call before any delivery starts. Results come back in
    /// input order.
    pub async fn broadcast(
        &self,
        template: &Message,
        recipients: &[String],
    ) -> GatewayResult<Vec<DispatchResult>> {
        for recipient in recipients {
            self.directory.resolve(recipient)?;
        }

        let futures = recipients.iter().map(|recipient| {
            let message = template.for_recipient(recipient);
            self.send(message)
        });
        let results = futures::future::join_all(futures).await;
        results.into_iter().collect()
    }

    /// Candidate ladder for a message: urgent traffic gets every
    /// registered channel; lower priorities get the target's fallback
    /// order with degraded channels moved to the back.
    fn candidate_channels(
        &self,
        priority: &Priority,
        fallback: &[ChannelKind],
    ) -> Vec<ChannelKind> {
        let registered = self.registry.filter_registered(fallback);
        if *priority == Priority::Urgent {
            registered
        } else {
            self.health.order_by_health(&registered)
        }
    }
}

/// Terminal receipt for a dedup suppression: one pseudo-attempt,
/// no channel.
fn suppressed_receipt(message: &Message) -> DispatchResult {
    let now = Utc::now();
    DispatchResult {
        message_id: message.id,
        recipient: message.recipient.clone(),
        backend_used: "none".to_string(),
        final_status: FinalStatus::SkippedDuplicate,
        total_attempts: 1,
        attempts: vec![DispatchAttempt {
            message_id: message.id,
            channel: None,
            attempt_no: 1,
            status: AttemptStatus::SkippedDuplicate,
            started_at: now,
            finished_at: now,
            error: None,
        }],
        started_at: now,
        finished_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ActuationChannel;
    use crate::error::GatewayError;
    use std::collections::BTreeSet;

    const ROSTER: &str = r#"{
        "Agent-1": {
            "chat_input_coordinates": [100, 200],
            "onboarding_coordinates": [50, 60],
            "window_title": "Agent 1 Console",
            "fallback_channels": ["actuation"]
        },
        "Agent-2": {
            "pyautogui_target": {
                "window_title": "Agent 2 Console",
                "focus_xy": [10, 20],
                "input_xy": [30, 40]
            },
            "fallback_channels": ["actuation"]
        }
    }"#;

    fn dry_run_router() -> MessageRouter {
        let directory = Arc::new(
            RecipientDirectory::from_json_str(ROSTER, ChannelKind::all()).unwrap(),
        );
        let mut registry = ChannelRegistry::new();
        registry.register(Arc::new(ActuationChannel::new(true)));
        let policy = BackoffPolicy {
            base: Duration::from_millis(1),
            factor: 2,
            cap: Duration::from_millis(4),
            max_attempts_per_channel: 5,
        };
        MessageRouter::with_policy(
            directory,
            Arc::new(registry),
            &GatewayConfig::default(),
            policy,
        )
    }

    #[tokio::test]
    async fn test_send_dry_run() {
        let router = dry_run_router();
        let msg = Message::new("ops", "Agent-1", "hello", Priority::Normal);
        let result = router.send(msg).await.unwrap();
        assert_eq!(result.final_status, FinalStatus::Sent);
        assert_eq!(result.backend_used, "actuation:dry");
        assert_eq!(router.ledger().summary().sent, 1);
    }

    #[tokio::test]
    async fn test_unknown_recipient_fails_fast() {
        let router = dry_run_router();
        let msg = Message::new("ops", "Agent-8", "hello", Priority::Normal);
        let err = router.send(msg).await.unwrap_err();
        assert!(matches!(err, GatewayError::UnknownRecipient { .. }));
        // Nothing reached the scheduler or the ledger.
        assert!(router.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_yields_skipped_receipt_with_no_channel() {
        let router = dry_run_router();
        let first = Message::new("ops", "Agent-1", "status ok", Priority::Normal);
        let second = Message::new("ops", "Agent-1", "status ok", Priority::Normal);

        let r1 = router.send(first).await.unwrap();
        let r2 = router.send(second).await.unwrap();

        assert_eq!(r1.final_status, FinalStatus::Sent);
        assert_eq!(r2.final_status, FinalStatus::SkippedDuplicate);
        assert_eq!(r2.backend_used, "none");
        assert_eq!(r2.attempts.len(), 1);
        assert!(r2.attempts[0].channel.is_none());
        assert_eq!(r2.attempts[0].status, AttemptStatus::SkippedDuplicate);
    }

    #[tokio::test]
    async fn test_suppression_is_reported_on_bus() {
        let router = dry_run_router();
        let mut events = router.bus().subscribe();

        let first = Message::new("ops", "Agent-1", "dup me", Priority::Normal);
        let second = Message::new("ops", "Agent-1", "dup me", Priority::Normal);
        router.send(first).await.unwrap();
        router.send(second).await.unwrap();

        let mut types = Vec::new();
        for _ in 0..2 {
            types.push(events.recv().await.unwrap().event_type());
        }
        assert!(types.contains(&"duplicate_suppressed"));
    }

    #[tokio::test]
    async fn test_broadcast_no_cross_suppression() {
        let router = dry_run_router();
        let template = Message::new("ops", "Agent-1", "System check", Priority::Normal);
        let recipients = vec!["Agent-1".to_string(), "Agent-2".to_string()];
        let results = router.broadcast(&template, &recipients).await.unwrap();

        assert_eq!(results.len(), 2);
        for result in &results {
            assert_eq!(result.final_status, FinalStatus::Sent);
            assert_eq!(result.backend_used, "actuation:dry");
        }
        assert_eq!(results[0].recipient, "Agent-1");
        assert_eq!(results[1].recipient, "Agent-2");
    }

    #[tokio::test]
    async fn test_broadcast_unknown_recipient_fails_before_dispatch() {
        let router = dry_run_router();
        let template = Message::new("ops", "Agent-1", "ping", Priority::Normal);
        let recipients = vec!["Agent-1".to_string(), "Agent-9".to_string()];
        let err = router.broadcast(&template, &recipients).await.unwrap_err();
        assert!(matches!(err, GatewayError::UnknownRecipient { .. }));
        assert!(router.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_urgent_uses_racing_path() {
        let router = dry_run_router();
        let mut tags = BTreeSet::new();
        tags.insert("alert".to_string());
        let msg = Message::with_tags("ops", "Agent-1", "fire!", Priority::Urgent, tags);
        let result = router.send(msg).await.unwrap();
        assert_eq!(result.final_status, FinalStatus::Sent);
    }
}
