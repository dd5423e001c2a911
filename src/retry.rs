//! Retry scheduler — bounded backoff and channel fallback.
//!
//! Drives a single message to a terminal [`DispatchResult`]: channels
//! are tried in priority order, each with exponential backoff, until
//! one reports `Sent`, every channel is exhausted, the deadline
//! elapses, or the caller cancels. Termination is always reachable in
//! a finite number of attempts — there is no unbounded retry loop.
//!
//! Backoff sleeps and in-flight attempts race a [`CancellationToken`]
//! and the optional deadline, so a cancelled send never leaves a
//! `Pending` attempt behind: the in-flight attempt is finalized as
//! `Cancelled`.

use crate::channel::{ChannelHealthBoard, ChannelOutcome, ChannelRegistry};
use crate::directory::RecipientTarget;
use crate::message::{
    AttemptStatus, ChannelKind, DispatchAttempt, DispatchResult, FinalStatus, Message,
};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Exponential backoff policy for one channel.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Delay before the second attempt.
    pub base: Duration,
    /// Multiplier applied per subsequent attempt.
    pub factor: u32,
    /// Upper bound on any single delay.
    pub cap: Duration,
    /// Attempts per channel before falling to the next one.
    pub max_attempts_per_channel: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2,
            cap: Duration::from_secs(30),
            max_attempts_per_channel: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay after the `n`th failed attempt on a channel (1-indexed).
    pub fn delay_after(&self, attempt_on_channel: u32) -> Duration {
        let exp = attempt_on_channel.saturating_sub(1).min(16);
        let factor = (self.factor as u64).saturating_pow(exp);
        let delay = self
            .base
            .checked_mul(factor.min(u32::MAX as u64) as u32)
            .unwrap_or(self.cap);
        delay.min(self.cap)
    }

    /// Deterministic upper bound on total attempts for a candidate list.
    pub fn max_total_attempts(&self, channel_count: usize) -> u32 {
        self.max_attempts_per_channel * channel_count as u32
    }
}

/// Drives retry, backoff, and fallback for individual messages.
#[derive(Clone)]
pub struct RetryScheduler {
    policy: BackoffPolicy,
    registry: Arc<ChannelRegistry>,
    health: Arc<ChannelHealthBoard>,
}

enum AttemptEnd {
    Outcome(ChannelOutcome),
    Cancelled,
    DeadlineElapsed,
}

impl RetryScheduler {
    /// Create a scheduler with the default backoff policy.
    pub fn new(registry: Arc<ChannelRegistry>, health: Arc<ChannelHealthBoard>) -> Self {
        Self::with_policy(registry, health, BackoffPolicy::default())
    }

    /// Create a scheduler with an explicit backoff policy.
    pub fn with_policy(
        registry: Arc<ChannelRegistry>,
        health: Arc<ChannelHealthBoard>,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            policy,
            registry,
            health,
        }
    }

    /// The active backoff policy.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Deliver sequentially: walk `channels` in order, retrying each
    /// with backoff before falling to the next.
    pub async fn deliver(
        &self,
        message: &Message,
        target: &Arc<RecipientTarget>,
        channels: &[ChannelKind],
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> DispatchResult {
        let started_at = Utc::now();
        let mut attempts: Vec<DispatchAttempt> = Vec::new();
        let mut attempt_no: u32 = 0;

        for &kind in channels {
            let channel = match self.registry.get(kind) {
                Ok(channel) => channel,
                Err(e) => {
                    warn!(channel = %kind, "Skipping unregistered channel: {e}");
                    continue;
                }
            };

            for attempt_on_channel in 1..=self.policy.max_attempts_per_channel {
                if cancel.is_cancelled() {
                    return finalize(message, started_at, attempts, FinalStatus::Cancelled, None);
                }
                if deadline_elapsed(deadline) {
                    return finalize(message, started_at, attempts, FinalStatus::Expired, None);
                }

                attempt_no += 1;
                let attempt_started = Utc::now();
                let end = attempt_racing(
                    channel.attempt(target, message),
                    deadline,
                    cancel,
                )
                .await;

                match end {
                    AttemptEnd::Outcome(ChannelOutcome::Sent) => {
                        self.health.record_success(kind);
                        attempts.push(DispatchAttempt {
                            message_id: message.id,
                            channel: Some(kind),
                            attempt_no,
                            status: AttemptStatus::Sent,
                            started_at: attempt_started,
                            finished_at: Utc::now(),
                            error: None,
                        });
                        debug!(
                            message_id = %message.id,
                            channel = %kind,
                            attempt_no,
                            "Delivery confirmed"
                        );
                        return finalize(
                            message,
                            started_at,
                            attempts,
                            FinalStatus::Sent,
                            Some(channel.backend_label()),
                        );
                    }
                    AttemptEnd::Outcome(ChannelOutcome::Failed(reason)) => {
                        self.health.record_failure(kind, &reason);
                        warn!(
                            message_id = %message.id,
                            channel = %kind,
                            attempt_no,
                            reason = %reason,
                            "Delivery attempt failed"
                        );
                        attempts.push(DispatchAttempt {
                            message_id: message.id,
                            channel: Some(kind),
                            attempt_no,
                            status: AttemptStatus::Failed,
                            started_at: attempt_started,
                            finished_at: Utc::now(),
                            error: Some(reason),
                        });
                    }
                    AttemptEnd::Cancelled => {
                        attempts.push(DispatchAttempt {
                            message_id: message.id,
                            channel: Some(kind),
                            attempt_no,
                            status: AttemptStatus::Cancelled,
                            started_at: attempt_started,
                            finished_at: Utc::now(),
                            error: Some("cancelled mid-attempt".to_string()),
                        });
                        return finalize(message, started_at, attempts, FinalStatus::Cancelled, None);
                    }
                    AttemptEnd::DeadlineElapsed => {
                        attempts.push(DispatchAttempt {
                            message_id: message.id,
                            channel: Some(kind),
                            attempt_no,
                            status: AttemptStatus::Cancelled,
                            started_at: attempt_started,
                            finished_at: Utc::now(),
                            error: Some("deadline elapsed mid-attempt".to_string()),
                        });
                        return finalize(message, started_at, attempts, FinalStatus::Expired, None);
                    }
                }

                // Back off before the next attempt on this channel.
                if attempt_on_channel < self.policy.max_attempts_per_channel {
                    let delay = self.policy.delay_after(attempt_on_channel);
                    match cancellable_sleep(delay, deadline, cancel).await {
                        SleepEnd::Slept => {}
                        SleepEnd::Cancelled => {
                            return finalize(
                                message,
                                started_at,
                                attempts,
                                FinalStatus::Cancelled,
                                None,
                            );
                        }
                        SleepEnd::DeadlineElapsed => {
                            return finalize(
                                message,
                                started_at,
                                attempts,
                                FinalStatus::Expired,
                                None,
                            );
                        }
                    }
                }
            }
        }

        warn!(
            message_id = %message.id,
            recipient = %message.recipient,
            attempts = attempt_no,
            "All channels exhausted"
        );
        finalize(
            message,
            started_at,
            attempts,
            FinalStatus::FailedAllChannels,
            None,
        )
    }

    /// Deliver racing: run every candidate channel concurrently with
    /// independent retry loops; the first `Sent` wins and cancels the
    /// rest. Used for urgent traffic.
    pub async fn deliver_racing(
        &self,
        message: &Message,
        target: &Arc<RecipientTarget>,
        channels: &[ChannelKind],
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> DispatchResult {
        if channels.len() <= 1 {
            return self.deliver(message, target, channels, deadline, cancel).await;
        }

        let started_at = Utc::now();
        let race = cancel.child_token();
        let mut tasks = FuturesUnordered::new();
        for &kind in channels {
            let scheduler = self.clone();
            let message = message.clone();
            let target = Arc::clone(target);
            let token = race.clone();
            tasks.push(tokio::spawn(async move {
                scheduler
                    .deliver(&message, &target, &[kind], deadline, &token)
                    .await
            }));
        }

        let mut winner: Option<DispatchResult> = None;
        let mut losers: Vec<DispatchResult> = Vec::new();
        while let Some(joined) = tasks.next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!(message_id = %message.id, "Racing delivery task panicked: {e}");
                    continue;
                }
            };
            if result.is_sent() && winner.is_none() {
                race.cancel();
                winner = Some(result);
            } else {
                losers.push(result);
            }
        }

        // Merge every task's attempt log into one audited receipt,
        // re-ordered by start time so attempt numbering stays strict.
        // Losers that ran before the winner's cancellation reached them
        // stay visible in the history instead of vanishing.
        let mut attempts: Vec<DispatchAttempt> = winner
            .iter()
            .chain(losers.iter())
            .flat_map(|r| r.attempts.clone())
            .collect();
        attempts.sort_by_key(|a| a.started_at);
        for (index, attempt) in attempts.iter_mut().enumerate() {
            attempt.attempt_no = index as u32 + 1;
        }

        if let Some(won) = winner {
            return DispatchResult {
                total_attempts: attempts.len() as u32,
                attempts,
                finished_at: Utc::now(),
                ..won
            };
        }

        let final_status = if cancel.is_cancelled() {
            FinalStatus::Cancelled
        } else if deadline_elapsed(deadline) {
            FinalStatus::Expired
        } else {
            FinalStatus::FailedAllChannels
        };
        finalize(message, started_at, attempts, final_status, None)
    }
}

enum SleepEnd {
    Slept,
    Cancelled,
    DeadlineElapsed,
}

fn deadline_elapsed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

async fn attempt_racing(
    attempt: impl std::future::Future<Output = ChannelOutcome>,
    deadline: Option<Instant>,
    cancel: &CancellationToken,
) -> AttemptEnd {
    tokio::select! {
        outcome = attempt => AttemptEnd::Outcome(outcome),
        _ = cancel.cancelled() => AttemptEnd::Cancelled,
        _ = sleep_until_deadline(deadline) => AttemptEnd::DeadlineElapsed,
    }
}

async fn cancellable_sleep(
    delay: Duration,
    deadline: Option<Instant>,
    cancel: &CancellationToken,
) -> SleepEnd {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {
            if deadline_elapsed(deadline) {
                SleepEnd::DeadlineElapsed
            } else {
                SleepEnd::Slept
            }
        }
        _ = cancel.cancelled() => SleepEnd::Cancelled,
        _ = sleep_until_deadline(deadline) => SleepEnd::DeadlineElapsed,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

fn finalize(
    message: &Message,
    started_at: chrono::DateTime<Utc>,
    attempts: Vec<DispatchAttempt>,
    final_status: FinalStatus,
    backend_used: Option<String>,
) -> DispatchResult {
    DispatchResult {
        message_id: message.id,
        recipient: message.recipient.clone(),
        backend_used: backend_used.unwrap_or_else(|| "none".to_string()),
        final_status,
        total_attempts: attempts.len() as u32,
        attempts,
        started_at,
        finished_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelOutcome, DeliveryChannel};
    use crate::message::Priority;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Test channel that fails `failures` times, then succeeds.
    struct FlakyChannel {
        kind: ChannelKind,
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyChannel {
        fn new(kind: ChannelKind, failures: u32) -> Self {
            Self {
                kind,
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl DeliveryChannel for FlakyChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn attempt(&self, _t: &RecipientTarget, _m: &Message) -> ChannelOutcome {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                ChannelOutcome::Failed("transient".to_string())
            } else {
                ChannelOutcome::Sent
            }
        }
    }

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(1),
            factor: 2,
            cap: Duration::from_millis(4),
            max_attempts_per_channel: 5,
        }
    }

    fn target() -> Arc<RecipientTarget> {
        Arc::new(RecipientTarget {
            recipient_id: "Agent-1".to_string(),
            window_title: "Agent 1".to_string(),
            focus_point: (0, 0),
            input_point: (0, 0),
            fallback_channels: vec![ChannelKind::Http, ChannelKind::FileInbox],
            inbox_path: None,
            http_url: None,
            ws_url: None,
        })
    }

    fn scheduler(channels: Vec<Arc<dyn DeliveryChannel>>) -> RetryScheduler {
        let mut registry = ChannelRegistry::new();
        for channel in channels {
            registry.register(channel);
        }
        RetryScheduler::with_policy(
            Arc::new(registry),
            Arc::new(ChannelHealthBoard::new()),
            fast_policy(),
        )
    }

    #[test]
    fn test_backoff_progression() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(8));
        // Capped at 30s no matter how far the sequence goes.
        assert_eq!(policy.delay_after(10), Duration::from_secs(30));
        assert_eq!(policy.max_total_attempts(3), 15);
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let sched = scheduler(vec![Arc::new(FlakyChannel::new(ChannelKind::Http, 0))]);
        let msg = Message::new("s", "Agent-1", "hi", Priority::Normal);
        let result = sched
            .deliver(&msg, &target(), &[ChannelKind::Http], None, &CancellationToken::new())
            .await;
        assert_eq!(result.final_status, FinalStatus::Sent);
        assert_eq!(result.total_attempts, 1);
        assert_eq!(result.backend_used, "http");
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let sched = scheduler(vec![Arc::new(FlakyChannel::new(ChannelKind::Http, 2))]);
        let msg = Message::new("s", "Agent-1", "hi", Priority::Normal);
        let result = sched
            .deliver(&msg, &target(), &[ChannelKind::Http], None, &CancellationToken::new())
            .await;
        assert_eq!(result.final_status, FinalStatus::Sent);
        assert_eq!(result.total_attempts, 3);
        assert_eq!(result.attempts[0].status, AttemptStatus::Failed);
        assert_eq!(result.attempts[2].status, AttemptStatus::Sent);
    }

    #[tokio::test]
    async fn test_falls_to_next_channel() {
        let sched = scheduler(vec![
            Arc::new(FlakyChannel::new(ChannelKind::Http, u32::MAX)),
            Arc::new(FlakyChannel::new(ChannelKind::FileInbox, 0)),
        ]);
        let msg = Message::new("s", "Agent-1", "hi", Priority::Normal);
        let result = sched
            .deliver(
                &msg,
                &target(),
                &[ChannelKind::Http, ChannelKind::FileInbox],
                None,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result.final_status, FinalStatus::Sent);
        // 5 failed http attempts, then one file_inbox success.
        assert_eq!(result.total_attempts, 6);
        assert_eq!(result.backend_used, "file_inbox");
    }

    #[tokio::test]
    async fn test_all_channels_exhausted_is_bounded() {
        let sched = scheduler(vec![
            Arc::new(FlakyChannel::new(ChannelKind::Http, u32::MAX)),
            Arc::new(FlakyChannel::new(ChannelKind::FileInbox, u32::MAX)),
        ]);
        let msg = Message::new("s", "Agent-1", "hi", Priority::Normal);
        let result = sched
            .deliver(
                &msg,
                &target(),
                &[ChannelKind::Http, ChannelKind::FileInbox],
                None,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result.final_status, FinalStatus::FailedAllChannels);
        assert_eq!(
            result.total_attempts,
            sched.policy().max_total_attempts(2)
        );
        // Strict attempt ordering.
        for (i, attempt) in result.attempts.iter().enumerate() {
            assert_eq!(attempt.attempt_no, i as u32 + 1);
            assert_ne!(attempt.status, AttemptStatus::Pending);
        }
    }

    #[tokio::test]
    async fn test_cancellation_finalizes_without_pending() {
        let sched = scheduler(vec![Arc::new(FlakyChannel::new(ChannelKind::Http, u32::MAX))]);
        let msg = Message::new("s", "Agent-1", "hi", Priority::Normal);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = sched
            .deliver(&msg, &target(), &[ChannelKind::Http], None, &cancel)
            .await;
        assert_eq!(result.final_status, FinalStatus::Cancelled);
        assert!(result
            .attempts
            .iter()
            .all(|a| a.status != AttemptStatus::Pending));
    }

    #[tokio::test]
    async fn test_deadline_produces_expired() {
        let sched = scheduler(vec![Arc::new(FlakyChannel::new(ChannelKind::Http, u32::MAX))]);
        let msg = Message::new("s", "Agent-1", "hi", Priority::Normal);
        let deadline = Some(Instant::now() + Duration::from_millis(3));
        let result = sched
            .deliver(
                &msg,
                &target(),
                &[ChannelKind::Http],
                deadline,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result.final_status, FinalStatus::Expired);
        assert!(result.total_attempts <= sched.policy().max_total_attempts(1));
    }

    #[tokio::test]
    async fn test_racing_first_success_wins() {
        let sched = scheduler(vec![
            Arc::new(FlakyChannel::new(ChannelKind::Http, u32::MAX)),
            Arc::new(FlakyChannel::new(ChannelKind::FileInbox, 0)),
        ]);
        let msg = Message::new("s", "Agent-1", "urgent!", Priority::Urgent);
        let result = sched
            .deliver_racing(
                &msg,
                &target(),
                &[ChannelKind::Http, ChannelKind::FileInbox],
                None,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result.final_status, FinalStatus::Sent);
        assert_eq!(result.backend_used, "file_inbox");
    }

    /// Channel that delivers after a delay, so cancellation catches it
    /// mid-attempt.
    struct SlowChannel {
        kind: ChannelKind,
        delay: Duration,
    }

    #[async_trait]
    impl DeliveryChannel for SlowChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn attempt(&self, _t: &RecipientTarget, _m: &Message) -> ChannelOutcome {
            tokio::time::sleep(self.delay).await;
            ChannelOutcome::Sent
        }
    }

    #[tokio::test]
    async fn test_racing_winner_receipt_keeps_loser_attempts() {
        let sched = scheduler(vec![
            Arc::new(FlakyChannel::new(ChannelKind::Http, 0)),
            Arc::new(SlowChannel {
                kind: ChannelKind::FileInbox,
                delay: Duration::from_millis(50),
            }),
        ]);
        let msg = Message::new("s", "Agent-1", "urgent!", Priority::Urgent);
        let result = sched
            .deliver_racing(
                &msg,
                &target(),
                &[ChannelKind::Http, ChannelKind::FileInbox],
                None,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.final_status, FinalStatus::Sent);
        assert_eq!(result.backend_used, "http");
        // The cancelled file_inbox attempt is audited, not dropped.
        assert!(result
            .attempts
            .iter()
            .any(|a| a.channel == Some(ChannelKind::FileInbox)));
        assert_eq!(result.total_attempts, result.attempts.len() as u32);
        for (i, attempt) in result.attempts.iter().enumerate() {
            assert_eq!(attempt.attempt_no, i as u32 + 1);
        }
    }

    #[tokio::test]
    async fn test_racing_all_fail_merges_attempts() {
        let sched = scheduler(vec![
            Arc::new(FlakyChannel::new(ChannelKind::Http, u32::MAX)),
            Arc::new(FlakyChannel::new(ChannelKind::FileInbox, u32::MAX)),
        ]);
        let msg = Message::new("s", "Agent-1", "urgent!", Priority::Urgent);
        let result = sched
            .deliver_racing(
                &msg,
                &target(),
                &[ChannelKind::Http, ChannelKind::FileInbox],
                None,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result.final_status, FinalStatus::FailedAllChannels);
        assert_eq!(result.total_attempts, sched.policy().max_total_attempts(2));
        for (i, attempt) in result.attempts.iter().enumerate() {
            assert_eq!(attempt.attempt_no, i as u32 + 1);
        }
    }
}
