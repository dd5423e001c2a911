//! Message model — envelopes, dispatch attempts, and terminal receipts.
//!
//! A [`Message`] is immutable once created. Its `content_hash` fingerprints
//! `(recipient, body, tags)` within a coarse time bucket and is the key the
//! deduplication guard uses to detect re-delivery storms.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Width of the time bucket folded into the content hash, in seconds.
///
/// Identical content re-sent inside the same bucket hashes identically;
/// legitimate repeats in a later bucket get a fresh hash.
pub const HASH_BUCKET_SECS: i64 = 300;

/// Delivery priority of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    /// Urgent messages race all candidate channels in parallel.
    Urgent,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Kind of delivery channel. Maps one-to-one onto registered
/// channel implementations — no string-based dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Simulated keyboard/mouse input against the recipient's window.
    Actuation,
    /// Append-only per-recipient JSONL inbox file.
    FileInbox,
    /// HTTP POST to the recipient's endpoint.
    Http,
    /// WebSocket push to the recipient's endpoint.
    WebSocket,
}

impl ChannelKind {
    /// All kinds, in the default fallback order.
    pub fn all() -> &'static [ChannelKind] {
        &[
            Self::Actuation,
            Self::FileInbox,
            Self::Http,
            Self::WebSocket,
        ]
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Actuation => write!(f, "actuation"),
            Self::FileInbox => write!(f, "file_inbox"),
            Self::Http => write!(f, "http"),
            Self::WebSocket => write!(f, "websocket"),
        }
    }
}

/// An immutable message addressed to a single recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier.
    pub id: Uuid,
    /// Logical sender name.
    pub sender: String,
    /// Logical recipient name, resolved through the directory at dispatch.
    pub recipient: String,
    /// Message body.
    pub body: String,
    /// Delivery priority.
    pub priority: Priority,
    /// Classification tags. Ordered set so hashing is stable.
    pub tags: BTreeSet<String>,
    /// When the message was created.
    pub created_at: DateTime<Utc>,
    /// Dedup fingerprint of `(recipient, body, tags, time bucket)`.
    pub content_hash: String,
}

impl Message {
    /// Create a new message. The content hash is computed at creation
    /// and never recomputed.
    pub fn new(sender: &str, recipient: &str, body: &str, priority: Priority) -> Self {
        Self::with_tags(sender, recipient, body, priority, BTreeSet::new())
    }

    /// Create a new message with tags.
    pub fn with_tags(
        sender: &str,
        recipient: &str,
        body: &str,
        priority: Priority,
        tags: BTreeSet<String>,
    ) -> Self {
        let created_at = Utc::now();
        let content_hash = compute_content_hash(recipient, body, &tags, created_at);
        Self {
            id: Uuid::new_v4(),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            body: body.to_string(),
            priority,
            tags,
            created_at,
            content_hash,
        }
    }

    /// Re-address the same content to another recipient with a fresh id.
    ///
    /// Used by broadcast fan-out: each copy carries its own recipient-keyed
    /// hash so dedup never cross-suppresses between recipients.
    pub fn for_recipient(&self, recipient: &str) -> Self {
        let created_at = Utc::now();
        let content_hash = compute_content_hash(recipient, &self.body, &self.tags, created_at);
        Self {
            id: Uuid::new_v4(),
            sender: self.sender.clone(),
            recipient: recipient.to_string(),
            body: self.body.clone(),
            priority: self.priority,
            tags: self.tags.clone(),
            created_at,
            content_hash,
        }
    }
}

/// Stable fingerprint over `(recipient, body, tags)` plus a coarse
/// time bucket, hex-truncated to 32 chars.
pub fn compute_content_hash(
    recipient: &str,
    body: &str,
    tags: &BTreeSet<String>,
    at: DateTime<Utc>,
) -> String {
    let bucket = at.timestamp().div_euclid(HASH_BUCKET_SECS);
    let mut hasher = Sha256::new();
    hasher.update(recipient.as_bytes());
    hasher.update([0u8]);
    hasher.update(body.as_bytes());
    hasher.update([0u8]);
    for tag in tags {
        hasher.update(tag.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(bucket.to_le_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..32].to_string()
}

/// Status of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Attempt in flight. Never appears in a terminal result.
    Pending,
    /// Channel confirmed delivery.
    Sent,
    /// Channel reported failure.
    Failed,
    /// Suppressed by the deduplication guard — no channel invoked.
    SkippedDuplicate,
    /// Finalized by cancellation or deadline before completion.
    Cancelled,
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
            Self::SkippedDuplicate => write!(f, "skipped_duplicate"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Record of one delivery attempt on one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchAttempt {
    /// Message this attempt belongs to.
    pub message_id: Uuid,
    /// Channel used. `None` only for dedup-suppressed pseudo-attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelKind>,
    /// 1-indexed, strictly ordered per message across all channels.
    pub attempt_no: u32,
    /// Outcome of the attempt.
    pub status: AttemptStatus,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// When the attempt finished.
    pub finished_at: DateTime<Utc>,
    /// Failure reason, when status is Failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal outcome of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    /// Exactly one channel confirmed delivery.
    Sent,
    /// Every candidate channel was exhausted.
    FailedAllChannels,
    /// Suppressed as a duplicate inside the dedup window.
    SkippedDuplicate,
    /// Cancelled by the caller mid-delivery.
    Cancelled,
    /// Delivery deadline elapsed before any channel succeeded.
    Expired,
}

impl std::fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::FailedAllChannels => write!(f, "failed_all_channels"),
            Self::SkippedDuplicate => write!(f, "skipped_duplicate"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Immutable receipt for one dispatched message.
///
/// Every terminal result carries its full attempt history so duplicate
/// deliveries and silent losses are auditable after the fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResult {
    /// Message this receipt is for.
    pub message_id: Uuid,
    /// Recipient the message was addressed to.
    pub recipient: String,
    /// Label of the backend that served the delivery ("none" if no
    /// channel succeeded).
    pub backend_used: String,
    /// Terminal status.
    pub final_status: FinalStatus,
    /// Total attempts made, including the suppressed pseudo-attempt.
    pub total_attempts: u32,
    /// Full ordered attempt log.
    pub attempts: Vec<DispatchAttempt>,
    /// When dispatch started.
    pub started_at: DateTime<Utc>,
    /// When dispatch finished.
    pub finished_at: DateTime<Utc>,
}

impl DispatchResult {
    /// Whether the message was delivered.
    pub fn is_sent(&self) -> bool {
        self.final_status == FinalStatus::Sent
    }

    /// Compact status line for logs.
    pub fn status_line(&self) -> String {
        format!(
            "[{}] {} -> {} via {} ({} attempts)",
            self.final_status, self.message_id, self.recipient, self.backend_used, self.total_attempts
        )
    }
}
