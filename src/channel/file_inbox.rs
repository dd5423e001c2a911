//! File inbox channel — append-only per-recipient JSONL logs.
//!
//! One JSON object per line, mirroring the message plus `received_at`.
//! A per-process set of already-written message ids makes re-attempts
//! after transient failures idempotent: the same message is never
//! appended twice.

use super::{ChannelOutcome, DeliveryChannel};
use crate::directory::RecipientTarget;
use crate::message::{ChannelKind, Message, Priority};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Cap on remembered message ids. Oldest ids are evicted first; an
/// evicted id that is retried may be appended again, the same bounded
/// semantics the dedup window accepts upstream.
const WRITTEN_SET_CAPACITY: usize = 4096;

/// One line in a recipient's inbox file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxRecord {
    pub message_id: Uuid,
    pub sender: String,
    pub recipient: String,
    pub body: String,
    pub priority: Priority,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

impl InboxRecord {
    fn from_message(message: &Message) -> Self {
        Self {
            message_id: message.id,
            sender: message.sender.clone(),
            recipient: message.recipient.clone(),
            body: message.body.clone(),
            priority: message.priority,
            tags: message.tags.clone(),
            created_at: message.created_at,
            received_at: Utc::now(),
        }
    }
}

/// Bounded set of already-appended message ids, evicting oldest first.
#[derive(Debug, Default)]
struct WrittenSet {
    ids: HashSet<Uuid>,
    order: VecDeque<Uuid>,
}

impl WrittenSet {
    fn contains(&self, id: &Uuid) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: Uuid, capacity: usize) {
        while self.order.len() >= capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
        self.ids.insert(id);
        self.order.push_back(id);
    }
}

/// Delivery by appending to a per-recipient inbox file.
pub struct FileInboxChannel {
    root: PathBuf,
    written_capacity: usize,
    /// Message ids already appended by this process.
    written: Mutex<WrittenSet>,
}

impl FileInboxChannel {
    /// Create a channel rooted at `root`. Targets may override the path
    /// per recipient via `inbox_path`.
    pub fn new(root: PathBuf) -> Self {
        Self::with_written_capacity(root, WRITTEN_SET_CAPACITY)
    }

    fn with_written_capacity(root: PathBuf, written_capacity: usize) -> Self {
        Self {
            root,
            written_capacity: written_capacity.max(1),
            written: Mutex::new(WrittenSet::default()),
        }
    }

    /// Inbox path for a target.
    pub fn inbox_path(&self, target: &RecipientTarget) -> PathBuf {
        target
            .inbox_path
            .clone()
            .unwrap_or_else(|| self.root.join(format!("{}.jsonl", target.recipient_id)))
    }

    async fn append(&self, path: &Path, record: &InboxRecord) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("cannot create inbox dir: {e}"))?;
        }
        let mut line =
            serde_json::to_string(record).map_err(|e| format!("cannot encode record: {e}"))?;
        line.push('\n');

        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| format!("cannot open inbox {}: {e}", path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| format!("cannot append to inbox: {e}"))?;
        file.flush().await.map_err(|e| format!("flush failed: {e}"))?;
        Ok(())
    }
}

#[async_trait]
impl DeliveryChannel for FileInboxChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::FileInbox
    }

    async fn attempt(&self, target: &RecipientTarget, message: &Message) -> ChannelOutcome {
        {
            let written = self.written.lock().expect("inbox set poisoned");
            if written.contains(&message.id) {
                debug!(message_id = %message.id, "Inbox record already written, skipping append");
                return ChannelOutcome::Sent;
            }
        }

        let path = self.inbox_path(target);
        let record = InboxRecord::from_message(message);
        match self.append(&path, &record).await {
            Ok(()) => {
                self.written
                    .lock()
                    .expect("inbox set poisoned")
                    .insert(message.id, self.written_capacity);
                debug!(
                    message_id = %message.id,
                    inbox = %path.display(),
                    "Inbox record appended"
                );
                ChannelOutcome::Sent
            }
            Err(reason) => ChannelOutcome::Failed(reason),
        }
    }
}
