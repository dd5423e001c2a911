//! Deduplication guard — sliding-window suppression of repeated content.
//!
//! Keeps a bounded window of recently-accepted content hashes. The
//! insert-and-check is a single critical section so two concurrent sends
//! of identical content cannot both pass.

use crate::message::Message;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default sliding window: long enough to absorb aggressive upstream
/// retries, short enough to let legitimate repeated status messages
/// through in a later window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(300);

/// Default cap on tracked hashes.
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct WindowState {
    /// hash -> when it was accepted.
    seen: HashMap<String, Instant>,
    /// Insertion order, for capacity eviction.
    order: VecDeque<String>,
}

/// Bounded sliding-window set of content hashes.
#[derive(Debug)]
pub struct DeduplicationGuard {
    window: Duration,
    capacity: usize,
    state: Mutex<WindowState>,
}

impl DeduplicationGuard {
    /// Create a guard with an explicit window and capacity.
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(1),
            state: Mutex::new(WindowState::default()),
        }
    }

    /// Atomically check whether `message` duplicates recently-accepted
    /// content, admitting it into the window when it does not.
    ///
    /// Returns `true` when an identical hash was accepted within the
    /// window — the caller must then record a suppressed attempt instead
    /// of invoking any channel.
    pub fn should_suppress(&self, message: &Message) -> bool {
        self.should_suppress_at(message, Instant::now())
    }

    /// Clock-injectable variant of [`should_suppress`](Self::should_suppress).
    pub fn should_suppress_at(&self, message: &Message, now: Instant) -> bool {
        let mut state = self.state.lock().expect("dedup window poisoned");

        // Prune expired entries from the front of the insertion order.
        while let Some(oldest) = state.order.front() {
            let expired = state
                .seen
                .get(oldest)
                .map(|at| now.duration_since(*at) >= self.window)
                .unwrap_or(true);
            if !expired {
                break;
            }
            let hash = state.order.pop_front().expect("front checked above");
            state.seen.remove(&hash);
        }

        if state.seen.contains_key(&message.content_hash) {
            debug!(
                message_id = %message.id,
                recipient = %message.recipient,
                hash = %message.content_hash,
                "Duplicate content suppressed"
            );
            return true;
        }

        // Capacity eviction, oldest first.
        while state.order.len() >= self.capacity {
            if let Some(evicted) = state.order.pop_front() {
                state.seen.remove(&evicted);
            }
        }

        state
            .seen
            .insert(message.content_hash.clone(), now);
        state.order.push_back(message.content_hash.clone());
        false
    }

    /// Number of hashes currently tracked.
    pub fn len(&self) -> usize {
        self.state.lock().expect("dedup window poisoned").seen.len()
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all tracked hashes.
    pub fn clear(&self) {
        let mut state = self.state.lock().expect("dedup window poisoned");
        state.seen.clear();
        state.order.clear();
    }

    /// Configured window length.
    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Default for DeduplicationGuard {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_CAPACITY)
    }
}
