//! Dispatch ledger — bounded audit history of terminal receipts.
//!
//! Every terminal [`DispatchResult`] lands here with its full attempt
//! log, so duplicate-delivery and silent-loss patterns can be
//! reconstructed without manual log forensics.

use crate::message::{DispatchResult, FinalStatus};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Default number of receipts retained.
pub const DEFAULT_LEDGER_CAPACITY: usize = 512;

/// Aggregate counts over the retained receipts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSummary {
    pub sent: usize,
    pub failed_all_channels: usize,
    pub skipped_duplicate: usize,
    pub cancelled: usize,
    pub expired: usize,
}

impl LedgerSummary {
    /// Total receipts counted.
    pub fn total(&self) -> usize {
        self.sent + self.failed_all_channels + self.skipped_duplicate + self.cancelled + self.expired
    }
}

/// Bounded in-memory history of dispatch receipts.
#[derive(Debug)]
pub struct DispatchLedger {
    capacity: usize,
    results: Mutex<VecDeque<DispatchResult>>,
}

impl DispatchLedger {
    /// Create a ledger retaining up to `capacity` receipts.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            results: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a terminal receipt, evicting the oldest at capacity.
    pub fn record(&self, result: DispatchResult) {
        let mut results = self.results.lock().expect("ledger poisoned");
        if results.len() >= self.capacity {
            results.pop_front();
        }
        results.push_back(result);
    }

    /// Most recent `n` receipts, newest last.
    pub fn recent(&self, n: usize) -> Vec<DispatchResult> {
        let results = self.results.lock().expect("ledger poisoned");
        results
            .iter()
            .rev()
            .take(n)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    /// All retained receipts for a recipient.
    pub fn for_recipient(&self, recipient: &str) -> Vec<DispatchResult> {
        let results = self.results.lock().expect("ledger poisoned");
        results
            .iter()
            .filter(|r| r.recipient == recipient)
            .cloned()
            .collect()
    }

    /// All retained receipts with a given terminal status.
    pub fn by_status(&self, status: FinalStatus) -> Vec<DispatchResult> {
        let results = self.results.lock().expect("ledger poisoned");
        results
            .iter()
            .filter(|r| r.final_status == status)
            .cloned()
            .collect()
    }

    /// Aggregate counts per terminal status.
    pub fn summary(&self) -> LedgerSummary {
        let results = self.results.lock().expect("ledger poisoned");
        let mut summary = LedgerSummary::default();
        for result in results.iter() {
            match result.final_status {
                FinalStatus::Sent => summary.sent += 1,
                FinalStatus::FailedAllChannels => summary.failed_all_channels += 1,
                FinalStatus::SkippedDuplicate => summary.skipped_duplicate += 1,
                FinalStatus::Cancelled => summary.cancelled += 1,
                FinalStatus::Expired => summary.expired += 1,
            }
        }
        summary
    }

    /// Number of retained receipts.
    pub fn len(&self) -> usize {
        self.results.lock().expect("ledger poisoned").len()
    }

    /// Whether the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DispatchLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_CAPACITY)
    }
}
