//! Consensus rules and deterministic tallying.
//!
//! Given the full vote set, the rule, and the tie-break policy, the
//! tally is a pure function: the same inputs always resolve the same
//! way.

use crate::debate::session::{Vote, VoteChoice};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How consensus is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusRule {
    /// More yes than no wins; more no than yes loses.
    SimpleMajority,
    /// Every cast vote must agree; abstentions abort.
    Unanimous,
}

/// Policy for an even yes/no split under [`ConsensusRule::SimpleMajority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The initiator's own vote decides; if the initiator abstained or
    /// did not vote, the tie rejects.
    InitiatorDecides,
    /// Ties resolve to rejection.
    AbstainAsNo,
}

/// Recorded consensus of a resolved session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateOutcome {
    Accepted,
    Rejected,
}

impl std::fmt::Display for DebateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Vote counts at tally time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyBreakdown {
    pub yes: usize,
    pub no: usize,
    pub abstain: usize,
}

impl TallyBreakdown {
    /// Count the vote set.
    pub fn from_votes(votes: &HashMap<String, Vote>) -> Self {
        let mut breakdown = Self::default();
        for vote in votes.values() {
            match vote.choice {
                VoteChoice::Yes => breakdown.yes += 1,
                VoteChoice::No => breakdown.no += 1,
                VoteChoice::Abstain => breakdown.abstain += 1,
            }
        }
        breakdown
    }

    /// Total votes cast, abstentions included.
    pub fn total(&self) -> usize {
        self.yes + self.no + self.abstain
    }
}

/// Apply a consensus rule to a vote set.
///
/// Returns `Some(outcome)` when the rule is satisfied, `None` when it
/// is not (the session then aborts). A session with zero votes never
/// satisfies any rule.
pub fn tally_votes(
    votes: &HashMap<String, Vote>,
    rule: ConsensusRule,
    tie_break: TieBreak,
    initiator: &str,
) -> (TallyBreakdown, Option<DebateOutcome>) {
    let breakdown = TallyBreakdown::from_votes(votes);
    if breakdown.total() == 0 {
        return (breakdown, None);
    }

    let outcome = match rule {
        ConsensusRule::Unanimous => {
            if breakdown.abstain > 0 {
                None
            } else if breakdown.no == 0 {
                Some(DebateOutcome::Accepted)
            } else if breakdown.yes == 0 {
                Some(DebateOutcome::Rejected)
            } else {
                None
            }
        }
        ConsensusRule::SimpleMajority => {
            use std::cmp::Ordering;
            match breakdown.yes.cmp(&breakdown.no) {
                Ordering::Greater => Some(DebateOutcome::Accepted),
                Ordering::Less => Some(DebateOutcome::Rejected),
                Ordering::Equal => Some(break_tie(votes, tie_break, initiator)),
            }
        }
    };

    (breakdown, outcome)
}

fn break_tie(votes: &HashMap<String, Vote>, tie_break: TieBreak, initiator: &str) -> DebateOutcome {
    match tie_break {
        TieBreak::AbstainAsNo => DebateOutcome::Rejected,
        TieBreak::InitiatorDecides => match votes.get(initiator).map(|v| v.choice) {
            Some(VoteChoice::Yes) => DebateOutcome::Accepted,
            _ => DebateOutcome::Rejected,
        },
    }
}
