//! Debate session state — phases, votes, and transition validation.

use crate::debate::consensus::DebateOutcome;
use crate::error::{GatewayError, GatewayResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Phase of a debate session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebatePhase {
    /// Votes are being accepted.
    Open,
    /// Quorum or deadline reached; counting.
    Tallying,
    /// Consensus recorded.
    Resolved,
    /// Timed out or the consensus rule was unsatisfied.
    Aborted,
}

impl DebatePhase {
    /// Whether this is a terminal phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Aborted)
    }

    /// Valid transitions from this phase.
    pub fn valid_transitions(self) -> &'static [DebatePhase] {
        match self {
            Self::Open => &[Self::Tallying, Self::Aborted],
            Self::Tallying => &[Self::Resolved, Self::Aborted],
            Self::Resolved | Self::Aborted => &[],
        }
    }
}

impl std::fmt::Display for DebatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Tallying => write!(f, "tallying"),
            Self::Resolved => write!(f, "resolved"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// A participant's choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Yes,
    No,
    Abstain,
}

impl std::fmt::Display for VoteChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yes => write!(f, "yes"),
            Self::No => write!(f, "no"),
            Self::Abstain => write!(f, "abstain"),
        }
    }
}

/// One recorded vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub voter: String,
    pub choice: VoteChoice,
    pub cast_at: DateTime<Utc>,
}

/// A proposal under debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub author: String,
    pub summary: String,
    pub submitted_at: DateTime<Utc>,
}

/// A voting session among a fixed participant set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateSession {
    /// Unique session identifier.
    pub session_id: String,
    /// Topic under debate.
    pub topic: String,
    /// Recipient that opened the session.
    pub initiator: String,
    /// Fixed participant set.
    pub participants: BTreeSet<String>,
    /// Proposals raised during the session, append-only.
    pub proposals: Vec<Proposal>,
    /// Latest vote per participant (last-vote-wins).
    pub votes: HashMap<String, Vote>,
    /// Current phase.
    pub phase: DebatePhase,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Voting deadline.
    pub deadline: DateTime<Utc>,
    /// When the session reached a terminal phase.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Recorded consensus, set on resolution.
    pub outcome: Option<DebateOutcome>,
}

impl DebateSession {
    /// Create a new open session.
    pub fn new(
        topic: &str,
        initiator: &str,
        participants: BTreeSet<String>,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: format!("debate-{}", Uuid::new_v4()),
            topic: topic.to_string(),
            initiator: initiator.to_string(),
            participants,
            proposals: Vec::new(),
            votes: HashMap::new(),
            phase: DebatePhase::Open,
            created_at: Utc::now(),
            deadline,
            resolved_at: None,
            outcome: None,
        }
    }

    /// Record a vote. Rejects non-participants and votes after the
    /// session has left `Open`. A participant voting again replaces
    /// their earlier vote.
    pub fn record_vote(&mut self, voter: &str, choice: VoteChoice) -> GatewayResult<()> {
        if self.phase != DebatePhase::Open {
            return Err(GatewayError::VotingClosed {
                session_id: self.session_id.clone(),
                phase: self.phase.to_string(),
            });
        }
        if !self.participants.contains(voter) {
            return Err(GatewayError::NotAParticipant {
                session_id: self.session_id.clone(),
                voter: voter.to_string(),
            });
        }
        self.votes.insert(
            voter.to_string(),
            Vote {
                voter: voter.to_string(),
                choice,
                cast_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Whether every participant has voted.
    pub fn all_voted(&self) -> bool {
        self.participants
            .iter()
            .all(|p| self.votes.contains_key(p))
    }

    /// Whether the deadline has passed.
    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }

    /// Move to a new phase, validating against the transition table.
    pub fn set_phase(&mut self, to: DebatePhase) -> GatewayResult<()> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(GatewayError::illegal_transition(
                &self.session_id,
                self.phase,
                to,
            ));
        }
        self.phase = to;
        if to.is_terminal() {
            self.resolved_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Whether the session has ended.
    pub fn is_complete(&self) -> bool {
        self.phase.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participants(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn session() -> DebateSession {
        DebateSession::new(
            "adopt new protocol",
            "Agent-1",
            participants(&["Agent-1", "Agent-2", "Agent-3"]),
            Utc::now() + chrono::Duration::minutes(5),
        )
    }

    #[test]
    fn test_new_session_open() {
        let s = session();
        assert_eq!(s.phase, DebatePhase::Open);
        assert!(!s.is_complete());
        assert!(!s.all_voted());
    }

    #[test]
    fn test_record_vote() {
        let mut s = session();
        s.record_vote("Agent-2", VoteChoice::Yes).unwrap();
        assert_eq!(s.votes.len(), 1);
        assert_eq!(s.votes["Agent-2"].choice, VoteChoice::Yes);
    }

    #[test]
    fn test_last_vote_wins() {
        let mut s = session();
        s.record_vote("Agent-2", VoteChoice::Yes).unwrap();
        s.record_vote("Agent-2", VoteChoice::No).unwrap();
        assert_eq!(s.votes.len(), 1);
        assert_eq!(s.votes["Agent-2"].choice, VoteChoice::No);
    }

    #[test]
    fn test_non_participant_rejected() {
        let mut s = session();
        let err = s.record_vote("Agent-9", VoteChoice::Yes).unwrap_err();
        assert!(matches!(err, GatewayError::NotAParticipant { .. }));
    }

    #[test]
    fn test_vote_after_open_rejected() {
        let mut s = session();
        s.set_phase(DebatePhase::Tallying).unwrap();
        let err = s.record_vote("Agent-2", VoteChoice::Yes).unwrap_err();
        assert!(matches!(err, GatewayError::VotingClosed { .. }));
    }

    #[test]
    fn test_all_voted() {
        let mut s = session();
        for agent in ["Agent-1", "Agent-2", "Agent-3"] {
            s.record_vote(agent, VoteChoice::Yes).unwrap();
        }
        assert!(s.all_voted());
    }

    #[test]
    fn test_phase_transitions() {
        let mut s = session();
        s.set_phase(DebatePhase::Tallying).unwrap();
        s.set_phase(DebatePhase::Resolved).unwrap();
        assert!(s.is_complete());
        assert!(s.resolved_at.is_some());

        let err = s.set_phase(DebatePhase::Open).unwrap_err();
        assert!(matches!(err, GatewayError::IllegalTransition { .. }));
    }

    #[test]
    fn test_open_cannot_jump_to_resolved() {
        let mut s = session();
        let err = s.set_phase(DebatePhase::Resolved).unwrap_err();
        assert!(matches!(err, GatewayError::IllegalTransition { .. }));
    }
}
