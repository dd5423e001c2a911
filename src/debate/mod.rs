//! Debate engine — structured multi-recipient voting sessions.
//!
//! Sessions move `Open → Tallying → {Resolved, Aborted}`. Votes are
//! last-vote-wins per participant and only accepted while the session
//! is open. Resolution is deterministic given the vote set, the
//! consensus rule, and the configured tie-break policy.

mod consensus;
mod engine;
mod session;

pub use consensus::{tally_votes, ConsensusRule, DebateOutcome, TallyBreakdown, TieBreak};
pub use engine::{DebateConfig, DebateEngine};
pub use session::{DebatePhase, DebateSession, Proposal, Vote, VoteChoice};
