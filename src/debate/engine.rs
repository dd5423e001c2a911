//! Debate orchestration over the message router.
//!
//! The engine owns the session map, announces sessions and outcomes
//! through the router, and drives tallying when quorum or the deadline
//! is reached.

use crate::debate::consensus::{tally_votes, ConsensusRule, DebateOutcome, TieBreak};
use crate::debate::session::{DebatePhase, DebateSession, VoteChoice};
use crate::error::{GatewayError, GatewayResult};
use crate::events::GatewayEvent;
use crate::message::{Message, Priority};
use crate::router::MessageRouter;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct DebateConfig {
    /// Consensus rule applied at tally time.
    pub rule: ConsensusRule,
    /// Tie-break policy for even splits.
    pub tie_break: TieBreak,
    /// Voting window from session open to deadline.
    pub voting_window_secs: i64,
    /// Sender name on session and outcome announcements.
    pub moderator_name: String,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            rule: ConsensusRule::SimpleMajority,
            tie_break: TieBreak::AbstainAsNo,
            voting_window_secs: 300,
            moderator_name: "debate-moderator".to_string(),
        }
    }
}

/// Orchestrates debate sessions and announces them via the router.
pub struct DebateEngine {
    router: Arc<MessageRouter>,
    config: DebateConfig,
    sessions: Mutex<HashMap<String, DebateSession>>,
}

impl DebateEngine {
    pub fn new(router: Arc<MessageRouter>, config: DebateConfig) -> Self {
        Self {
            router,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Open a session and announce it to every participant.
    ///
    /// Participants must all resolve in the directory; an unknown name
    /// fails the open before any announcement goes out.
    pub async fn open_session(
        &self,
        topic: &str,
        initiator: &str,
        participants: BTreeSet<String>,
    ) -> GatewayResult<String> {
        if participants.is_empty() {
            return Err(GatewayError::config("debate requires at least one participant"));
        }
        let deadline = Utc::now() + ChronoDuration::seconds(self.config.voting_window_secs);
        let session = DebateSession::new(topic, initiator, participants.clone(), deadline);
        let session_id = session.session_id.clone();

        let mut tags = BTreeSet::new();
        tags.insert("debate".to_string());
        tags.insert(session_id.clone());
        let announcement = Message::with_tags(
            &self.config.moderator_name,
            initiator,
            &format!("Debate opened by {initiator}: {topic} (session {session_id})"),
            Priority::High,
            tags,
        );
        let recipients: Vec<String> = participants.iter().cloned().collect();
        self.router.broadcast(&announcement, &recipients).await?;

        info!(
            session_id = %session_id,
            topic,
            initiator,
            participants = recipients.len(),
            "Debate session opened"
        );
        self.sessions.lock().await.insert(session_id.clone(), session);
        Ok(session_id)
    }

    /// Record a participant's vote. When every participant has voted,
    /// the session tallies immediately.
    ///
    /// The map's copy moves to `Tallying` before the lock is released,
    /// so a vote racing the outcome broadcast is rejected as
    /// `VotingClosed` instead of reopening a session that is already
    /// resolving.
    pub async fn submit_vote(
        &self,
        session_id: &str,
        voter: &str,
        choice: VoteChoice,
    ) -> GatewayResult<Option<DebateOutcome>> {
        let session = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| GatewayError::UnknownSession {
                    session_id: session_id.to_string(),
                })?;
            session.record_vote(voter, choice)?;
            info!(session_id, voter, choice = %choice, "Vote recorded");
            if !session.all_voted() {
                return Ok(None);
            }
            session.set_phase(DebatePhase::Tallying)?;
            session.clone()
        };
        let closed = self.finish_session(session).await?;
        Ok(closed.outcome)
    }

    /// Tally every open session whose deadline has passed. Sessions
    /// with no satisfying vote set abort. Returns the ids of sessions
    /// closed by this sweep.
    ///
    /// Due sessions move to `Tallying` inside the lock, so concurrent
    /// sweeps (or a racing quorum vote) can never both claim the same
    /// session.
    pub async fn poll_deadlines(&self, now: DateTime<Utc>) -> GatewayResult<Vec<String>> {
        let expired: Vec<DebateSession> = {
            let mut sessions = self.sessions.lock().await;
            let mut due = Vec::new();
            for session in sessions.values_mut() {
                if session.phase == DebatePhase::Open && session.deadline_passed(now) {
                    session.set_phase(DebatePhase::Tallying)?;
                    due.push(session.clone());
                }
            }
            due
        };

        let mut closed = Vec::new();
        for session in expired {
            let id = session.session_id.clone();
            self.finish_session(session).await?;
            closed.push(id);
        }
        Ok(closed)
    }

    /// Snapshot of a session by id.
    pub async fn session(&self, session_id: &str) -> GatewayResult<DebateSession> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownSession {
                session_id: session_id.to_string(),
            })
    }

    /// Ids of sessions still accepting votes.
    pub async fn open_sessions(&self) -> Vec<String> {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|s| s.phase == DebatePhase::Open)
            .map(|s| s.session_id.clone())
            .collect()
    }

    /// Drive a session already in `Tallying` to its terminal phase,
    /// record the outcome, publish, and announce to participants.
    /// While this runs, the map's copy sits in `Tallying`, which
    /// rejects votes, so the re-insert at the end cannot clobber a
    /// concurrent mutation.
    async fn finish_session(&self, mut session: DebateSession) -> GatewayResult<DebateSession> {
        let (breakdown, outcome) = tally_votes(
            &session.votes,
            self.config.rule,
            self.config.tie_break,
            &session.initiator,
        );

        match outcome {
            Some(decided) => {
                session.outcome = Some(decided);
                session.set_phase(DebatePhase::Resolved)?;
                info!(
                    session_id = %session.session_id,
                    outcome = %decided,
                    yes = breakdown.yes,
                    no = breakdown.no,
                    abstain = breakdown.abstain,
                    "Debate resolved"
                );
            }
            None => {
                session.set_phase(DebatePhase::Aborted)?;
                warn!(
                    session_id = %session.session_id,
                    votes = breakdown.total(),
                    "Debate aborted, consensus rule unsatisfied"
                );
            }
        }

        self.router.bus().publish(GatewayEvent::DebateClosed {
            session_id: session.session_id.clone(),
            phase: session.phase.to_string(),
            outcome: session.outcome.map(|o| o.to_string()),
            timestamp: Utc::now(),
        });

        let verdict = match session.outcome {
            Some(o) => format!("resolved: {o}"),
            None => "aborted".to_string(),
        };
        let mut tags = BTreeSet::new();
        tags.insert("debate".to_string());
        tags.insert(session.session_id.clone());
        let announcement = Message::with_tags(
            &self.config.moderator_name,
            &session.initiator,
            &format!(
                "Debate {} on \"{}\" {} ({} yes / {} no / {} abstain)",
                session.session_id, session.topic, verdict, breakdown.yes, breakdown.no,
                breakdown.abstain
            ),
            Priority::High,
            tags,
        );
        let recipients: Vec<String> = session.participants.iter().cloned().collect();
        self.router.broadcast(&announcement, &recipients).await?;

        self.sessions
            .lock()
            .await
            .insert(session.session_id.clone(), session.clone());
        Ok(session)
    }
}
