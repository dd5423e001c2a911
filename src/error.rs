//! Gateway error types
//!
//! Structured errors for routing, configuration, and orchestration.
//! Configuration and addressing errors are fatal and never retried;
//! channel failures are retryable and bounded by the retry scheduler.

use thiserror::Error;

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors that can occur during gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Recipient roster is missing, malformed, or incomplete
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Recipient is not in the roster. Never rerouted to a default target.
    #[error("Unknown recipient: {recipient}")]
    UnknownRecipient { recipient: String },

    /// A single delivery attempt failed on one channel
    #[error("Channel '{channel}' failed: {reason}")]
    ChannelFailure { channel: String, reason: String },

    /// Every candidate channel was exhausted for a message
    #[error("All channels exhausted for message {message_id} after {attempts} attempts")]
    AllChannelsExhausted { message_id: String, attempts: u32 },

    /// Invalid state machine transition (lifecycle or debate)
    #[error("Illegal transition for '{subject}': {from} -> {to}")]
    IllegalTransition {
        subject: String,
        from: String,
        to: String,
    },

    /// Debate session does not exist
    #[error("Unknown debate session: {session_id}")]
    UnknownSession { session_id: String },

    /// Vote submitted by a recipient outside the session's participant set
    #[error("'{voter}' is not a participant in session {session_id}")]
    NotAParticipant { session_id: String, voter: String },

    /// Vote submitted after the session left the open phase
    #[error("Session {session_id} is no longer accepting votes (phase: {phase})")]
    VotingClosed { session_id: String, phase: String },

    /// Intervention protocol does not exist
    #[error("Unknown intervention protocol: {protocol_id}")]
    UnknownProtocol { protocol_id: String },

    /// No lifecycle record registered for a recipient
    #[error("No lifecycle record for recipient: {recipient}")]
    UnknownAgent { recipient: String },

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an unknown recipient error
    pub fn unknown_recipient(recipient: impl Into<String>) -> Self {
        Self::UnknownRecipient {
            recipient: recipient.into(),
        }
    }

    /// Create a channel failure error
    pub fn channel(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ChannelFailure {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Create an illegal transition error
    pub fn illegal_transition(
        subject: impl Into<String>,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        Self::IllegalTransition {
            subject: subject.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Whether this error is transient and worth retrying.
    ///
    /// Only channel-level failures qualify. Config and addressing errors
    /// must surface immediately: retrying a structurally wrong address
    /// only reproduces misrouting.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ChannelFailure { .. } => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}
