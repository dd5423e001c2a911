//! Agent gateway — message routing and orchestration for a multi-agent
//! coordination platform.
//!
//! The gateway routes messages between named agents over a ladder of
//! delivery channels (simulated input actuation, file inboxes, HTTP,
//! WebSocket) with content-hash deduplication, bounded exponential
//! retry, and channel fallback. Urgent traffic races every candidate
//! channel in parallel; everything else walks the ladder in health
//! order. Every dispatch ends in an auditable receipt.
//!
//! On top of routing, three orchestration layers share the router:
//! - `debate`: structured voting sessions with deterministic tallying
//! - `intervention`: health-triggered protocols with cooldowns
//! - `lifecycle`: agent phase tracking with idle-agent nudging

pub mod channel;
pub mod config;
pub mod debate;
pub mod dedup;
pub mod directory;
pub mod error;
pub mod events;
pub mod intervention;
pub mod ledger;
pub mod lifecycle;
pub mod message;
pub mod retry;
pub mod router;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use message::{DispatchResult, FinalStatus, Message, Priority};
pub use router::MessageRouter;
