//! Actuation channel — simulated keyboard/mouse input to a window.
//!
//! The real input synthesizer is an external collaborator injected
//! behind [`InputSynthesizer`]. In dry-run mode the channel never
//! touches it: the would-be actions are logged and the attempt returns
//! `Sent` deterministically, which is what makes the router testable
//! end to end without a display.
//!
//! One simulated input stream can target a given window at a time, so
//! attempts are serialized per recipient with an async mutex.

use super::{ChannelOutcome, DeliveryChannel};
use crate::directory::{Point, RecipientTarget};
use crate::message::{ChannelKind, Message};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Seam to the external screen-automation primitives.
pub trait InputSynthesizer: Send + Sync {
    /// Bring the recipient's window to the foreground and click the
    /// focus point.
    fn focus(&self, window_title: &str, focus_point: Point) -> Result<(), String>;

    /// Click the input point and type the text.
    fn type_text(&self, input_point: Point, text: &str) -> Result<(), String>;
}

/// Delivery via simulated input against the recipient's workstation.
pub struct ActuationChannel {
    dry_run: bool,
    synthesizer: Option<Arc<dyn InputSynthesizer>>,
    /// Per-recipient serialization of the single input stream.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ActuationChannel {
    /// Create an actuation channel. With `dry_run` set, no synthesizer
    /// is needed and attempts succeed deterministically.
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            synthesizer: None,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a real input synthesizer (non-dry-run operation).
    pub fn with_synthesizer(synthesizer: Arc<dyn InputSynthesizer>) -> Self {
        Self {
            dry_run: false,
            synthesizer: Some(synthesizer),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Whether this channel is in dry-run mode.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn recipient_lock(&self, recipient_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("actuation lock map poisoned");
        locks
            .entry(recipient_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl DeliveryChannel for ActuationChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Actuation
    }

    fn backend_label(&self) -> String {
        if self.dry_run {
            "actuation:dry".to_string()
        } else {
            "actuation".to_string()
        }
    }

    async fn attempt(&self, target: &RecipientTarget, message: &Message) -> ChannelOutcome {
        let lock = self.recipient_lock(&target.recipient_id);
        let _guard = lock.lock().await;

        if self.dry_run {
            debug!(
                recipient = %target.recipient_id,
                window = %target.window_title,
                focus = ?target.focus_point,
                input = ?target.input_point,
                message_id = %message.id,
                "Dry run: would focus window and type message"
            );
            return ChannelOutcome::Sent;
        }

        let synthesizer = match &self.synthesizer {
            Some(s) => s,
            None => {
                warn!(
                    recipient = %target.recipient_id,
                    "Actuation attempted without an input synthesizer attached"
                );
                return ChannelOutcome::Failed("no input synthesizer attached".to_string());
            }
        };

        if let Err(reason) = synthesizer.focus(&target.window_title, target.focus_point) {
            return ChannelOutcome::Failed(format!("focus failed: {reason}"));
        }
        if let Err(reason) = synthesizer.type_text(target.input_point, &message.body) {
            return ChannelOutcome::Failed(format!("type failed: {reason}"));
        }

        debug!(
            recipient = %target.recipient_id,
            message_id = %message.id,
            "Actuation delivery complete"
        );
        ChannelOutcome::Sent
    }
}
