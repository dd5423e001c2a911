//! WebSocket channel — connect, push one frame, close.
//!
//! Each attempt opens a fresh connection so a half-dead socket from an
//! earlier attempt can never swallow a retry. The receiving side keys
//! on the embedded message id for its own deduplication.

use super::{ChannelOutcome, DeliveryChannel};
use crate::directory::RecipientTarget;
use crate::message::{ChannelKind, Message};
use async_trait::async_trait;
use futures::SinkExt;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivery via a one-shot WebSocket push.
pub struct WebSocketChannel;

impl WebSocketChannel {
    /// Create a WebSocket channel.
    pub fn new() -> Self {
        Self
    }
}

impl Default for WebSocketChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryChannel for WebSocketChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::WebSocket
    }

    async fn attempt(&self, target: &RecipientTarget, message: &Message) -> ChannelOutcome {
        let url = match &target.ws_url {
            Some(url) => url.clone(),
            None => {
                return ChannelOutcome::Failed(format!(
                    "no websocket endpoint configured for {}",
                    target.recipient_id
                ))
            }
        };

        let payload = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => return ChannelOutcome::Failed(format!("cannot encode message: {e}")),
        };

        let connect = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await;
        let (mut stream, _response) = match connect {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return ChannelOutcome::Failed(format!("connect failed: {e}")),
            Err(_) => return ChannelOutcome::Failed("connect timed out".to_string()),
        };

        if let Err(e) = stream.send(WsMessage::Text(payload)).await {
            return ChannelOutcome::Failed(format!("send failed: {e}"));
        }
        let _ = stream.close(None).await;

        debug!(
            message_id = %message.id,
            recipient = %target.recipient_id,
            "WebSocket delivery pushed"
        );
        ChannelOutcome::Sent
    }
}
