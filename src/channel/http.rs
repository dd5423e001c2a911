//! HTTP channel — POSTs the message to the recipient's endpoint.
//!
//! The message id travels in an `X-Message-Id` header so receivers can
//! deduplicate on their side if a retry races a slow acknowledgement.

use super::{ChannelOutcome, DeliveryChannel};
use crate::directory::RecipientTarget;
use crate::message::{ChannelKind, Message};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivery via HTTP POST.
pub struct HttpChannel {
    client: reqwest::Client,
}

impl HttpChannel {
    /// Create an HTTP channel with a bounded request timeout.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryChannel for HttpChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Http
    }

    async fn attempt(&self, target: &RecipientTarget, message: &Message) -> ChannelOutcome {
        let url = match &target.http_url {
            Some(url) => url,
            None => {
                return ChannelOutcome::Failed(format!(
                    "no http endpoint configured for {}",
                    target.recipient_id
                ))
            }
        };

        let response = self
            .client
            .post(url)
            .header("X-Message-Id", message.id.to_string())
            .json(message)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                debug!(
                    message_id = %message.id,
                    recipient = %target.recipient_id,
                    status = %resp.status(),
                    "HTTP delivery accepted"
                );
                ChannelOutcome::Sent
            }
            Ok(resp) => ChannelOutcome::Failed(format!("endpoint returned {}", resp.status())),
            Err(e) => ChannelOutcome::Failed(format!("request failed: {e}")),
        }
    }
}
