//! Recipient directory — logical names resolved to delivery targets.
//!
//! The roster is loaded exactly once at startup and is read-only
//! afterwards, so concurrent resolution needs no synchronization.
//! Resolution failure is a hard error: there is no default recipient
//! and no nearest-match fallback.

use crate::error::{GatewayError, GatewayResult};
use crate::message::ChannelKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// A screen coordinate pair.
pub type Point = (i32, i32);

/// Fully-resolved delivery target for one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientTarget {
    /// Logical recipient name.
    pub recipient_id: String,
    /// Window title the actuation channel focuses.
    pub window_title: String,
    /// Coordinate clicked to focus the recipient's window.
    pub focus_point: Point,
    /// Coordinate of the recipient's text input.
    pub input_point: Point,
    /// Ordered channel fallback for non-urgent traffic.
    pub fallback_channels: Vec<ChannelKind>,
    /// Inbox file path override; defaults to `<inbox_root>/<id>.jsonl`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbox_path: Option<PathBuf>,
    /// HTTP endpoint for the http channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_url: Option<String>,
    /// WebSocket endpoint for the websocket channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
}

/// Optional per-recipient fields shared by both roster shapes.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawExtras {
    #[serde(default)]
    fallback_channels: Option<Vec<ChannelKind>>,
    #[serde(default)]
    inbox_path: Option<PathBuf>,
    #[serde(default)]
    http_url: Option<String>,
    #[serde(default)]
    ws_url: Option<String>,
}

/// Nested target object (second accepted roster shape).
#[derive(Debug, Clone, Deserialize)]
struct RawNestedTarget {
    window_title: String,
    focus_xy: Point,
    input_xy: Point,
}

/// One roster entry, in either accepted shape. Required keys missing
/// from both shapes fail deserialization, which surfaces as a
/// load-time config error — never a runtime default.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Nested {
        pyautogui_target: RawNestedTarget,
        #[serde(flatten)]
        extras: RawExtras,
    },
    Flat {
        chat_input_coordinates: Point,
        onboarding_coordinates: Point,
        window_title: String,
        #[serde(flatten)]
        extras: RawExtras,
    },
}

impl RawEntry {
    fn normalize(self, recipient_id: &str, default_fallback: &[ChannelKind]) -> RecipientTarget {
        let (window_title, focus_point, input_point, extras) = match self {
            RawEntry::Nested {
                pyautogui_target,
                extras,
            } => (
                pyautogui_target.window_title,
                pyautogui_target.focus_xy,
                pyautogui_target.input_xy,
                extras,
            ),
            RawEntry::Flat {
                chat_input_coordinates,
                onboarding_coordinates,
                window_title,
                extras,
            } => (
                window_title,
                onboarding_coordinates,
                chat_input_coordinates,
                extras,
            ),
        };

        RecipientTarget {
            recipient_id: recipient_id.to_string(),
            window_title,
            focus_point,
            input_point,
            fallback_channels: extras
                .fallback_channels
                .unwrap_or_else(|| default_fallback.to_vec()),
            inbox_path: extras.inbox_path,
            http_url: extras.http_url,
            ws_url: extras.ws_url,
        }
    }
}

/// Read-only lookup from recipient name to delivery target.
#[derive(Debug)]
pub struct RecipientDirectory {
    targets: HashMap<String, Arc<RecipientTarget>>,
}

impl RecipientDirectory {
    /// Load the roster from a JSON file.
    pub fn load(path: &Path, default_fallback: &[ChannelKind]) -> GatewayResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!("cannot read roster {}: {e}", path.display()))
        })?;
        let directory = Self::from_json_str(&raw, default_fallback)?;
        info!(
            roster = %path.display(),
            recipients = directory.len(),
            "Recipient roster loaded"
        );
        Ok(directory)
    }

    /// Parse a roster from a JSON string. Accepts both the flat
    /// coordinate-pair shape and the nested target-object shape.
    pub fn from_json_str(raw: &str, default_fallback: &[ChannelKind]) -> GatewayResult<Self> {
        let entries: HashMap<String, serde_json::Value> = serde_json::from_str(raw)
            .map_err(|e| GatewayError::config(format!("roster is not a JSON object: {e}")))?;

        if entries.is_empty() {
            return Err(GatewayError::config("roster contains no recipients"));
        }

        let mut targets = HashMap::with_capacity(entries.len());
        for (recipient_id, value) in entries {
            let entry: RawEntry = serde_json::from_value(value).map_err(|e| {
                GatewayError::config(format!(
                    "roster entry '{recipient_id}' matches neither accepted shape: {e}"
                ))
            })?;
            let target = entry.normalize(&recipient_id, default_fallback);
            if target.window_title.is_empty() {
                return Err(GatewayError::config(format!(
                    "roster entry '{recipient_id}' has an empty window_title"
                )));
            }
            if target.fallback_channels.is_empty() {
                return Err(GatewayError::config(format!(
                    "roster entry '{recipient_id}' has no candidate channels"
                )));
            }
            debug!(recipient = %recipient_id, window = %target.window_title, "Target normalized");
            targets.insert(recipient_id, Arc::new(target));
        }

        Ok(Self { targets })
    }

    /// Resolve a recipient name to its target.
    ///
    /// Fails with [`GatewayError::UnknownRecipient`] for names outside
    /// the roster — never falls back to another recipient.
    pub fn resolve(&self, recipient_id: &str) -> GatewayResult<Arc<RecipientTarget>> {
        self.targets
            .get(recipient_id)
            .cloned()
            .ok_or_else(|| GatewayError::unknown_recipient(recipient_id))
    }

    /// Whether a recipient exists in the roster.
    pub fn contains(&self, recipient_id: &str) -> bool {
        self.targets.contains_key(recipient_id)
    }

    /// All recipient names, sorted.
    pub fn recipients(&self) -> Vec<String> {
        let mut names: Vec<String> = self.targets.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of recipients in the roster.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
