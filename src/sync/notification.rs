//! Push notification envelopes.
//!
//! Providers publish through a push relay that wraps the payload as
//! `{"message": {"data": <base64>, "messageId": .., "publishTime": ..}}`.
//! The decoded `data` names the mailbox and the new cursor.

use crate::error::{SyncError, SyncResult};
use crate::sync::ProviderKind;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub data: String,
    #[serde(default, alias = "message_id")]
    pub message_id: Option<String>,
    #[serde(default, alias = "publish_time")]
    pub publish_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationData {
    #[serde(alias = "emailAddress")]
    caller_identity: String,
    #[serde(alias = "historyId")]
    cursor_token: CursorToken,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CursorToken {
    Text(String),
    Number(u64),
}

/// A decoded push notification for one mailbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub user_id: String,
    pub provider: ProviderKind,
    pub cursor_token: String,
    pub message_id: Option<String>,
    pub publish_time: Option<String>,
}

impl Notification {
    /// Decode a raw envelope body
    pub fn decode(provider: ProviderKind, body: &[u8]) -> SyncResult<Self> {
        let envelope: PushEnvelope = serde_json::from_slice(body)?;
        Self::from_envelope(provider, envelope)
    }

    pub fn from_envelope(provider: ProviderKind, envelope: PushEnvelope) -> SyncResult<Self> {
        let message = envelope.message;
        let raw = STANDARD
            .decode(message.data.trim())
            .or_else(|_| URL_SAFE.decode(message.data.trim()))
            .map_err(|e| SyncError::MalformedPayload(format!("message data is not base64: {e}")))?;

        let data: NotificationData = serde_json::from_slice(&raw)?;

        let user_id = data.caller_identity.trim().to_string();
        if user_id.is_empty() {
            return Err(SyncError::MalformedPayload(
                "notification names no caller identity".to_string(),
            ));
        }

        let cursor_token = match data.cursor_token {
            CursorToken::Text(text) => text,
            CursorToken::Number(number) => number.to_string(),
        };
        if cursor_token.is_empty() {
            return Err(SyncError::MalformedPayload(
                "notification carries an empty cursor token".to_string(),
            ));
        }

        Ok(Self {
            user_id,
            provider,
            cursor_token,
            message_id: message.message_id,
            publish_time: message.publish_time,
        })
    }

    /// Key under which identical concurrent notifications collapse
    pub fn dedupe_key(&self) -> String {
        format!(
            "ingest:{}:{}:{}",
            self.provider, self.user_id, self.cursor_token
        )
    }
}
