//! Provider delta payloads.
//!
//! Raw JSON from a provider's change feed is parsed once, at the ingestion
//! boundary, into a tagged [`DeltaItem`] per provider. Anything that does not
//! match the documented shape becomes [`SyncError::MalformedPayload`] here
//! instead of leaking into item processing.

use crate::error::{ProviderError, SyncError, SyncResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported third-party providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gmail,
    Outlook,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gmail => "gmail",
            ProviderKind::Outlook => "outlook",
        }
    }

    /// Circuit breaker guarding this provider's API
    pub fn breaker_name(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gmail" => Ok(ProviderKind::Gmail),
            "outlook" => Ok(ProviderKind::Outlook),
            other => Err(SyncError::MalformedPayload(format!(
                "unknown provider '{other}'"
            ))),
        }
    }
}

/// Whether the user received or sent an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// A message added to a Gmail mailbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailChange {
    pub id: String,
    pub thread_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    pub from: Option<String>,
}

/// A message created or updated in an Outlook mailbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlookChange {
    pub id: String,
    pub conversation_id: Option<String>,
    pub from: Option<OutlookRecipient>,
    pub parent_folder_id: Option<String>,
    #[serde(default)]
    pub is_draft: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlookRecipient {
    pub email_address: OutlookEmailAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlookEmailAddress {
    pub address: String,
    pub name: Option<String>,
}

/// One changed item, tagged by provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", content = "change", rename_all = "lowercase")]
pub enum DeltaItem {
    Gmail(GmailChange),
    Outlook(OutlookChange),
}

impl DeltaItem {
    /// Provider's stable item id, the idempotency key
    pub fn item_id(&self) -> &str {
        match self {
            DeltaItem::Gmail(change) => &change.id,
            DeltaItem::Outlook(change) => &change.id,
        }
    }

    /// Bare sender address, when the provider reported one
    pub fn sender(&self) -> Option<String> {
        match self {
            DeltaItem::Gmail(change) => change.from.as_deref().map(bare_address),
            DeltaItem::Outlook(change) => change
                .from
                .as_ref()
                .map(|from| bare_address(&from.email_address.address)),
        }
    }

    pub fn direction(&self) -> Direction {
        let sent = match self {
            DeltaItem::Gmail(change) => change.label_ids.iter().any(|label| label == "SENT"),
            DeltaItem::Outlook(change) => change
                .parent_folder_id
                .as_deref()
                .is_some_and(|folder| folder.eq_ignore_ascii_case("sentitems")),
        };

        if sent {
            Direction::Outbound
        } else {
            Direction::Inbound
        }
    }

    pub fn provider(&self) -> ProviderKind {
        match self {
            DeltaItem::Gmail(_) => ProviderKind::Gmail,
            DeltaItem::Outlook(_) => ProviderKind::Outlook,
        }
    }
}

/// `"Jane Doe <Jane@Example.com>"` -> `"jane@example.com"`
fn bare_address(raw: &str) -> String {
    let trimmed = raw.trim();
    let address = match (trimmed.rfind('<'), trimmed.rfind('>')) {
        (Some(open), Some(close)) if open < close => &trimmed[open + 1..close],
        _ => trimmed,
    };
    address.trim().to_ascii_lowercase()
}

/// One page of a provider's change feed
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DeltaPage {
    pub items: Vec<DeltaItem>,
    /// Cursor to resume from once every page has been read
    pub next_cursor: Option<String>,
    /// Continuation token for the next page of this delta
    pub page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailHistoryResponse {
    #[serde(default)]
    history: Vec<GmailHistoryRecord>,
    history_id: Option<CursorValue>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailHistoryRecord {
    #[serde(default)]
    messages_added: Vec<GmailMessageAdded>,
}

#[derive(Deserialize)]
struct GmailMessageAdded {
    message: GmailChange,
}

#[derive(Deserialize)]
struct OutlookDeltaResponse {
    value: Vec<serde_json::Value>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink")]
    delta_link: Option<String>,
}

/// Gmail reports history ids as strings or numbers depending on the endpoint
#[derive(Deserialize)]
#[serde(untagged)]
enum CursorValue {
    Text(String),
    Number(u64),
}

impl From<CursorValue> for String {
    fn from(value: CursorValue) -> Self {
        match value {
            CursorValue::Text(text) => text,
            CursorValue::Number(number) => number.to_string(),
        }
    }
}

impl DeltaPage {
    /// Validate a raw provider response and tag its items
    pub fn parse(provider: ProviderKind, raw: serde_json::Value) -> SyncResult<Self> {
        if !raw.is_object() {
            return Err(SyncError::MalformedPayload(format!(
                "{provider} delta response is not a JSON object"
            )));
        }

        match provider {
            ProviderKind::Gmail => Self::parse_gmail(raw),
            ProviderKind::Outlook => Self::parse_outlook(raw),
        }
    }

    fn parse_gmail(raw: serde_json::Value) -> SyncResult<Self> {
        let response: GmailHistoryResponse = serde_json::from_value(raw)
            .map_err(|e| SyncError::MalformedPayload(format!("gmail history: {e}")))?;

        let items = response
            .history
            .into_iter()
            .flat_map(|record| record.messages_added)
            .map(|added| DeltaItem::Gmail(added.message))
            .collect();

        Ok(Self {
            items,
            next_cursor: response.history_id.map(String::from),
            page_token: response.next_page_token,
        })
    }

    fn parse_outlook(raw: serde_json::Value) -> SyncResult<Self> {
        let response: OutlookDeltaResponse = serde_json::from_value(raw)
            .map_err(|e| SyncError::MalformedPayload(format!("outlook delta: {e}")))?;

        let mut items = Vec::with_capacity(response.value.len());
        for entry in response.value {
            // Deletions carry only an id and "@removed"
            if entry.get("@removed").is_some() {
                continue;
            }
            let change: OutlookChange = serde_json::from_value(entry)
                .map_err(|e| SyncError::MalformedPayload(format!("outlook message: {e}")))?;
            if change.is_draft {
                continue;
            }
            items.push(DeltaItem::Outlook(change));
        }

        Ok(Self {
            items,
            next_cursor: response.delta_link,
            page_token: response.next_link,
        })
    }
}

/// Change-feed client for one provider API
#[async_trait]
pub trait DeltaProvider: Send + Sync {
    /// Fetch changes since `cursor`, continuing at `page_token` when set.
    ///
    /// Returns the provider's raw response; parsing happens in the pipeline.
    async fn fetch_delta(
        &self,
        user_id: &str,
        provider: ProviderKind,
        cursor: &str,
        page_token: Option<&str>,
    ) -> Result<serde_json::Value, ProviderError>;
}
