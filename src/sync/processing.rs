//! Downstream collaborators of the ingestion pipeline.
//!
//! The pipeline never writes business records itself. It asks the ledger
//! whether an item was already handled and how many records a user produced
//! today, and hands items to an [`ItemProcessor`] for labeling and for the
//! heavy work (draft generation) that creates those records.

use crate::error::{StoreError, SyncError};
use crate::sync::DeltaItem;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Read side of the durable side-effect records
#[async_trait]
pub trait ProcessedItemLedger: Send + Sync {
    /// Records created for `user_id` since the start of the current UTC day
    async fn count_today_records_for(&self, user_id: &str) -> Result<u32, StoreError>;

    /// Whether a record already exists for the provider's item id
    async fn exists_record_for_item(&self, item_id: &str) -> Result<bool, StoreError>;
}

/// Result of the light-weight classification pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Label applied to the item (e.g. "needs-reply")
    pub label: String,
    /// Whether the item should go on to heavy processing
    pub needs_processing: bool,
}

impl Classification {
    pub fn new(label: impl Into<String>, needs_processing: bool) -> Self {
        Self {
            label: label.into(),
            needs_processing,
        }
    }
}

#[async_trait]
pub trait ItemProcessor: Send + Sync {
    /// Classify and label. Cheap; runs even when the daily quota is spent.
    async fn classify(&self, user_id: &str, item: &DeltaItem) -> Result<Classification, SyncError>;

    /// Heavy processing. Must create the item's ledger record on success.
    async fn process(
        &self,
        user_id: &str,
        item: &DeltaItem,
        classification: &Classification,
    ) -> Result<(), SyncError>;
}

/// Senders and domains whose items are never processed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderFilter {
    senders: HashSet<String>,
    domains: HashSet<String>,
}

impl SenderFilter {
    pub fn new<S, D>(senders: S, domains: D) -> Self
    where
        S: IntoIterator,
        S::Item: AsRef<str>,
        D: IntoIterator,
        D::Item: AsRef<str>,
    {
        Self {
            senders: senders
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            domains: domains
                .into_iter()
                .map(|d| {
                    d.as_ref()
                        .trim()
                        .trim_start_matches('@')
                        .to_ascii_lowercase()
                })
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }

    /// Union of two filters
    pub fn merged(mut self, other: &SenderFilter) -> Self {
        self.senders.extend(other.senders.iter().cloned());
        self.domains.extend(other.domains.iter().cloned());
        self
    }

    /// Exact address match, or the address's domain (or a parent domain) is excluded
    pub fn is_excluded(&self, sender: &str) -> bool {
        let sender = sender.trim().to_ascii_lowercase();
        if self.senders.contains(&sender) {
            return true;
        }

        let Some((_, mut domain)) = sender.rsplit_once('@') else {
            return false;
        };
        loop {
            if self.domains.contains(domain) {
                return true;
            }
            match domain.split_once('.') {
                Some((_, parent)) if parent.contains('.') => domain = parent,
                _ => return false,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty() && self.domains.is_empty()
    }
}

/// Per-user preferences the pipeline consults
#[async_trait]
pub trait UserSettings: Send + Sync {
    async fn sender_filter(&self, user_id: &str) -> Result<SenderFilter, StoreError>;
}

/// No per-user exclusions; only the configured defaults apply
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUserSettings;

#[async_trait]
impl UserSettings for NoUserSettings {
    async fn sender_filter(&self, _user_id: &str) -> Result<SenderFilter, StoreError> {
        Ok(SenderFilter::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_filter_matching() {
        let filter = SenderFilter::new(
            ["Alerts@Bank.com"],
            ["@newsletters.example.com", "noreply.io"],
        );

        assert!(filter.is_excluded("alerts@bank.com"));
        assert!(!filter.is_excluded("support@bank.com"));
        assert!(filter.is_excluded("weekly@newsletters.example.com"));
        assert!(filter.is_excluded("ops@eu.noreply.io"));
        assert!(!filter.is_excluded("friend@example.com"));
        assert!(!filter.is_excluded("not-an-address"));
    }

    #[test]
    fn test_merge() {
        let defaults = SenderFilter::new(["mailer-daemon@googlemail.com"], Vec::<String>::new());
        let user = SenderFilter::new(Vec::<String>::new(), ["spam.test"]);

        let merged = user.merged(&defaults);
        assert!(merged.is_excluded("mailer-daemon@googlemail.com"));
        assert!(merged.is_excluded("x@spam.test"));
        assert!(!SenderFilter::default().is_excluded("x@spam.test"));
        assert!(SenderFilter::default().is_empty());
    }

    #[tokio::test]
    async fn test_no_user_settings() {
        let filter = NoUserSettings.sender_filter("u1").await.unwrap();
        assert!(filter.is_empty());
    }
}
