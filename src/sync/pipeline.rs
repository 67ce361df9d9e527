//! # Event Ingestion Pipeline
//!
//! Turns one push notification into processed items and an advanced cursor.
//!
//! ```text
//! notification
//!   │  load cursor ── none / inactive / expired ──▶ drop (acknowledged)
//!   ▼
//! fetch delta pages (breaker + retry) ── failure ──▶ cursor unchanged
//!   │
//!   ▼
//! exclude senders ─▶ bounded batch ─▶ per item:
//!   │                  idempotency ─▶ classify ─▶ quota + "ai" limit ─▶ process
//!   ▼
//! join every item task ─▶ commit cursor ─▶ report
//! ```
//!
//! Nothing is left running when [`EventIngestionPipeline::handle_notification`]
//! returns: the hosting platform may tear the process down right after the
//! response is sent, so every item task is joined first. One item failing (or
//! panicking) never blocks its siblings or the cursor commit.

use crate::config::{PipelineSettings, SyncConfig};
use crate::dedup::RequestDeduplicator;
use crate::error::{ProviderError, SyncError, SyncResult};
use crate::rate_limiting::{CallerIdentity, RateLimiter, Tier};
use crate::resilience::{guarded_call, CircuitBreaker, Registry, RetryExecutor};
use crate::sync::{
    CursorStore, DeltaItem, DeltaPage, DeltaProvider, Direction, ItemProcessor, Notification,
    ProcessedItemLedger, ProviderKind, SenderFilter, SyncCursor, UserSettings,
};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// Rate-limit category charged for each heavy item
pub const AI_RATE_LIMIT_CATEGORY: &str = "ai";

/// Circuit breaker guarding heavy item processing
pub const PROCESSOR_BREAKER: &str = "llm";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A ledger record already exists for the item
    AlreadyProcessed,
    ExcludedSender,
    /// Daily heavy-processing quota spent; the item was still classified
    QuotaExhausted,
    /// `ai` category budget spent; the item was still classified
    RateLimited,
    /// Beyond `max_items_per_batch`
    BatchOverflow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Classified and fully processed
    Processed,
    /// Classified only (outbound, or nothing further to do)
    Classified,
    Skipped(SkipReason),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub item_id: String,
    pub direction: Direction,
    pub label: Option<String>,
    pub outcome: ItemOutcome,
}

impl ItemReport {
    fn new(item: &DeltaItem, outcome: ItemOutcome) -> Self {
        Self {
            item_id: item.item_id().to_string(),
            direction: item.direction(),
            label: None,
            outcome,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    NoSubscription,
    Inactive,
    /// Subscription lapsed before the notification arrived; now deactivated
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum IngestionOutcome {
    Completed,
    Dropped(DropReason),
    /// Delta fetch failed after retries or was rejected by an open circuit
    FetchFailed(String),
    /// Provider credentials expired; the user must re-authenticate
    AuthExpired(String),
    /// Provider no longer recognizes the subscription; now deactivated
    SubscriptionExpired(String),
    /// Cursor store unreachable before any work started
    StoreUnavailable(String),
    /// Items were processed but the cursor could not be written
    CommitFailed(String),
    /// A collaborator panicked mid-run; the cursor was not committed
    Aborted(String),
}

/// What one pipeline run did
#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub user_id: String,
    pub provider: ProviderKind,
    pub outcome: IngestionOutcome,
    pub items: Vec<ItemReport>,
    pub committed_cursor: Option<String>,
    pub duration: Duration,
}

impl IngestionReport {
    fn new(user_id: &str, provider: ProviderKind) -> Self {
        Self {
            user_id: user_id.to_string(),
            provider,
            outcome: IngestionOutcome::Completed,
            items: Vec::new(),
            committed_cursor: None,
            duration: Duration::ZERO,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == IngestionOutcome::Completed
    }

    pub fn count(&self, outcome: &ItemOutcome) -> usize {
        self.items
            .iter()
            .filter(|item| &item.outcome == outcome)
            .count()
    }

    pub fn processed_count(&self) -> usize {
        self.count(&ItemOutcome::Processed)
    }

    pub fn skipped_count(&self, reason: SkipReason) -> usize {
        self.count(&ItemOutcome::Skipped(reason))
    }

    pub fn failed_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item.outcome, ItemOutcome::Failed(_)))
            .count()
    }
}

/// External systems the pipeline reads from and writes through
#[derive(Clone)]
pub struct PipelineCollaborators {
    pub cursors: Arc<dyn CursorStore>,
    pub provider: Arc<dyn DeltaProvider>,
    pub ledger: Arc<dyn ProcessedItemLedger>,
    pub processor: Arc<dyn ItemProcessor>,
    pub user_settings: Arc<dyn UserSettings>,
}

enum Trigger {
    Notification {
        cursor_token: String,
        notified_at: DateTime<Utc>,
    },
    Sweep,
}

struct CollectedDelta {
    items: Vec<DeltaItem>,
    next_cursor: Option<String>,
}

struct PipelineInner {
    collaborators: PipelineCollaborators,
    registry: Registry,
    retry: RetryExecutor,
    rate_limiter: RateLimiter,
    dedup: Arc<RequestDeduplicator<IngestionReport, Infallible>>,
    settings: PipelineSettings,
    dedup_cleanup_interval: Duration,
    breakers_enabled: bool,
    default_filter: SenderFilter,
}

/// Cursor-based ingestion of push notifications
#[derive(Clone)]
pub struct EventIngestionPipeline {
    inner: Arc<PipelineInner>,
}

impl fmt::Debug for EventIngestionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventIngestionPipeline")
            .field("settings", &self.inner.settings)
            .field("breakers_enabled", &self.inner.breakers_enabled)
            .field("in_flight", &self.inner.dedup.len())
            .finish()
    }
}

impl EventIngestionPipeline {
    pub fn new(
        collaborators: PipelineCollaborators,
        config: &SyncConfig,
        registry: Registry,
        rate_limiter: RateLimiter,
    ) -> Self {
        let settings = config.pipeline.clone();
        let default_filter =
            SenderFilter::new(&settings.excluded_senders, &settings.excluded_domains);

        Self {
            inner: Arc::new(PipelineInner {
                collaborators,
                registry,
                retry: RetryExecutor::new(config.retry.to_retry_config()),
                rate_limiter,
                dedup: Arc::new(
                    RequestDeduplicator::new(config.dedup.ttl(), config.dedup.max_entries)
                        .with_max_in_flight(config.dedup.max_in_flight()),
                ),
                settings,
                dedup_cleanup_interval: config.dedup.cleanup_interval(),
                breakers_enabled: config.circuit_breakers.enabled,
                default_filter,
            }),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.inner.settings
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn cursor_store(&self) -> &Arc<dyn CursorStore> {
        &self.inner.collaborators.cursors
    }

    /// Periodically evict completed notification runs from the dedupe cache
    pub fn spawn_dedup_cleanup(&self) -> JoinHandle<()> {
        self.inner
            .dedup
            .spawn_cleanup_task(self.inner.dedup_cleanup_interval)
    }

    /// Activate a subscription at `cursor_token`
    pub async fn establish_subscription(
        &self,
        user_id: &str,
        provider: ProviderKind,
        cursor_token: &str,
    ) -> SyncResult<SyncCursor> {
        let expires_at = Utc::now() + self.renewal_period();
        let cursor = self
            .inner
            .collaborators
            .cursors
            .establish(user_id, provider, cursor_token, expires_at)
            .await?;

        info!(
            user_id = user_id,
            provider = %provider,
            cursor = cursor_token,
            expires_at = %expires_at,
            "Subscription established"
        );
        Ok(cursor)
    }

    pub async fn teardown_subscription(
        &self,
        user_id: &str,
        provider: ProviderKind,
    ) -> SyncResult<()> {
        self.inner
            .collaborators
            .cursors
            .deactivate(user_id, provider)
            .await?;

        info!(user_id = user_id, provider = %provider, "Subscription torn down");
        Ok(())
    }

    /// Ingest one notification. Identical concurrent notifications share a run.
    pub async fn handle_notification(&self, notification: Notification) -> IngestionReport {
        let key = notification.dedupe_key();
        let pipeline = self.clone();

        let result = self
            .inner
            .dedup
            .dedupe(&key, move || async move {
                let trigger = Trigger::Notification {
                    cursor_token: notification.cursor_token.clone(),
                    notified_at: Utc::now(),
                };
                Ok(pipeline
                    .ingest(&notification.user_id, notification.provider, trigger)
                    .await)
            })
            .await;

        match result {
            Ok(report) => report,
            Err(never) => match never {},
        }
    }

    /// Catch up from the stored cursor without a notification
    pub async fn sweep(&self, user_id: &str, provider: ProviderKind) -> IngestionReport {
        let key = format!("sweep:{provider}:{user_id}");
        let pipeline = self.clone();
        let user = user_id.to_string();

        let result = self
            .inner
            .dedup
            .dedupe(&key, move || async move {
                Ok(pipeline.ingest(&user, provider, Trigger::Sweep).await)
            })
            .await;

        match result {
            Ok(report) => report,
            Err(never) => match never {},
        }
    }

    async fn ingest(
        &self,
        user_id: &str,
        provider: ProviderKind,
        trigger: Trigger,
    ) -> IngestionReport {
        let span = tracing::info_span!("ingest", user_id = user_id, provider = %provider);

        async {
            let started = Instant::now();
            let mut report = IngestionReport::new(user_id, provider);
            let run = AssertUnwindSafe(self.run(user_id, provider, trigger, &mut report))
                .catch_unwind()
                .await;
            report.outcome = match run {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(panic = %message, "Ingestion panicked, cursor left unchanged");
                    IngestionOutcome::Aborted(message)
                }
            };
            report.duration = started.elapsed();

            info!(
                outcome = ?report.outcome,
                items = report.items.len(),
                processed = report.processed_count(),
                failed = report.failed_count(),
                committed_cursor = report.committed_cursor.as_deref(),
                duration_ms = report.duration.as_millis() as u64,
                "Ingestion finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        user_id: &str,
        provider: ProviderKind,
        trigger: Trigger,
        report: &mut IngestionReport,
    ) -> IngestionOutcome {
        let cursors = &self.inner.collaborators.cursors;
        let now = Utc::now();

        let cursor = match cursors.load(user_id, provider).await {
            Ok(Some(cursor)) => cursor,
            Ok(None) => {
                info!("No subscription on record, dropping notification");
                return IngestionOutcome::Dropped(DropReason::NoSubscription);
            }
            Err(e) => {
                error!(error = %e, "Cursor store unavailable");
                return IngestionOutcome::StoreUnavailable(e.to_string());
            }
        };

        if !cursor.subscription_active {
            debug!("Subscription inactive, dropping notification");
            return IngestionOutcome::Dropped(DropReason::Inactive);
        }

        if cursor.is_expired(now) {
            warn!(expires_at = ?cursor.expires_at, "Subscription expired, deactivating");
            if let Err(e) = cursors.deactivate(user_id, provider).await {
                warn!(error = %e, "Failed to deactivate expired subscription");
            }
            return IngestionOutcome::Dropped(DropReason::Expired);
        }

        let delta = match self
            .fetch_delta(user_id, provider, &cursor.cursor_token)
            .await
        {
            Ok(delta) => delta,
            Err(SyncError::Provider(ProviderError::AuthExpired(message))) => {
                warn!(
                    cursor = %cursor.cursor_token,
                    "Provider authorization expired, re-authentication required"
                );
                return IngestionOutcome::AuthExpired(message);
            }
            Err(SyncError::Provider(ProviderError::SubscriptionExpired(message))) => {
                warn!("Provider reports subscription expired, deactivating");
                if let Err(e) = cursors.deactivate(user_id, provider).await {
                    warn!(error = %e, "Failed to deactivate expired subscription");
                }
                return IngestionOutcome::SubscriptionExpired(message);
            }
            Err(e) => {
                warn!(
                    cursor = %cursor.cursor_token,
                    error = %e,
                    "Delta fetch failed, cursor left unchanged"
                );
                return IngestionOutcome::FetchFailed(e.to_string());
            }
        };

        if let Err(e) = cursors
            .renew(user_id, provider, now + self.renewal_period())
            .await
        {
            warn!(error = %e, "Failed to renew subscription");
        }

        report.items = self.process_items(user_id, delta.items).await;

        let (commit_token, notified_at) = match trigger {
            Trigger::Notification {
                cursor_token,
                notified_at,
            } => (Some(cursor_token), Some(notified_at)),
            Trigger::Sweep => (delta.next_cursor, None),
        };

        let Some(token) = commit_token else {
            debug!("Provider returned no new cursor, nothing to commit");
            return IngestionOutcome::Completed;
        };

        match cursors.commit(user_id, provider, &token, notified_at).await {
            Ok(()) => {
                debug!(cursor = %token, "Cursor committed");
                report.committed_cursor = Some(token);
                IngestionOutcome::Completed
            }
            Err(e) => {
                error!(cursor = %token, error = %e, "Cursor commit failed");
                IngestionOutcome::CommitFailed(e.to_string())
            }
        }
    }

    /// Follow page tokens from `cursor`, up to `max_delta_pages`
    async fn fetch_delta(
        &self,
        user_id: &str,
        provider: ProviderKind,
        cursor: &str,
    ) -> SyncResult<CollectedDelta> {
        let mut collected = CollectedDelta {
            items: Vec::new(),
            next_cursor: None,
        };
        let mut page_token: Option<String> = None;

        for _ in 0..self.inner.settings.max_delta_pages {
            let raw = self
                .fetch_page(user_id, provider, cursor, page_token.as_deref())
                .await?;
            let page = DeltaPage::parse(provider, raw)?;

            collected.items.extend(page.items);
            if page.next_cursor.is_some() {
                collected.next_cursor = page.next_cursor;
            }

            match page.page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(collected),
            }
        }

        warn!(
            max_delta_pages = self.inner.settings.max_delta_pages,
            "Delta page limit reached, remaining pages left for the next sync"
        );
        Ok(collected)
    }

    async fn fetch_page(
        &self,
        user_id: &str,
        provider: ProviderKind,
        cursor: &str,
        page_token: Option<&str>,
    ) -> SyncResult<serde_json::Value> {
        let api = &self.inner.collaborators.provider;
        let operation = || api.fetch_delta(user_id, provider, cursor, page_token);

        if !self.inner.breakers_enabled {
            let outcome = self.inner.retry.run(operation).await;
            return outcome.result.map_err(SyncError::Provider);
        }

        let breaker = self.inner.registry.get(provider.breaker_name(), None);
        let outcome = guarded_call(&breaker, &self.inner.retry, operation).await;
        if outcome.attempts > 1 {
            debug!(
                attempts = outcome.attempts,
                duration_ms = outcome.total_duration.as_millis() as u64,
                "Delta fetch needed retries"
            );
        }
        outcome.result.map_err(SyncError::from)
    }

    async fn process_items(&self, user_id: &str, items: Vec<DeltaItem>) -> Vec<ItemReport> {
        let inner = &self.inner;
        let collaborators = &inner.collaborators;

        let filter = match collaborators.user_settings.sender_filter(user_id).await {
            Ok(filter) => filter.merged(&inner.default_filter),
            Err(e) => {
                warn!(error = %e, "User settings unavailable, applying default exclusions only");
                inner.default_filter.clone()
            }
        };

        let mut reports: Vec<Option<ItemReport>> = vec![None; items.len()];
        let mut batch = Vec::new();
        for (index, item) in items.into_iter().enumerate() {
            if item
                .sender()
                .is_some_and(|sender| filter.is_excluded(&sender))
            {
                reports[index] = Some(ItemReport::new(
                    &item,
                    ItemOutcome::Skipped(SkipReason::ExcludedSender),
                ));
            } else if batch.len() >= inner.settings.max_items_per_batch {
                reports[index] = Some(ItemReport::new(
                    &item,
                    ItemOutcome::Skipped(SkipReason::BatchOverflow),
                ));
            } else {
                batch.push((index, item));
            }
        }

        if batch.is_empty() {
            return reports.into_iter().flatten().collect();
        }

        let daily_quota = inner.settings.daily_quota;
        let used_today = match collaborators.ledger.count_today_records_for(user_id).await {
            Ok(used) => used,
            Err(e) => {
                warn!(error = %e, "Ledger unavailable, skipping heavy processing for this batch");
                daily_quota
            }
        };

        let context = Arc::new(ItemContext {
            user_id: user_id.to_string(),
            ledger: Arc::clone(&collaborators.ledger),
            processor: Arc::clone(&collaborators.processor),
            rate_limiter: inner.rate_limiter.clone(),
            breaker: inner
                .breakers_enabled
                .then(|| inner.registry.get(PROCESSOR_BREAKER, None)),
            quota: QuotaBudget::new(daily_quota.saturating_sub(used_today)),
        });

        debug!(
            batch = batch.len(),
            quota_remaining = context.quota.remaining(),
            concurrency = inner.settings.item_concurrency,
            "Processing item batch"
        );

        let semaphore = Arc::new(Semaphore::new(inner.settings.item_concurrency));
        let mut tasks = JoinSet::new();

        for (index, item) in batch {
            let context = Arc::clone(&context);
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(
                async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return (
                            index,
                            ItemReport::new(&item, ItemOutcome::Failed("worker pool closed".into())),
                        );
                    };

                    let report = match AssertUnwindSafe(context.process_item(&item))
                        .catch_unwind()
                        .await
                    {
                        Ok(report) => report,
                        Err(_) => {
                            error!(item_id = item.item_id(), "Item processing panicked");
                            ItemReport::new(
                                &item,
                                ItemOutcome::Failed("item processing panicked".into()),
                            )
                        }
                    };
                    (index, report)
                }
                .in_current_span(),
            );
        }

        // Join barrier: nothing outlives this call
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, report)) => reports[index] = Some(report),
                Err(e) => error!(error = %e, "Item task did not complete"),
            }
        }

        reports.into_iter().flatten().collect()
    }

    fn renewal_period(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.inner.settings.subscription_renewal())
            .unwrap_or_else(|_| chrono::Duration::days(7))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "ingestion panicked".to_string())
}

/// Heavy-processing budget shared by one batch's workers
#[derive(Debug)]
struct QuotaBudget {
    remaining: AtomicU32,
}

impl QuotaBudget {
    fn new(remaining: u32) -> Self {
        Self {
            remaining: AtomicU32::new(remaining),
        }
    }

    fn claim(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_ok()
    }

    fn refund(&self) {
        self.remaining.fetch_add(1, Ordering::AcqRel);
    }

    fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Acquire)
    }
}

struct ItemContext {
    user_id: String,
    ledger: Arc<dyn ProcessedItemLedger>,
    processor: Arc<dyn ItemProcessor>,
    rate_limiter: RateLimiter,
    breaker: Option<Arc<CircuitBreaker>>,
    quota: QuotaBudget,
}

impl ItemContext {
    async fn process_item(&self, item: &DeltaItem) -> ItemReport {
        let mut report = ItemReport::new(item, ItemOutcome::Classified);

        match self.ledger.exists_record_for_item(&report.item_id).await {
            Ok(true) => {
                debug!(item_id = %report.item_id, "Item already processed");
                report.outcome = ItemOutcome::Skipped(SkipReason::AlreadyProcessed);
                return report;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(item_id = %report.item_id, error = %e, "Idempotency check failed");
                report.outcome = ItemOutcome::Failed(format!("idempotency check failed: {e}"));
                return report;
            }
        }

        let classification = match self.processor.classify(&self.user_id, item).await {
            Ok(classification) => classification,
            Err(e) => {
                warn!(item_id = %report.item_id, error = %e, "Classification failed");
                report.outcome = ItemOutcome::Failed(e.to_string());
                return report;
            }
        };
        report.label = Some(classification.label.clone());

        if report.direction == Direction::Outbound || !classification.needs_processing {
            return report;
        }

        if !self.quota.claim() {
            debug!(item_id = %report.item_id, "Daily quota exhausted, classification only");
            report.outcome = ItemOutcome::Skipped(SkipReason::QuotaExhausted);
            return report;
        }

        let identity = CallerIdentity::Principal(self.user_id.clone());
        let decision = self
            .rate_limiter
            .check_limit(AI_RATE_LIMIT_CATEGORY, &identity, Tier::Free)
            .await;
        if !decision.allowed {
            self.quota.refund();
            report.outcome = ItemOutcome::Skipped(SkipReason::RateLimited);
            return report;
        }

        let result = match &self.breaker {
            Some(breaker) => breaker
                .call(|| self.processor.process(&self.user_id, item, &classification))
                .await
                .map_err(SyncError::from),
            None => {
                self.processor
                    .process(&self.user_id, item, &classification)
                    .await
            }
        };

        match result {
            Ok(()) => report.outcome = ItemOutcome::Processed,
            Err(e) => {
                // No record was created, so the budget is not spent
                self.quota.refund();
                warn!(item_id = %report.item_id, error = %e, "Item processing failed");
                report.outcome = ItemOutcome::Failed(e.to_string());
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_budget_never_goes_negative() {
        let quota = QuotaBudget::new(2);
        assert!(quota.claim());
        assert!(quota.claim());
        assert!(!quota.claim());
        assert_eq!(quota.remaining(), 0);

        quota.refund();
        assert!(quota.claim());
    }

    #[test]
    fn test_report_counts() {
        let mut report = IngestionReport::new("u1", ProviderKind::Gmail);
        report.items = vec![
            ItemReport {
                item_id: "a".into(),
                direction: Direction::Inbound,
                label: None,
                outcome: ItemOutcome::Processed,
            },
            ItemReport {
                item_id: "b".into(),
                direction: Direction::Inbound,
                label: None,
                outcome: ItemOutcome::Skipped(SkipReason::QuotaExhausted),
            },
            ItemReport {
                item_id: "c".into(),
                direction: Direction::Inbound,
                label: None,
                outcome: ItemOutcome::Failed("boom".into()),
            },
        ];

        assert!(report.is_completed());
        assert_eq!(report.processed_count(), 1);
        assert_eq!(report.skipped_count(SkipReason::QuotaExhausted), 1);
        assert_eq!(report.failed_count(), 1);
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload: Box<dyn std::any::Any + Send> = Box::new(format!("owned {}", 7));
        assert_eq!(panic_message(payload.as_ref()), "owned 7");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "ingestion panicked");
    }

    #[test]
    fn test_outcome_serialization() {
        let value = serde_json::to_value(IngestionOutcome::Dropped(DropReason::Inactive)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"status": "dropped", "detail": "inactive"})
        );
    }
}
