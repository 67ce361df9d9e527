//! Shared fakes for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;
use provider_sync::config::SyncConfig;
use provider_sync::error::{ProviderError, StoreError, SyncError};
use provider_sync::rate_limiting::RateLimiter;
use provider_sync::resilience::Registry;
use provider_sync::sync::{
    Classification, CursorStore, DeltaItem, DeltaProvider, EventIngestionPipeline,
    InMemoryCursorStore, ItemProcessor, PipelineCollaborators, ProcessedItemLedger,
    ProviderKind, SenderFilter, UserSettings,
};
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Config with fast retries and no dedupe retention
pub fn test_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.retry.max_retries = 2;
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config.dedup.ttl_ms = 0;
    config.rate_limits.fill_builtin_categories();
    config
}

/// Gmail history page. Each message is `(id, from, labels)`.
pub fn gmail_page(history_id: &str, messages: &[(&str, &str, &[&str])]) -> Value {
    let history: Vec<Value> = messages
        .iter()
        .map(|(id, from, labels)| {
            json!({
                "messagesAdded": [{
                    "message": {
                        "id": id,
                        "threadId": format!("t-{id}"),
                        "labelIds": labels,
                        "from": from,
                    }
                }]
            })
        })
        .collect();

    json!({ "history": history, "historyId": history_id })
}

/// Push envelope body as a provider would POST it
pub fn push_body(user_id: &str, history_id: u64, message_id: &str) -> Vec<u8> {
    let data = STANDARD.encode(
        json!({ "emailAddress": user_id, "historyId": history_id }).to_string(),
    );
    json!({
        "message": {
            "data": data,
            "messageId": message_id,
            "publishTime": "2026-10-16T08:00:00Z",
        },
        "subscription": "projects/demo/subscriptions/mail-push",
    })
    .to_string()
    .into_bytes()
}

/// Scripted change feed
#[derive(Debug, Default)]
pub struct FakeDeltaProvider {
    responses: Mutex<VecDeque<Result<Value, ProviderError>>>,
    fallback: Mutex<Option<Result<Value, ProviderError>>>,
    calls: Mutex<Vec<(String, Option<String>)>>,
    delay: Mutex<Option<Duration>>,
    panicking: Mutex<bool>,
}

impl FakeDeltaProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Served once, in order
    pub fn push_response(&self, response: Result<Value, ProviderError>) {
        self.responses.lock().push_back(response);
    }

    /// Served whenever the script is empty
    pub fn set_fallback(&self, response: Result<Value, ProviderError>) {
        *self.fallback.lock() = Some(response);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Panic inside `fetch_delta` until switched off
    pub fn set_panicking(&self, panicking: bool) {
        *self.panicking.lock() = panicking;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// `(cursor, page_token)` for each call
    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl DeltaProvider for FakeDeltaProvider {
    async fn fetch_delta(
        &self,
        _user_id: &str,
        _provider: ProviderKind,
        cursor: &str,
        page_token: Option<&str>,
    ) -> Result<Value, ProviderError> {
        self.calls
            .lock()
            .push((cursor.to_string(), page_token.map(str::to_string)));

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if *self.panicking.lock() {
            panic!("delta client blew up for cursor {cursor}");
        }

        let scripted = self.responses.lock().pop_front();
        match scripted {
            Some(response) => response,
            None => self
                .fallback
                .lock()
                .clone()
                .unwrap_or_else(|| Ok(json!({ "history": [] }))),
        }
    }
}

/// In-memory record ledger
#[derive(Debug, Default)]
pub struct FakeLedger {
    records: Mutex<HashSet<String>>,
    today: AtomicU32,
    unavailable: Mutex<bool>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_today_count(self, count: u32) -> Self {
        self.today.store(count, Ordering::SeqCst);
        self
    }

    pub fn insert(&self, item_id: &str) {
        self.records.lock().insert(item_id.to_string());
        self.today.fetch_add(1, Ordering::SeqCst);
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.records.lock().contains(item_id)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }
}

#[async_trait]
impl ProcessedItemLedger for FakeLedger {
    async fn count_today_records_for(&self, _user_id: &str) -> Result<u32, StoreError> {
        if *self.unavailable.lock() {
            return Err(StoreError::Connection("ledger offline".into()));
        }
        Ok(self.today.load(Ordering::SeqCst))
    }

    async fn exists_record_for_item(&self, item_id: &str) -> Result<bool, StoreError> {
        Ok(self.contains(item_id))
    }
}

/// Labels everything `needs-reply` and writes a ledger record on processing
#[derive(Debug)]
pub struct FakeProcessor {
    ledger: Arc<FakeLedger>,
    classified: Mutex<Vec<String>>,
    processed: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeProcessor {
    pub fn new(ledger: Arc<FakeLedger>) -> Self {
        Self {
            ledger,
            classified: Mutex::new(Vec::new()),
            processed: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            panicking: Mutex::new(HashSet::new()),
            delay: Mutex::new(None),
        }
    }

    pub fn fail_on(&self, item_id: &str) {
        self.failing.lock().insert(item_id.to_string());
    }

    pub fn panic_on(&self, item_id: &str) {
        self.panicking.lock().insert(item_id.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn classified(&self) -> Vec<String> {
        let mut ids = self.classified.lock().clone();
        ids.sort();
        ids
    }

    pub fn processed(&self) -> Vec<String> {
        let mut ids = self.processed.lock().clone();
        ids.sort();
        ids
    }
}

#[async_trait]
impl ItemProcessor for FakeProcessor {
    async fn classify(
        &self,
        _user_id: &str,
        item: &DeltaItem,
    ) -> Result<Classification, SyncError> {
        self.classified.lock().push(item.item_id().to_string());
        Ok(Classification::new("needs-reply", true))
    }

    async fn process(
        &self,
        _user_id: &str,
        item: &DeltaItem,
        _classification: &Classification,
    ) -> Result<(), SyncError> {
        let item_id = item.item_id().to_string();

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.panicking.lock().contains(&item_id) {
            panic!("processor blew up on {item_id}");
        }
        if self.failing.lock().contains(&item_id) {
            return Err(SyncError::Processing(format!("draft generation failed for {item_id}")));
        }

        self.ledger.insert(&item_id);
        self.processed.lock().push(item_id);
        Ok(())
    }
}

/// Same exclusions for every user
#[derive(Debug, Default)]
pub struct FixedUserSettings {
    pub filter: SenderFilter,
}

#[async_trait]
impl UserSettings for FixedUserSettings {
    async fn sender_filter(&self, _user_id: &str) -> Result<SenderFilter, StoreError> {
        Ok(self.filter.clone())
    }
}

/// Pipeline wired to fakes, with handles to inspect them
pub struct Harness {
    pub pipeline: EventIngestionPipeline,
    pub cursors: Arc<InMemoryCursorStore>,
    pub provider: Arc<FakeDeltaProvider>,
    pub ledger: Arc<FakeLedger>,
    pub processor: Arc<FakeProcessor>,
    pub rate_limiter: RateLimiter,
}

impl Harness {
    pub fn new(config: SyncConfig) -> Self {
        Self::with_parts(config, FakeLedger::new(), SenderFilter::default())
    }

    pub fn with_parts(config: SyncConfig, ledger: FakeLedger, filter: SenderFilter) -> Self {
        let cursors = Arc::new(InMemoryCursorStore::new());
        let provider = Arc::new(FakeDeltaProvider::new());
        let ledger = Arc::new(ledger);
        let processor = Arc::new(FakeProcessor::new(Arc::clone(&ledger)));
        let rate_limiter = RateLimiter::in_memory(config.rate_limits.clone());
        let registry = Registry::from_settings(&config.circuit_breakers);

        let collaborators = PipelineCollaborators {
            cursors: cursors.clone(),
            provider: provider.clone(),
            ledger: ledger.clone(),
            processor: processor.clone(),
            user_settings: Arc::new(FixedUserSettings { filter }),
        };
        let pipeline =
            EventIngestionPipeline::new(collaborators, &config, registry, rate_limiter.clone());

        Self {
            pipeline,
            cursors,
            provider,
            ledger,
            processor,
            rate_limiter,
        }
    }

    /// Active subscription for `user_id` at `cursor`
    pub async fn subscribe(&self, user_id: &str, cursor: &str) {
        self.pipeline
            .establish_subscription(user_id, ProviderKind::Gmail, cursor)
            .await
            .expect("establish subscription");
    }

    pub async fn stored_cursor(&self, user_id: &str) -> Option<String> {
        self.cursors
            .load(user_id, ProviderKind::Gmail)
            .await
            .expect("load cursor")
            .map(|cursor| cursor.cursor_token)
    }
}
