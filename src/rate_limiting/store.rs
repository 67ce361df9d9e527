//! Shared counter stores for rate-limit windows.
//!
//! The limiter only needs one primitive: atomically bump a counter and read
//! the new value, with the key expiring after the window. Every running
//! instance must point at the same store for limits to hold globally.

use crate::config::loader::redact_url;
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Atomic increment-and-read over expiring keys
#[async_trait]
pub trait CounterStore: Send + Sync + fmt::Debug {
    /// Increment `key`, creating it with a `window` lifetime if absent, and return the new count
    async fn increment_and_get(&self, key: &str, window: Duration) -> Result<u64, StoreError>;
}

/// How often increments sweep out counters from past windows
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Process-local counters, for single-instance deployments and tests
///
/// Window keys are never reused once their window has passed, so expired
/// counters are swept out by whichever increment first lands after
/// `purge_interval`.
#[derive(Debug)]
pub struct InMemoryCounterStore {
    counters: DashMap<String, (u64, Instant)>,
    purge_interval: Duration,
    last_purge: Mutex<Instant>,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::with_purge_interval(DEFAULT_PURGE_INTERVAL)
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_purge_interval(purge_interval: Duration) -> Self {
        Self {
            counters: DashMap::new(),
            purge_interval,
            last_purge: Mutex::new(Instant::now()),
        }
    }

    /// Drop windows that have expired
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        *self.last_purge.lock() = now;

        let before = self.counters.len();
        self.counters.retain(|_, (_, expires_at)| *expires_at > now);
        let purged = before.saturating_sub(self.counters.len());
        if purged > 0 {
            debug!(purged = purged, remaining = self.counters.len(), "Purged expired counters");
        }
        purged
    }

    /// Purge if the interval has passed and no other caller is already purging
    fn maybe_purge(&self, now: Instant) {
        let due = match self.last_purge.try_lock() {
            Some(last) => now.duration_since(*last) >= self.purge_interval,
            None => false,
        };
        if due {
            self.purge_expired();
        }
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment_and_get(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        let count = {
            // The entry guard holds the shard lock, so increment and read are atomic
            let mut entry = self
                .counters
                .entry(key.to_string())
                .or_insert((0, now + window));

            let (count, expires_at) = entry.value_mut();
            if *expires_at <= now {
                *count = 0;
                *expires_at = now + window;
            }
            *count += 1;
            *count
        };

        // Shard guard released above; retain would deadlock against it
        self.maybe_purge(now);
        Ok(count)
    }
}

/// Redis-backed counters shared by every instance
///
/// `INCR` and `EXPIRE .. NX` run in one MULTI/EXEC pipeline, so the expiry is
/// set exactly once per window and never extended by later increments.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection_manager: redis::aio::ConnectionManager,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("connection_manager", &"ConnectionManager")
            .finish()
    }
}

impl RedisCounterStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| {
            StoreError::Connection(format!("Failed to create Redis client: {}", e))
        })?;

        let connection_manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to connect to Redis: {}", e)))?;

        debug!(url = %redact_url(url), "Redis counter store connected");

        Ok(Self { connection_manager })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment_and_get(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let mut conn = self.connection_manager.clone();
        let window_seconds = window.as_secs().max(1);

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(window_seconds)
            .arg("NX")
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!(key = key, count = count, "Rate limit counter incremented");
        Ok(count)
    }
}
