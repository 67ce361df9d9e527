//! # Request Deduplication
//!
//! Collapses concurrent identical work onto one in-flight future. The first
//! caller for a key creates the future and stores its shared handle before any
//! of the work runs; later callers await the same handle and observe the same
//! value or the same error.
//!
//! Entries do not expire while in flight. Once the work completes the entry
//! lives for `ttl` more, so a slow call is never evicted halfway through.
//! An entry still in flight after `max_in_flight` is treated as abandoned
//! (its only caller was cancelled and nobody is driving it), so the next
//! caller starts fresh and cleanup may drop it. Entries are process-local and
//! lost on restart.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Default age after which in-flight work counts as abandoned
pub const DEFAULT_MAX_IN_FLIGHT: Duration = Duration::from_secs(15 * 60);

/// Invoked with the key whenever a caller joins existing work
pub type DedupeHitListener = Arc<dyn Fn(&str) + Send + Sync>;

type SharedOutcome<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct DedupeEntry<T, E>
where
    T: Clone,
    E: Clone,
{
    handle: SharedOutcome<T, E>,
    generation: u64,
    /// None while in flight
    expires_at: Option<Instant>,
    /// Cutoff for in-flight work
    abandon_at: Instant,
}

impl<T: Clone, E: Clone> DedupeEntry<T, E> {
    fn is_live(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > now,
            None => self.abandon_at > now,
        }
    }
}

/// In-process cache of in-flight and recently completed work
pub struct RequestDeduplicator<T, E>
where
    T: Clone,
    E: Clone,
{
    entries: Arc<DashMap<String, DedupeEntry<T, E>>>,
    ttl: Duration,
    max_entries: usize,
    max_in_flight: Duration,
    next_generation: AtomicU64,
    hit_listener: Option<DedupeHitListener>,
}

impl<T: Clone, E: Clone> fmt::Debug for RequestDeduplicator<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDeduplicator")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

impl<T, E> RequestDeduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            next_generation: AtomicU64::new(1),
            hit_listener: None,
        }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: Duration) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_hit_listener(mut self, listener: DedupeHitListener) -> Self {
        self.hit_listener = Some(listener);
        self
    }

    /// Run `operation` unless live work for `key` already exists, then share its outcome
    pub async fn dedupe<F, Fut>(&self, key: &str, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let now = Instant::now();
        let (handle, hit) = match self.entries.entry(key.to_string()) {
            Entry::Occupied(existing) if existing.get().is_live(now) => {
                (existing.get().handle.clone(), true)
            }
            entry => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let handle = self.track(key, generation, operation());
                entry.insert(DedupeEntry {
                    handle: handle.clone(),
                    generation,
                    expires_at: None,
                    abandon_at: now + self.max_in_flight,
                });
                (handle, false)
            }
        };

        if hit {
            debug!(key = key, "Joining in-flight request");
            if let Some(listener) = &self.hit_listener {
                listener(key);
            }
        } else if self.entries.len() > self.max_entries {
            self.cleanup();
        }

        handle.await
    }

    /// Wrap `work` so completion stamps the entry's expiry
    fn track<Fut>(&self, key: &str, generation: u64, work: Fut) -> SharedOutcome<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let entries: Weak<DashMap<String, DedupeEntry<T, E>>> = Arc::downgrade(&self.entries);
        let key = key.to_string();
        let ttl = self.ttl;

        async move {
            let result = work.await;
            if let Some(entries) = entries.upgrade() {
                if let Some(mut entry) = entries.get_mut(&key) {
                    // A newer entry may have replaced ours after invalidation
                    if entry.generation == generation {
                        entry.expires_at = Some(Instant::now() + ttl);
                    }
                }
            }
            result
        }
        .boxed()
        .shared()
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry whose key matches a glob pattern such as `sync:user-1:*`
    pub fn invalidate_pattern(&self, pattern: &str) -> Result<usize, glob::PatternError> {
        let pattern = glob::Pattern::new(pattern)?;
        let before = self.entries.len();
        self.entries.retain(|key, _| !pattern.matches(key));
        let removed = before.saturating_sub(self.entries.len());

        debug!(pattern = %pattern, removed = removed, "Invalidated dedupe entries");
        Ok(removed)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired and abandoned entries, then evict soonest-to-expire
    /// completed entries while over capacity. Live in-flight entries are
    /// never evicted.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        let mut evicted = before.saturating_sub(self.entries.len());

        let len = self.entries.len();
        if len > self.max_entries {
            let mut completed: Vec<(Instant, String, u64)> = self
                .entries
                .iter()
                .filter_map(|entry| {
                    entry
                        .expires_at
                        .map(|expires_at| (expires_at, entry.key().clone(), entry.generation))
                })
                .collect();
            completed.sort_by_key(|(expires_at, _, _)| *expires_at);

            for (_, key, generation) in completed.into_iter().take(len - self.max_entries) {
                if self
                    .entries
                    .remove_if(&key, |_, entry| entry.generation == generation)
                    .is_some()
                {
                    evicted += 1;
                }
            }
        }

        if evicted > 0 {
            debug!(
                evicted = evicted,
                remaining = self.entries.len(),
                "Dedupe cleanup"
            );
        }
        evicted
    }

    /// Run `cleanup` every `interval` until the deduplicator is dropped
    pub fn spawn_cleanup_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(dedup) => {
                        dedup.cleanup();
                    }
                    None => break,
                }
            }
        })
    }
}
