//! # Rate Limiter
//!
//! Fixed-window counters per `(category, identity)` in a shared
//! [`CounterStore`]. The window start is part of the key, so a new window is
//! a new key and the old one simply expires.
//!
//! The limiter fails open: if the store cannot be reached the request is
//! allowed and a warning is logged.

use crate::config::{RateLimitCategory, RateLimitSettings};
use crate::rate_limiting::{CallerIdentity, CounterStore, InMemoryCounterStore, RedisCounterStore, Tier};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of a limit check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Base limit scaled by the caller's tier
    pub limit: u64,
    /// Base remaining scaled by the caller's tier
    pub remaining: u64,
    /// End of the current window
    pub reset_time: DateTime<Utc>,
    pub category: String,
    pub tier: Tier,
}

impl RateLimitDecision {
    /// Time until the window resets, at least one second
    pub fn retry_after(&self) -> Duration {
        self.retry_after_from(Utc::now())
    }

    pub fn retry_after_from(&self, now: DateTime<Utc>) -> Duration {
        let seconds = (self.reset_time - now).num_seconds().max(1);
        Duration::from_secs(seconds as u64)
    }
}

/// Per-category request budgets over a shared counter store
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    settings: RateLimitSettings,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, settings: RateLimitSettings) -> Self {
        Self { store, settings }
    }

    pub fn in_memory(settings: RateLimitSettings) -> Self {
        Self::new(Arc::new(InMemoryCounterStore::new()), settings)
    }

    /// Redis when `redis_url` is configured and reachable, process memory otherwise
    pub async fn from_settings(settings: RateLimitSettings) -> Self {
        let Some(url) = settings.redis_url.clone() else {
            return Self::in_memory(settings);
        };

        match RedisCounterStore::connect(&url).await {
            Ok(store) => Self::new(Arc::new(store), settings),
            Err(e) => {
                warn!(
                    error = %e,
                    "Redis counter store unavailable, limits apply per instance only"
                );
                Self::in_memory(settings)
            }
        }
    }

    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    pub async fn check_limit(
        &self,
        category: &str,
        identity: &CallerIdentity,
        tier: Tier,
    ) -> RateLimitDecision {
        self.check_limit_at(category, identity, tier, Utc::now()).await
    }

    /// Check against the window containing `now`
    pub async fn check_limit_at(
        &self,
        category: &str,
        identity: &CallerIdentity,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let budget = self.settings.category(category);
        let window_start = window_start(now, budget);
        let reset_time = window_start + chrono::Duration::seconds(budget.window_seconds as i64);
        let key = window_key(&self.settings.key_prefix, category, identity, window_start);
        let multiplier = tier.multiplier();

        match self.store.increment_and_get(&key, budget.window()).await {
            Ok(count) => {
                let allowed = count <= budget.max_requests;
                let remaining = budget.max_requests.saturating_sub(count);

                if allowed {
                    debug!(
                        category = category,
                        identity = %identity,
                        count = count,
                        limit = budget.max_requests,
                        "Rate limit check passed"
                    );
                } else {
                    warn!(
                        category = category,
                        identity = %identity,
                        count = count,
                        limit = budget.max_requests,
                        "Rate limit exceeded"
                    );
                }

                RateLimitDecision {
                    allowed,
                    limit: budget.max_requests * multiplier,
                    remaining: remaining * multiplier,
                    reset_time,
                    category: category.to_string(),
                    tier,
                }
            }
            Err(e) => {
                warn!(
                    category = category,
                    identity = %identity,
                    error = %e,
                    "Rate limit store unavailable, allowing request"
                );

                RateLimitDecision {
                    allowed: true,
                    limit: budget.max_requests * multiplier,
                    remaining: budget.max_requests * multiplier,
                    reset_time,
                    category: category.to_string(),
                    tier,
                }
            }
        }
    }
}

/// `now` floored to the category's window length
fn window_start(now: DateTime<Utc>, budget: RateLimitCategory) -> DateTime<Utc> {
    let window = budget.window_seconds.max(1) as i64;
    let start = now.timestamp().div_euclid(window) * window;
    Utc.timestamp_opt(start, 0).single().unwrap_or(now)
}

/// `{prefix}:{category}:{identity}:{window_start}`
pub fn window_key(
    prefix: &str,
    category: &str,
    identity: &CallerIdentity,
    window_start: DateTime<Utc>,
) -> String {
    format!(
        "{}:{}:{}:{}",
        prefix,
        category,
        identity.key(),
        window_start.timestamp()
    )
}
