//! # Rate Limiting
//!
//! Per-category request budgets keyed by caller identity, counted in a store
//! shared across instances (Redis) or in process memory.
//!
//! ```text
//! request ─▶ CallerIdentity::resolve ─▶ RateLimiter::check_limit(category, identity, tier)
//!                                            │
//!                                            ▼
//!                           CounterStore::increment_and_get(key, window)
//! ```

pub mod identity;
pub mod limiter;
pub mod store;
pub mod tier;

pub use identity::CallerIdentity;
pub use limiter::{window_key, RateLimitDecision, RateLimiter};
pub use store::{CounterStore, InMemoryCounterStore, RedisCounterStore};
pub use tier::Tier;
