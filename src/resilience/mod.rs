//! # Resilience Module
//!
//! Fault isolation and retry primitives for calls to third-party providers.
//!
//! ## Architecture
//!
//! - **Circuit Breakers**: Stop calling a dependency after repeated failures
//! - **Registry**: One shared breaker per dependency name, built at startup
//! - **Retry**: Exponential backoff with jitter around any async call
//! - **Guarded calls**: Retry on the outside, breaker on every attempt
//!
//! ## Usage
//!
//! ```rust,no_run
//! use provider_sync::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     reset_timeout: Duration::from_secs(30),
//!     success_threshold: 2,
//! };
//!
//! let breaker = CircuitBreaker::new("gmail", config);
//!
//! let page = breaker
//!     .call(|| async { Ok::<&str, String>("delta page") })
//!     .await?;
//! # let _ = page;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod guarded;
pub mod metrics;
pub mod registry;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitState, StateChangeListener,
};
pub use config::CircuitBreakerConfig;
pub use guarded::guarded_call;
pub use metrics::{CircuitRecord, SystemCircuitMetrics};
pub use registry::Registry;
pub use retry::{
    backoff_delay, is_transient_failure, RetryConfig, RetryExecutor, RetryOutcome,
    RetryPredicate, RetryableError, TRANSIENT_STATUS_CODES,
};
