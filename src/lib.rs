#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Provider Sync Core
//!
//! Resilience and incremental-sync core for services that mirror a user's
//! data from third-party providers (Gmail, Outlook) driven by push
//! notifications.
//!
//! ## Module Organization
//!
//! - [`resilience`] - Circuit breakers, retry with backoff, and the breaker registry
//! - [`rate_limiting`] - Fixed-window, per-caller, per-category rate limiting
//! - [`dedup`] - Collapsing of concurrent identical async operations
//! - [`sync`] - Cursors, delta parsing, the ingestion pipeline and reconciliation
//! - [`web`] - Webhook intake, caller-triggered sync and health routes
//! - [`config`] - Layered TOML + environment configuration
//! - [`logging`] - Tracing setup and request correlation
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use provider_sync::config::ConfigLoader;
//! use provider_sync::rate_limiting::RateLimiter;
//! use provider_sync::resilience::Registry;
//! use provider_sync::sync::{EventIngestionPipeline, PipelineCollaborators, ReconciliationSweep};
//! use provider_sync::web::{self, AppState};
//!
//! # async fn example(collaborators: PipelineCollaborators) -> anyhow::Result<()> {
//! provider_sync::logging::init_tracing();
//! let config = ConfigLoader::load()?;
//!
//! let registry = Registry::from_settings(&config.circuit_breakers);
//! let rate_limiter = RateLimiter::from_settings(config.rate_limits.clone()).await;
//! let pipeline =
//!     EventIngestionPipeline::new(collaborators, &config, registry, rate_limiter.clone());
//!
//! let _dedup_cleanup = pipeline.spawn_dedup_cleanup();
//! let sweep = ReconciliationSweep::new(pipeline.clone());
//! let _reconciliation = sweep.clone().spawn(sweep.configured_interval());
//!
//! let app = web::router(AppState::new(pipeline, rate_limiter));
//! web::serve(app, &config.web.bind_address).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test                          # Unit and integration tests
//! cargo test --features test-services # Also against Redis and PostgreSQL
//! ```

pub mod config;
pub mod dedup;
pub mod error;
pub mod logging;
pub mod rate_limiting;
pub mod resilience;
pub mod sync;
pub mod web;

pub use config::{ConfigLoader, SyncConfig};
pub use dedup::RequestDeduplicator;
pub use error::{ProviderError, StoreError, SyncError, SyncResult};
pub use rate_limiting::{CallerIdentity, RateLimitDecision, RateLimiter, Tier};
pub use resilience::{guarded_call, CircuitBreaker, CircuitState, Registry, RetryExecutor};
pub use sync::{EventIngestionPipeline, IngestionOutcome, IngestionReport, ReconciliationSweep};
