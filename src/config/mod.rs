//! # Configuration
//!
//! Layered settings for the sync core, loaded once at startup.
//!
//! ## Sources (later wins)
//!
//! - **Defaults**: every section has serde defaults, so an empty file is valid
//! - **TOML file**: `SYNC_CONFIG_PATH`, default `config/provider-sync.toml`
//! - **Environment**: `PROVIDER_SYNC__<SECTION>__<KEY>`, e.g.
//!   `PROVIDER_SYNC__PIPELINE__DAILY_QUOTA=25`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use provider_sync::config::ConfigLoader;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load()?;
//! println!("item concurrency: {}", config.pipeline.item_concurrency);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::{redact_url, ConfigLoader};

use crate::resilience::{CircuitBreakerConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub circuit_breakers: CircuitBreakerSettings,
    pub retry: RetrySettings,
    pub rate_limits: RateLimitSettings,
    pub dedup: DedupSettings,
    pub pipeline: PipelineSettings,
    /// PostgreSQL cursor store; the in-memory store is used when unset
    pub database_url: Option<String>,
    pub web: WebSettings,
}

impl SyncConfig {
    /// Reject settings that would disable a component silently
    pub fn validate(&self) -> ConfigResult<()> {
        if self.circuit_breakers.max_circuit_breakers == 0 {
            return Err(ConfigurationError::invalid_value(
                "circuit_breakers.max_circuit_breakers",
                0,
                "must be greater than 0",
            ));
        }

        self.circuit_breakers
            .default
            .to_resilience_config()
            .validate()
            .map_err(|e| {
                ConfigurationError::validation_error(format!("circuit_breakers.default: {e}"))
            })?;

        for (component, breaker) in &self.circuit_breakers.components {
            breaker.to_resilience_config().validate().map_err(|e| {
                ConfigurationError::validation_error(format!(
                    "circuit_breakers.components.{component}: {e}"
                ))
            })?;
        }

        if self.retry.base_delay_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.base_delay_ms",
                0,
                "must be greater than 0",
            ));
        }

        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "retry.max_delay_ms",
                self.retry.max_delay_ms,
                "must not be lower than retry.base_delay_ms",
            ));
        }

        for (category, limit) in &self.rate_limits.categories {
            if limit.max_requests == 0 || limit.window_seconds == 0 {
                return Err(ConfigurationError::invalid_value(
                    format!("rate_limits.categories.{category}"),
                    format!("{}/{}s", limit.max_requests, limit.window_seconds),
                    "max_requests and window_seconds must be greater than 0",
                ));
            }
        }

        if self.dedup.max_entries == 0 {
            return Err(ConfigurationError::invalid_value(
                "dedup.max_entries",
                0,
                "must be greater than 0",
            ));
        }
        if self.dedup.max_in_flight_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "dedup.max_in_flight_ms",
                0,
                "must be greater than 0",
            ));
        }

        let pipeline = &self.pipeline;
        for (field, value) in [
            ("pipeline.item_concurrency", pipeline.item_concurrency),
            ("pipeline.max_items_per_batch", pipeline.max_items_per_batch),
            ("pipeline.max_delta_pages", pipeline.max_delta_pages as usize),
        ] {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value,
                    "must be greater than 0",
                ));
            }
        }

        if pipeline.reconciliation_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "pipeline.reconciliation_interval_seconds",
                0,
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// Circuit breaker table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Guard provider calls with breakers at all
    pub enabled: bool,

    /// Soft cap; the registry warns past this many breakers
    pub max_circuit_breakers: usize,

    /// Settings for any dependency without its own entry
    pub default: ComponentBreakerConfig,

    /// Per-dependency overrides keyed by breaker name
    pub components: HashMap<String, ComponentBreakerConfig>,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        let mut components = HashMap::new();
        // LLM endpoint flaps more than the mail providers do
        components.insert(
            "llm".to_string(),
            ComponentBreakerConfig {
                failure_threshold: 3,
                ..ComponentBreakerConfig::default()
            },
        );

        Self {
            enabled: true,
            max_circuit_breakers: 50,
            default: ComponentBreakerConfig::default(),
            components,
        }
    }
}

impl CircuitBreakerSettings {
    /// Get configuration for a specific component
    pub fn config_for_component(&self, component_name: &str) -> ComponentBreakerConfig {
        self.components
            .get(component_name)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

/// Circuit breaker settings for one dependency, in config-file units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_timeout_seconds: u64,
}

impl Default for ComponentBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_seconds: 30,
        }
    }
}

impl ComponentBreakerConfig {
    /// Convert to resilience module's format
    pub fn to_resilience_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: Duration::from_secs(self.reset_timeout_seconds),
            success_threshold: self.success_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Request budget for one rate-limit category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitCategory {
    pub max_requests: u64,
    pub window_seconds: u64,
}

impl RateLimitCategory {
    pub const fn new(max_requests: u64, window_seconds: u64) -> Self {
        Self {
            max_requests,
            window_seconds,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

pub const DEFAULT_CATEGORY: &str = "default";

const BUILTIN_CATEGORIES: [(&str, RateLimitCategory); 3] = [
    ("ai", RateLimitCategory::new(10, 3600)),
    ("sync", RateLimitCategory::new(5, 3600)),
    (DEFAULT_CATEGORY, RateLimitCategory::new(100, 3600)),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub categories: HashMap<String, RateLimitCategory>,

    /// Shared counter store; counters stay in process memory when unset
    pub redis_url: Option<String>,

    pub key_prefix: String,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        let mut settings = Self {
            categories: HashMap::new(),
            redis_url: None,
            key_prefix: "ratelimit".to_string(),
        };
        settings.fill_builtin_categories();
        settings
    }
}

impl RateLimitSettings {
    /// Add the built-in categories a config file did not override
    pub fn fill_builtin_categories(&mut self) {
        for (name, limit) in BUILTIN_CATEGORIES {
            self.categories.entry(name.to_string()).or_insert(limit);
        }
    }

    /// Budget for `category`, falling back to the `default` category
    pub fn category(&self, category: &str) -> RateLimitCategory {
        self.categories
            .get(category)
            .or_else(|| self.categories.get(DEFAULT_CATEGORY))
            .copied()
            .unwrap_or(BUILTIN_CATEGORIES[2].1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupSettings {
    pub ttl_ms: u64,
    pub max_entries: usize,
    pub cleanup_interval_ms: u64,
    /// In-flight entries older than this are treated as abandoned
    pub max_in_flight_ms: u64,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            ttl_ms: 5000,
            max_entries: 1000,
            cleanup_interval_ms: 30_000,
            max_in_flight_ms: 900_000,
        }
    }
}

impl DedupSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn max_in_flight(&self) -> Duration {
        Duration::from_millis(self.max_in_flight_ms)
    }
}

/// Ingestion pipeline knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Items processed at once within one notification
    pub item_concurrency: usize,

    /// Items beyond this prefix are reported as overflow
    pub max_items_per_batch: usize,

    /// Heavy-processing budget per user per UTC day
    pub daily_quota: u32,

    /// Page-token hops per delta fetch
    pub max_delta_pages: u32,

    /// Subscription lifetime granted on establish/renew
    pub subscription_renewal_seconds: u64,

    pub reconciliation_interval_seconds: u64,

    /// Exact addresses never processed, merged with each user's own list
    pub excluded_senders: Vec<String>,

    /// Domains never processed, merged with each user's own list
    pub excluded_domains: Vec<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            item_concurrency: 3,
            max_items_per_batch: 10,
            daily_quota: 50,
            max_delta_pages: 5,
            subscription_renewal_seconds: 604_800,
            reconciliation_interval_seconds: 900,
            excluded_senders: vec!["mailer-daemon@googlemail.com".to_string()],
            excluded_domains: Vec::new(),
        }
    }
}

impl PipelineSettings {
    pub fn subscription_renewal(&self) -> Duration {
        Duration::from_secs(self.subscription_renewal_seconds)
    }

    pub fn reconciliation_interval(&self) -> Duration {
        Duration::from_secs(self.reconciliation_interval_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSettings {
    pub bind_address: String,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}
