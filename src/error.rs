//! Error types for the provider sync core.
//!

use crate::config::ConfigurationError;
use crate::resilience::{CircuitBreakerError, RetryableError};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a third-party provider call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Connection reset/refused/timed out, or a 5xx-class response
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// HTTP 429-equivalent
    #[error("Provider rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Credentials expired; needs the out-of-band re-authentication flow
    #[error("Provider authorization expired: {0}")]
    AuthExpired(String),

    /// The provider no longer recognises the push subscription
    #[error("Provider subscription expired: {0}")]
    SubscriptionExpired(String),

    /// Non-429 4xx response
    #[error("Permanent provider error ({status}): {message}")]
    Permanent { status: u16, message: String },

    /// Response body did not match the provider's documented shape
    #[error("Malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Map an HTTP-like status code and body to a provider error.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let message = body.into();
        match status {
            429 => ProviderError::RateLimited { retry_after: None },
            401 => ProviderError::AuthExpired(message),
            404 | 410 => ProviderError::SubscriptionExpired(message),
            500..=599 => ProviderError::TransientNetwork(format!("HTTP {status}: {message}")),
            _ => ProviderError::Permanent { status, message },
        }
    }

    /// HTTP-like status associated with this error, when there is one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::RateLimited { .. } => Some(429),
            ProviderError::AuthExpired(_) => Some(401),
            ProviderError::Permanent { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl RetryableError for ProviderError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::TransientNetwork(_) | ProviderError::RateLimited { .. }
        )
    }
}

/// Errors from the durable cursor store and the shared counter store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Store connection error: {0}")]
    Connection(String),

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Stored record is invalid: {0}")]
    InvalidRecord(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Connection(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::InvalidRecord(err.to_string())
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_io_error() || err.is_timeout() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

/// Crate-level error type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Item processing failed: {0}")]
    Processing(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
}

impl SyncError {
    /// True when the failure needs the user to re-authenticate with the provider.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, SyncError::Provider(ProviderError::AuthExpired(_)))
    }
}

impl RetryableError for SyncError {
    fn is_retryable(&self) -> bool {
        match self {
            SyncError::Provider(err) => err.is_retryable(),
            SyncError::Store(StoreError::Connection(_)) => true,
            _ => false,
        }
    }

    fn consumes_attempt(&self) -> bool {
        !matches!(self, SyncError::CircuitOpen { .. })
    }
}

impl From<CircuitBreakerError<SyncError>> for SyncError {
    fn from(err: CircuitBreakerError<SyncError>) -> Self {
        match err {
            CircuitBreakerError::CircuitOpen { component } => SyncError::CircuitOpen { component },
            CircuitBreakerError::OperationFailed(inner) => inner,
        }
    }
}

impl From<CircuitBreakerError<ProviderError>> for SyncError {
    fn from(err: CircuitBreakerError<ProviderError>) -> Self {
        match err {
            CircuitBreakerError::CircuitOpen { component } => SyncError::CircuitOpen { component },
            CircuitBreakerError::OperationFailed(inner) => SyncError::Provider(inner),
        }
    }
}

impl From<ConfigurationError> for SyncError {
    fn from(err: ConfigurationError) -> Self {
        SyncError::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::MalformedPayload(format!("JSON error: {err}"))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
