//! Circuit breaker + retry composition for provider calls.
//!
//! Every attempt passes through the breaker. An open circuit ends the retry
//! loop at once: no backoff sleep, no attempt consumed. The breaker counts
//! failures per attempt and the executor counts attempts per call, so the two
//! budgets stay independent.

use crate::resilience::{
    CircuitBreaker, CircuitBreakerError, RetryExecutor, RetryOutcome, RetryableError,
};
use std::fmt::Display;
use std::future::Future;

impl<E: RetryableError> RetryableError for CircuitBreakerError<E> {
    fn is_retryable(&self) -> bool {
        match self {
            CircuitBreakerError::CircuitOpen { .. } => false,
            CircuitBreakerError::OperationFailed(inner) => inner.is_retryable(),
        }
    }

    fn consumes_attempt(&self) -> bool {
        !self.is_circuit_open()
    }
}

/// Run `operation` with retries, each attempt guarded by `breaker`.
///
/// `operation` must be lazy: it builds the future, and nothing happens until
/// the breaker admits the attempt and polls it.
pub async fn guarded_call<F, Fut, T, E>(
    breaker: &CircuitBreaker,
    retry: &RetryExecutor,
    mut operation: F,
) -> RetryOutcome<T, CircuitBreakerError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + Display,
{
    retry
        .run(|| {
            let attempt = operation();
            breaker.call(move || attempt)
        })
        .await
}
