//! # Retry Executor
//!
//! Exponential backoff with jitter around an arbitrary async call. The executor
//! never returns early with an error: callers inspect the [`RetryOutcome`].
//!
//! `delay(attempt) = clamp(base_delay * 2^attempt * (1 + jitter), 0, max_delay)`
//! with `jitter` uniform in `[-0.25, 0.25]`, so concurrent callers recovering
//! from the same outage do not retry in lockstep.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// HTTP-like statuses treated as transient
pub const TRANSIENT_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Lower-cased fragments that mark an error message as transient
const TRANSIENT_VOCABULARY: &[&str] = &[
    "econnreset",
    "etimedout",
    "econnrefused",
    "connection reset",
    "connection refused",
    "connection timed out",
    "socket hang up",
    "rate limit",
    "timeout",
    "timed out",
];

const JITTER_RATIO: f64 = 0.25;

/// Default retryability rule: transient vocabulary in the message, or a transient status.
pub fn is_transient_failure(message: &str, status: Option<u16>) -> bool {
    if status.is_some_and(|code| TRANSIENT_STATUS_CODES.contains(&code)) {
        return true;
    }

    let lowered = message.to_ascii_lowercase();
    TRANSIENT_VOCABULARY
        .iter()
        .any(|fragment| lowered.contains(fragment))
}

/// Classification hook for errors passing through the retry executor
pub trait RetryableError {
    /// Whether another attempt may succeed
    fn is_retryable(&self) -> bool;

    /// Whether this failure counts against the attempt budget.
    ///
    /// Policy rejections such as an open circuit never ran the operation.
    fn consumes_attempt(&self) -> bool {
        true
    }
}

impl RetryableError for String {
    fn is_retryable(&self) -> bool {
        is_transient_failure(self, None)
    }
}

impl RetryableError for &str {
    fn is_retryable(&self) -> bool {
        is_transient_failure(self, None)
    }
}

impl RetryableError for std::io::Error {
    fn is_retryable(&self) -> bool {
        use std::io::ErrorKind;
        matches!(
            self.kind(),
            ErrorKind::ConnectionReset
                | ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionAborted
                | ErrorKind::TimedOut
                | ErrorKind::Interrupted
        ) || is_transient_failure(&self.to_string(), None)
    }
}

/// Custom retryability predicate
pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Retry budget and backoff bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts on exhaustion = max_retries + 1
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

/// Result of a retried operation
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// Attempts that actually ran the operation
    pub attempts: u32,
    pub total_duration: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Backoff delay for a zero-based attempt index
pub fn backoff_delay(attempt: u32, base_delay: Duration, max_delay: Duration) -> Duration {
    let jitter = fastrand::f64() * (2.0 * JITTER_RATIO) - JITTER_RATIO;
    let exponential = 2f64.powi(attempt.min(62) as i32);
    let seconds = base_delay.as_secs_f64() * exponential * (1.0 + jitter);

    Duration::from_secs_f64(seconds.clamp(0.0, max_delay.as_secs_f64()))
}

/// Runs operations under a retry budget
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation`, retrying failures the error type classifies as retryable
    pub async fn run<F, Fut, T, E>(&self, operation: F) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + Display,
    {
        self.run_inner(operation, |e: &E| e.is_retryable(), |e: &E| e.consumes_attempt())
            .await
    }

    /// Run `operation`, retrying only failures accepted by `predicate`
    pub async fn run_with_predicate<F, Fut, T, E>(
        &self,
        operation: F,
        predicate: RetryPredicate<E>,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run_inner(operation, |e: &E| predicate(e), |_: &E| true)
            .await
    }

    async fn run_inner<F, Fut, T, E, R, C>(
        &self,
        mut operation: F,
        retryable: R,
        consumes_attempt: C,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        R: Fn(&E) -> bool,
        C: Fn(&E) -> bool,
    {
        let started = Instant::now();
        let mut attempts = 0u32;
        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(value) => {
                    attempts += 1;
                    if attempt > 0 {
                        debug!(attempts = attempts, "Operation succeeded after retry");
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts,
                        total_duration: started.elapsed(),
                    };
                }
                Err(error) => {
                    if consumes_attempt(&error) {
                        attempts += 1;
                    }

                    let exhausted = attempt >= self.config.max_retries;
                    if exhausted || !retryable(&error) {
                        warn!(
                            attempts = attempts,
                            exhausted = exhausted,
                            error = %error,
                            "Operation failed, not retrying"
                        );
                        return RetryOutcome {
                            result: Err(error),
                            attempts,
                            total_duration: started.elapsed(),
                        };
                    }

                    let delay =
                        backoff_delay(attempt, self.config.base_delay, self.config.max_delay);
                    debug!(
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
        }
    }

    #[test]
    fn test_transient_vocabulary() {
        assert!(is_transient_failure("ECONNRESET while reading", None));
        assert!(is_transient_failure("upstream request timeout", None));
        assert!(is_transient_failure("Rate limit exceeded", None));
        assert!(is_transient_failure("bad gateway", Some(502)));
        assert!(!is_transient_failure("invalid grant", Some(400)));
        assert!(!is_transient_failure("not found", None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_k_failures() {
        let executor = RetryExecutor::new(fast_config(3));
        let calls = AtomicU32::new(0);

        let outcome = executor
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("connection reset by peer".to_string())
                } else {
                    Ok(n)
                }
            })
            .await;

        assert!(outcome.success());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_stops_immediately() {
        let executor = RetryExecutor::new(fast_config(5));
        let calls = AtomicU32::new(0);

        let outcome = executor
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("invalid_grant".to_string())
            })
            .await;

        assert!(!outcome.success());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.total_duration, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_makes_max_retries_plus_one_attempts() {
        let executor = RetryExecutor::new(fast_config(3));

        let outcome = executor
            .run(|| async { Err::<(), _>("ETIMEDOUT".to_string()) })
            .await;

        assert_eq!(outcome.attempts, 4);
        assert!(outcome.result.is_err());
        // Three sleeps: at least 75 + 150 + 300 ms of (paused) time elapsed
        assert!(outcome.total_duration >= Duration::from_millis(525));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_predicate_overrides_vocabulary() {
        let executor = RetryExecutor::new(fast_config(2));
        let calls = AtomicU32::new(0);

        let outcome = executor
            .run_with_predicate(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("quota exhausted")
                },
                Arc::new(|e: &&str| e.contains("quota")),
            )
            .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_delay_is_capped() {
        let delay = backoff_delay(10, Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(delay, Duration::from_secs(10));
    }

    proptest! {
        #[test]
        fn prop_backoff_delay_within_jitter_bounds(attempt in 0u32..8, base_ms in 1u64..2_000) {
            let base = Duration::from_millis(base_ms);
            let max = Duration::from_millis(10_000);
            let delay = backoff_delay(attempt, base, max).as_secs_f64() * 1000.0;

            let nominal = base_ms as f64 * 2f64.powi(attempt as i32);
            let lower = (nominal * 0.75).min(10_000.0);
            let upper = (nominal * 1.25).min(10_000.0);

            prop_assert!(delay >= lower - 0.001, "delay {} below {}", delay, lower);
            prop_assert!(delay <= upper + 0.001, "delay {} above {}", delay, upper);
        }
    }
}
