//! # Circuit Breaker Implementation
//!
//! Provides fault isolation for calls to third-party providers so a failing
//! dependency is not hammered by every incoming notification. Three states:
//! Closed (normal operation), Open (failing fast), and Half-Open (testing recovery).
//!
//! Transitions:
//!
//! ```text
//!            failures >= failure_threshold
//!   Closed ─────────────────────────────────▶ Open
//!     ▲                                        │  elapsed >= reset_timeout
//!     │ successes >= success_threshold         ▼
//!     └─────────────────────────────────── HalfOpen ──(any failure)──▶ Open
//! ```

use crate::resilience::{CircuitBreakerConfig, CircuitRecord};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Observability hook invoked as `(previous, new, dependency_name)` on every transition
pub type StateChangeListener = Arc<dyn Fn(CircuitState, CircuitState, &str) + Send + Sync>;

/// Lock-free counters backing a breaker's [`CircuitRecord`].
#[derive(Debug, Default)]
struct AtomicCircuitCounters {
    total_requests: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    rejection_count: AtomicU64,
    consecutive_failures: AtomicU64,
    consecutive_successes: AtomicU64,
    /// Epoch millis, 0 = never
    last_failure_millis: AtomicU64,
    /// Epoch millis, 0 = never
    last_success_millis: AtomicU64,
}

impl AtomicCircuitCounters {
    #[inline]
    fn record_success(&self) -> u64 {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.last_success_millis
            .store(epoch_millis_now(), Ordering::Relaxed);
        self.consecutive_successes.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[inline]
    fn record_failure(&self) -> u64 {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.last_failure_millis
            .store(epoch_millis_now(), Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[inline]
    fn reset_consecutive(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.consecutive_successes.store(0, Ordering::Release);
    }

    fn snapshot(&self, name: &str, state: CircuitState) -> CircuitRecord {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let failure_count = self.failure_count.load(Ordering::Relaxed);
        let failure_rate = if total_requests > 0 {
            failure_count as f64 / total_requests as f64
        } else {
            0.0
        };

        CircuitRecord {
            name: name.to_string(),
            state,
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            consecutive_successes: self.consecutive_successes.load(Ordering::Relaxed),
            last_failure_at: millis_to_datetime(self.last_failure_millis.load(Ordering::Relaxed)),
            last_success_at: millis_to_datetime(self.last_success_millis.load(Ordering::Relaxed)),
            total_requests,
            failure_count,
            success_count: self.success_count.load(Ordering::Relaxed),
            rejection_count: self.rejection_count.load(Ordering::Relaxed),
            failure_rate,
        }
    }
}

#[inline]
fn epoch_millis_now() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

fn millis_to_datetime(millis: u64) -> Option<DateTime<Utc>> {
    if millis == 0 {
        return None;
    }
    Utc.timestamp_millis_opt(millis as i64).single()
}

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - one probe call at a time decides the next state
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open, // Default to safest state
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the operation was not run
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Operation ran, failed, and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitBreakerError::CircuitOpen { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    /// The one half-open trial call
    Probe,
    Rejected,
}

/// Holds the half-open probe slot until dropped
struct ProbeSlot<'a>(&'a AtomicBool);

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Per-dependency circuit breaker with atomic state management
pub struct CircuitBreaker {
    /// Dependency name for logging and metrics
    name: String,

    /// Current circuit state (atomic for thread safety)
    state: AtomicU8,

    config: CircuitBreakerConfig,

    counters: AtomicCircuitCounters,

    /// Reference point for `opened_at_nanos`
    epoch: Instant,

    /// Nanos since `epoch` (+1) of the failure that opened the circuit; 0 = not open
    opened_at_nanos: AtomicU64,

    /// Set while the single half-open probe is running
    probe_in_flight: AtomicBool,

    listener: RwLock<Option<StateChangeListener>>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .field("has_listener", &self.listener.read().is_some())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            reset_timeout_ms = config.reset_timeout.as_millis() as u64,
            success_threshold = config.success_threshold,
            "Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            counters: AtomicCircuitCounters::default(),
            epoch: Instant::now(),
            opened_at_nanos: AtomicU64::new(0),
            probe_in_flight: AtomicBool::new(false),
            listener: RwLock::new(None),
        }
    }

    /// Create a breaker that reports transitions to `listener`
    pub fn with_listener(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        listener: StateChangeListener,
    ) -> Self {
        let breaker = Self::new(name, config);
        breaker.set_state_listener(listener);
        breaker
    }

    /// Replace the state-change listener
    pub fn set_state_listener(&self, listener: StateChangeListener) {
        *self.listener.write() = Some(listener);
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// Returns `CircuitOpen` without running `operation` while the circuit is
    /// open and the reset timeout has not elapsed.
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit();
        if admission == Admission::Rejected {
            self.counters.rejection_count.fetch_add(1, Ordering::Relaxed);
            debug!(component = %self.name, state = %self.state(), "Rejecting call");
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
            });
        }

        // Released on drop, so a cancelled or panicking probe frees the slot
        let _probe = (admission == Admission::Probe).then(|| ProbeSlot(&self.probe_in_flight));

        let start_time = Instant::now();
        let result = operation().await;
        let duration = start_time.elapsed();

        match &result {
            Ok(_) => self.record_success(duration),
            Err(_) => self.record_failure(duration),
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Decide whether a call may run in the current state
    fn admit(&self) -> Admission {
        if self.state() == CircuitState::Open {
            let opened = self.opened_at_nanos.load(Ordering::Acquire);
            if opened == 0 {
                warn!(component = %self.name, "Circuit open but no timestamp recorded");
                return Admission::Normal;
            }

            let now = self.nanos_since_epoch();
            let elapsed = Duration::from_nanos(now.saturating_sub(opened - 1));
            if elapsed < self.config.reset_timeout {
                return Admission::Rejected;
            }

            // Losing this race is fine: the state is re-read below
            self.transition(CircuitState::Open, CircuitState::HalfOpen);
        }

        match self.state() {
            CircuitState::Closed => Admission::Normal,
            CircuitState::Open => Admission::Rejected,
            CircuitState::HalfOpen => {
                if self
                    .probe_in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
        }
    }

    fn record_success(&self, duration: Duration) {
        let successes = self.counters.record_success();

        debug!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            "Operation succeeded"
        );

        match self.state() {
            CircuitState::HalfOpen => {
                if successes >= u64::from(self.config.success_threshold) {
                    self.transition(CircuitState::HalfOpen, CircuitState::Closed);
                }
            }
            CircuitState::Closed => {
                self.counters.reset_consecutive();
            }
            CircuitState::Open => {
                // A call admitted before a concurrent trip finished late.
                debug!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    fn record_failure(&self, duration: Duration) {
        let failures = self.counters.record_failure();

        warn!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            consecutive_failures = failures,
            "Operation failed"
        );

        match self.state() {
            CircuitState::Closed => {
                if failures >= u64::from(self.config.failure_threshold) {
                    self.transition(CircuitState::Closed, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                self.transition(CircuitState::HalfOpen, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Move `from` -> `to` if the circuit is still in `from`. Returns whether this call won.
    fn transition(&self, from: CircuitState, to: CircuitState) -> bool {
        if self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.on_entered(from, to);
        true
    }

    /// Unconditionally move to `to`, firing the listener when the state changed
    fn force_transition(&self, to: CircuitState) {
        let from = CircuitState::from(self.state.swap(to as u8, Ordering::AcqRel));
        if from == to {
            // Still refresh counters/timestamps so a manual trip restarts the timeout.
            self.reset_for(to);
            return;
        }
        self.on_entered(from, to);
    }

    fn reset_for(&self, to: CircuitState) {
        match to {
            CircuitState::Closed => {
                self.counters.reset_consecutive();
                self.opened_at_nanos.store(0, Ordering::Release);
            }
            CircuitState::Open => {
                self.counters.reset_consecutive();
                self.opened_at_nanos
                    .store(self.nanos_since_epoch() + 1, Ordering::Release);
            }
            CircuitState::HalfOpen => {
                self.counters
                    .consecutive_successes
                    .store(0, Ordering::Release);
            }
        }
    }

    fn on_entered(&self, from: CircuitState, to: CircuitState) {
        self.reset_for(to);

        match to {
            CircuitState::Open => error!(
                component = %self.name,
                previous_state = %from,
                failure_threshold = self.config.failure_threshold,
                reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                "Circuit breaker opened (failing fast)"
            ),
            CircuitState::HalfOpen => info!(
                component = %self.name,
                success_threshold = self.config.success_threshold,
                "Circuit breaker half-open (testing recovery)"
            ),
            CircuitState::Closed => info!(
                component = %self.name,
                previous_state = %from,
                total_requests = self.counters.total_requests.load(Ordering::Relaxed),
                "Circuit breaker closed (recovered)"
            ),
        }

        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener(from, to, &self.name);
        }
    }

    fn nanos_since_epoch(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Force the circuit CLOSED (manual recovery)
    pub fn reset(&self) {
        warn!(component = %self.name, "Circuit breaker manually reset");
        self.force_transition(CircuitState::Closed);
    }

    /// Force the circuit OPEN (manual isolation of a dependency)
    pub fn trip(&self) {
        warn!(component = %self.name, "Circuit breaker manually tripped");
        self.force_transition(CircuitState::Open);
    }

    /// Current record snapshot
    pub fn metrics(&self) -> CircuitRecord {
        self.counters.snapshot(&self.name, self.state())
    }

    /// Check if circuit is healthy (closed state with low failure rate)
    pub fn is_healthy(&self) -> bool {
        if self.state() != CircuitState::Closed {
            return false;
        }

        let total = self.counters.total_requests.load(Ordering::Relaxed);
        if total < 10 {
            // Too few calls to determine health
            return true;
        }

        let failures = self.counters.failure_count.load(Ordering::Relaxed);
        (failures as f64 / total as f64) < 0.1
    }
}
