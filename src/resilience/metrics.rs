//! # Circuit Breaker Metrics
//!
//! Point-in-time snapshots of circuit breaker counters, per breaker and
//! aggregated across the registry. Snapshots are what the health endpoint
//! reports and what operators read when a dependency starts failing.

use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshot of a single breaker's record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitRecord {
    /// Dependency name the breaker protects
    pub name: String,

    /// Current circuit state
    pub state: CircuitState,

    /// Consecutive failures since the last transition or success
    pub consecutive_failures: u64,

    /// Consecutive successes while half-open
    pub consecutive_successes: u64,

    /// Time of the most recent failure
    pub last_failure_at: Option<DateTime<Utc>>,

    /// Time of the most recent success
    pub last_success_at: Option<DateTime<Utc>>,

    /// Calls that reached the protected operation
    pub total_requests: u64,

    pub failure_count: u64,

    pub success_count: u64,

    /// Calls rejected without running because the circuit was open
    pub rejection_count: u64,

    /// failure_count / total_requests (0.0 when idle)
    pub failure_rate: f64,
}

impl CircuitRecord {
    /// Empty record for a freshly created breaker
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_at: None,
            last_success_at: None,
            total_requests: 0,
            failure_count: 0,
            success_count: 0,
            rejection_count: 0,
            failure_rate: 0.0,
        }
    }

    /// Check if metrics indicate healthy operation
    pub fn is_healthy(&self) -> bool {
        match self.state {
            CircuitState::Closed => self.failure_rate < 0.1,
            CircuitState::Open => false,
            CircuitState::HalfOpen => true,
        }
    }

    /// Format metrics for logging
    pub fn format_summary(&self) -> String {
        format!(
            "{} | State: {} | Requests: {} | Failures: {} | Rejections: {} | Failure rate: {:.1}%",
            self.name,
            self.state,
            self.total_requests,
            self.failure_count,
            self.rejection_count,
            self.failure_rate * 100.0
        )
    }
}

/// Registry-wide aggregation of breaker records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCircuitMetrics {
    /// Records for individual circuit breakers by name
    pub circuit_breakers: HashMap<String, CircuitRecord>,

    /// Timestamp of last metrics collection
    pub collected_at: DateTime<Utc>,
}

impl SystemCircuitMetrics {
    pub fn new() -> Self {
        Self {
            circuit_breakers: HashMap::new(),
            collected_at: Utc::now(),
        }
    }

    pub fn add(&mut self, record: CircuitRecord) {
        self.circuit_breakers.insert(record.name.clone(), record);
        self.collected_at = Utc::now();
    }

    /// Get count of circuit breakers by state
    pub fn count_by_state(&self) -> HashMap<CircuitState, usize> {
        let mut counts = HashMap::new();

        for record in self.circuit_breakers.values() {
            *counts.entry(record.state).or_insert(0) += 1;
        }

        counts
    }

    /// Names of breakers that are currently unhealthy
    pub fn unhealthy_circuits(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .circuit_breakers
            .values()
            .filter(|record| !record.is_healthy())
            .map(|record| record.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Calculate system-wide health score (0.0 to 1.0)
    pub fn health_score(&self) -> f64 {
        if self.circuit_breakers.is_empty() {
            return 1.0;
        }

        let healthy_count = self
            .circuit_breakers
            .values()
            .filter(|record| record.is_healthy())
            .count();

        healthy_count as f64 / self.circuit_breakers.len() as f64
    }

    pub fn total_requests(&self) -> u64 {
        self.circuit_breakers
            .values()
            .map(|record| record.total_requests)
            .sum()
    }

    pub fn total_rejections(&self) -> u64 {
        self.circuit_breakers
            .values()
            .map(|record| record.rejection_count)
            .sum()
    }
}

impl Default for SystemCircuitMetrics {
    fn default() -> Self {
        Self::new()
    }
}
