//! # Circuit Breaker Registry
//!
//! One `Registry` is built at process start and handed by reference to every
//! call site that talks to a third-party dependency. Breakers are created on
//! first use and shared afterwards, so all handlers in the process see the
//! same state for a given dependency name.

use crate::config::CircuitBreakerSettings;
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitRecord, CircuitState, StateChangeListener,
    SystemCircuitMetrics,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Registry of named circuit breakers
#[derive(Clone)]
pub struct Registry {
    circuit_breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,

    settings: CircuitBreakerSettings,

    /// Installed on every breaker this registry creates
    listener: Option<StateChangeListener>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("components", &self.list_components())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Registry {
    pub fn from_settings(settings: &CircuitBreakerSettings) -> Self {
        info!(
            max_circuit_breakers = settings.max_circuit_breakers,
            configured_components = settings.components.len(),
            "Initializing circuit breaker registry"
        );

        Self {
            circuit_breakers: Arc::new(RwLock::new(HashMap::new())),
            settings: settings.clone(),
            listener: Some(Arc::new(log_state_change)),
        }
    }

    /// Route every transition to `listener` instead of the default log line
    pub fn with_state_listener(mut self, listener: StateChangeListener) -> Self {
        for breaker in self.circuit_breakers.read().values() {
            breaker.set_state_listener(Arc::clone(&listener));
        }
        self.listener = Some(listener);
        self
    }

    /// Get or create the breaker for `name`.
    ///
    /// An explicit `config` wins on first creation; otherwise the per-component
    /// table and then the default apply. Later calls return the existing
    /// breaker and ignore `config`.
    pub fn get(&self, name: &str, config: Option<CircuitBreakerConfig>) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.circuit_breakers.read().get(name) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.circuit_breakers.write();

        // Double-check: another caller may have created it
        if let Some(breaker) = breakers.get(name) {
            return Arc::clone(breaker);
        }

        if breakers.len() >= self.settings.max_circuit_breakers {
            warn!(
                component = name,
                current_count = breakers.len(),
                max_allowed = self.settings.max_circuit_breakers,
                "Maximum circuit breaker count reached"
            );
        }

        let config = config.unwrap_or_else(|| {
            self.settings
                .config_for_component(name)
                .to_resilience_config()
        });

        let breaker = Arc::new(CircuitBreaker::new(name, config));
        if let Some(listener) = &self.listener {
            breaker.set_state_listener(Arc::clone(listener));
        }

        breakers.insert(name.to_string(), Arc::clone(&breaker));

        info!(
            component = name,
            total_circuit_breakers = breakers.len(),
            "Created new circuit breaker"
        );

        breaker
    }

    pub fn list_components(&self) -> Vec<String> {
        let mut names: Vec<String> = self.circuit_breakers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn component_metrics(&self, name: &str) -> Option<CircuitRecord> {
        self.circuit_breakers
            .read()
            .get(name)
            .map(|breaker| breaker.metrics())
    }

    pub fn system_metrics(&self) -> SystemCircuitMetrics {
        let mut system = SystemCircuitMetrics::new();
        for breaker in self.circuit_breakers.read().values() {
            system.add(breaker.metrics());
        }
        system
    }

    pub fn state_summary(&self) -> HashMap<CircuitState, usize> {
        self.system_metrics().count_by_state()
    }

    pub fn health_score(&self) -> f64 {
        self.system_metrics().health_score()
    }

    /// Force every breaker open (emergency isolation)
    pub fn trip_all(&self) {
        warn!("Forcing all circuit breakers open");
        for breaker in self.circuit_breakers.read().values() {
            breaker.trip();
        }
    }

    /// Force every breaker closed (emergency recovery)
    pub fn reset_all(&self) {
        warn!("Forcing all circuit breakers closed");
        for breaker in self.circuit_breakers.read().values() {
            breaker.reset();
        }
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut breakers = self.circuit_breakers.write();
        if breakers.remove(name).is_some() {
            info!(
                component = name,
                remaining_count = breakers.len(),
                "Removed circuit breaker"
            );
            true
        } else {
            false
        }
    }
}

fn log_state_change(from: CircuitState, to: CircuitState, name: &str) {
    info!(
        component = name,
        from_state = %from,
        to_state = %to,
        "Circuit breaker state transition"
    );
}
