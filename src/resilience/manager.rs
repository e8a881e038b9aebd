//! # Circuit Breaker Manager
//!
//! Injected registry of circuit breakers keyed by dependency name. Components
//! receive the manager at construction and look up (or lazily create) the
//! breaker for each dependency they call; nothing reaches a breaker through
//! ambient global state.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::config::CircuitBreakerSettings;

use super::circuit_breaker::CircuitBreaker;
use super::metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};

/// Registry of per-dependency circuit breakers.
#[derive(Debug)]
pub struct CircuitBreakerManager {
    settings: CircuitBreakerSettings,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerManager {
    pub fn new(settings: CircuitBreakerSettings) -> Self {
        Self {
            settings,
            breakers: DashMap::new(),
        }
    }

    /// Whether breaker protection is enabled at all for this deployment.
    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Get the breaker for a dependency, creating it with the component's
    /// configured thresholds on first use.
    pub fn breaker(&self, component: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(component) {
            return Arc::clone(existing.value());
        }

        let created = Arc::new(CircuitBreaker::new(
            component.to_string(),
            self.settings.for_component(component),
        ));
        debug!(component = %component, "Circuit breaker registered");

        // Entry API resolves the race between two first callers
        self.breakers
            .entry(component.to_string())
            .or_insert(created)
            .value()
            .clone()
    }

    /// Metrics snapshot for one component, if it has a breaker.
    pub async fn component_metrics(&self, component: &str) -> Option<CircuitBreakerMetrics> {
        let breaker = self
            .breakers
            .get(component)
            .map(|entry| Arc::clone(entry.value()))?;
        Some(breaker.metrics().await)
    }

    /// Snapshot across every registered breaker.
    pub async fn system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let breakers: Vec<(String, Arc<CircuitBreaker>)> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut components = HashMap::with_capacity(breakers.len());
        for (name, breaker) in breakers {
            components.insert(name, breaker.metrics().await);
        }
        SystemCircuitBreakerMetrics { components }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitState;

    #[tokio::test]
    async fn test_breaker_created_once_per_component() {
        let manager = CircuitBreakerManager::new(CircuitBreakerSettings::default());

        let a = manager.breaker("anthropic");
        let b = manager.breaker("anthropic");
        assert!(Arc::ptr_eq(&a, &b));

        let other = manager.breaker("redis");
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[tokio::test]
    async fn test_system_metrics_cover_all_components() {
        let manager = CircuitBreakerManager::new(CircuitBreakerSettings::default());
        manager.breaker("anthropic");
        manager.breaker("redis").force_open().await;

        let snapshot = manager.system_metrics().await;
        assert_eq!(snapshot.components.len(), 2);
        assert_eq!(snapshot.degraded_count(), 1);
        assert_eq!(
            snapshot.components["redis"].current_state,
            CircuitState::Open
        );
    }
}
