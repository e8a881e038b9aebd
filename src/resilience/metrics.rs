//! Circuit breaker metrics snapshots.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::CircuitState;

/// Per-breaker call bookkeeping and state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub current_state: CircuitState,
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Calls rejected without execution while the circuit was open
    pub rejected_calls: u64,
    pub consecutive_failures: u64,
    /// Transitions into the open state over the breaker's lifetime
    pub total_trips: u64,
    pub total_duration: Duration,
    pub failure_rate: f64,
}

impl CircuitBreakerMetrics {
    pub fn new() -> Self {
        Self {
            current_state: CircuitState::Closed,
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            rejected_calls: 0,
            consecutive_failures: 0,
            total_trips: 0,
            total_duration: Duration::ZERO,
            failure_rate: 0.0,
        }
    }
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot across every registered breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCircuitBreakerMetrics {
    pub components: HashMap<String, CircuitBreakerMetrics>,
}

impl SystemCircuitBreakerMetrics {
    /// Number of breakers currently not closed.
    pub fn degraded_count(&self) -> usize {
        self.components
            .values()
            .filter(|m| m.current_state != CircuitState::Closed)
            .count()
    }

    /// Total trips across all components.
    pub fn total_trips(&self) -> u64 {
        self.components.values().map(|m| m.total_trips).sum()
    }
}
