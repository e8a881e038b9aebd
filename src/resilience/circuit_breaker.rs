//! # Circuit Breaker Implementation
//!
//! Classic three-state circuit breaker: Closed (normal operation, consecutive
//! failures counted), Open (calls short-circuit without touching the
//! dependency until the cooldown elapses), HalfOpen (exactly one trial call
//! probes recovery; success closes the circuit, failure reopens it and
//! restarts the cooldown).

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::BreakerComponentConfig;
use crate::resilience::metrics::CircuitBreakerMetrics;

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - a single trial call is allowed
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            // Open is the safest state for anything unexpected
            _ => CircuitState::Open,
        }
    }
}

/// Errors surfaced by a breaker-guarded call
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the dependency was not called
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// The dependency was called and failed; the failure was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

/// Core circuit breaker with atomic state management
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Dependency name for logging and metrics
    name: String,

    /// Current circuit state (atomic for thread safety)
    state: AtomicU8,

    /// True while the single half-open trial call is in flight
    probe_in_flight: AtomicBool,

    /// Thresholds for this dependency
    config: BreakerComponentConfig,

    /// Call bookkeeping protected by mutex
    metrics: Arc<Mutex<CircuitBreakerMetrics>>,

    /// When the circuit last opened, for cooldown expiry
    opened_at: Arc<Mutex<Option<Instant>>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker for a named dependency
    pub fn new(name: String, config: BreakerComponentConfig) -> Self {
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            cooldown_seconds = config.cooldown_secs,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            probe_in_flight: AtomicBool::new(false),
            config,
            metrics: Arc::new(Mutex::new(CircuitBreakerMetrics::new())),
            opened_at: Arc::new(Mutex::new(None)),
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Get component name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// While the circuit is open this returns `CircuitOpen` immediately,
    /// without invoking `operation` at all.
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.should_allow_call().await {
            let mut metrics = self.metrics.lock().await;
            metrics.rejected_calls += 1;
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
            });
        }

        let start_time = Instant::now();
        let result = operation().await;
        let duration = start_time.elapsed();

        match &result {
            Ok(_) => self.record_success(duration).await,
            Err(_) => self.record_failure(duration).await,
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Check if a call should be allowed based on current state
    async fn should_allow_call(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let opened_at = self.opened_at.lock().await;
                match *opened_at {
                    Some(opened_time) if opened_time.elapsed() >= self.config.cooldown() => {
                        drop(opened_at);
                        self.transition_to_half_open().await;
                        self.take_probe()
                    }
                    Some(_) => false,
                    None => {
                        // Open with no timestamp should be unreachable; fail open-safe
                        warn!(component = %self.name, "Circuit open but no timestamp recorded");
                        true
                    }
                }
            }
            CircuitState::HalfOpen => self.take_probe(),
        }
    }

    /// Claim the single half-open trial slot. Only one caller wins.
    fn take_probe(&self) -> bool {
        self.probe_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Record a successful operation
    async fn record_success(&self, duration: Duration) {
        let mut metrics = self.metrics.lock().await;
        metrics.total_calls += 1;
        metrics.success_count += 1;
        metrics.total_duration += duration;

        debug!(
            component = %self.name,
            duration_ms = duration.as_millis(),
            "🟢 Operation succeeded"
        );

        match self.state() {
            CircuitState::HalfOpen => {
                drop(metrics);
                self.transition_to_closed().await;
            }
            CircuitState::Closed => {
                metrics.consecutive_failures = 0;
            }
            CircuitState::Open => {
                warn!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    /// Record a failed operation
    async fn record_failure(&self, duration: Duration) {
        let mut metrics = self.metrics.lock().await;
        metrics.total_calls += 1;
        metrics.failure_count += 1;
        metrics.total_duration += duration;

        error!(
            component = %self.name,
            duration_ms = duration.as_millis(),
            "🔴 Operation failed"
        );

        match self.state() {
            CircuitState::Closed => {
                metrics.consecutive_failures += 1;
                if metrics.consecutive_failures >= u64::from(self.config.failure_threshold) {
                    drop(metrics);
                    self.transition_to_open().await;
                }
            }
            CircuitState::HalfOpen => {
                // The trial call failed: reopen and restart the cooldown
                drop(metrics);
                self.transition_to_open().await;
            }
            CircuitState::Open => {}
        }
    }

    /// Transition to closed state (normal operation)
    async fn transition_to_closed(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        self.probe_in_flight.store(false, Ordering::Release);

        let mut metrics = self.metrics.lock().await;
        metrics.consecutive_failures = 0;

        let mut opened_at = self.opened_at.lock().await;
        *opened_at = None;

        info!(
            component = %self.name,
            total_calls = metrics.total_calls,
            "🟢 Circuit breaker closed (recovered)"
        );
    }

    /// Transition to open state (failing fast)
    async fn transition_to_open(&self) {
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        self.probe_in_flight.store(false, Ordering::Release);

        let mut opened_at = self.opened_at.lock().await;
        *opened_at = Some(Instant::now());

        let mut metrics = self.metrics.lock().await;
        metrics.total_trips += 1;

        error!(
            component = %self.name,
            consecutive_failures = metrics.consecutive_failures,
            failure_threshold = self.config.failure_threshold,
            cooldown_seconds = self.config.cooldown_secs,
            "🔴 Circuit breaker opened (failing fast)"
        );
    }

    /// Transition to half-open state (testing recovery). The probe flag is
    /// NOT reset here: it was cleared when the circuit opened, and clearing
    /// it again would let two racing callers both win the single trial slot.
    async fn transition_to_half_open(&self) {
        self.state
            .store(CircuitState::HalfOpen as u8, Ordering::Release);

        info!(
            component = %self.name,
            "🟡 Circuit breaker half-open (testing recovery)"
        );
    }

    /// Force circuit to open state (emergency stop)
    pub async fn force_open(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced open");
        self.transition_to_open().await;
    }

    /// Force circuit to closed state (emergency recovery)
    pub async fn force_closed(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced closed");
        self.transition_to_closed().await;
    }

    /// Get current metrics snapshot
    pub async fn metrics(&self) -> CircuitBreakerMetrics {
        let metrics = self.metrics.lock().await;
        let mut snapshot = metrics.clone();
        snapshot.current_state = self.state();

        if metrics.total_calls > 0 {
            snapshot.failure_rate = metrics.failure_count as f64 / metrics.total_calls as f64;
        }

        snapshot
    }

    /// Check if circuit is healthy (closed with a low failure rate)
    pub async fn is_healthy(&self) -> bool {
        if self.state() != CircuitState::Closed {
            return false;
        }

        let metrics = self.metrics.lock().await;
        if metrics.total_calls < 10 {
            // Too few calls to judge
            return true;
        }

        let failure_rate = metrics.failure_count as f64 / metrics.total_calls as f64;
        failure_rate < 0.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn test_config(failure_threshold: u32, cooldown_secs: u64) -> BreakerComponentConfig {
        BreakerComponentConfig {
            failure_threshold,
            cooldown_secs,
        }
    }

    fn fast_config() -> BreakerComponentConfig {
        BreakerComponentConfig {
            failure_threshold: 2,
            cooldown_secs: 0,
        }
    }

    #[tokio::test]
    async fn test_normal_operation() {
        let circuit = CircuitBreaker::new("test".to_string(), test_config(3, 60));

        assert_eq!(circuit.state(), CircuitState::Closed);

        let result = circuit.call(|| async { Ok::<_, String>("success") }).await;
        assert!(result.is_ok());

        let metrics = circuit.metrics().await;
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 0);
    }

    #[tokio::test]
    async fn test_opens_after_consecutive_failures() {
        let circuit = CircuitBreaker::new("test".to_string(), test_config(2, 60));

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Closed);

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        // Next call must fail fast without executing the operation
        let result = circuit
            .call(|| async {
                panic!("operation must not run while circuit is open");
                #[allow(unreachable_code)]
                Ok::<_, String>("unreachable")
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen { .. })));

        let metrics = circuit.metrics().await;
        assert_eq!(metrics.total_trips, 1);
        assert_eq!(metrics.rejected_calls, 1);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let circuit = CircuitBreaker::new("test".to_string(), test_config(2, 60));

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        let _ = circuit.call(|| async { Ok::<_, String>("fine") }).await;
        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;

        // Failures were not consecutive, circuit stays closed
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_single_probe_then_recovery() {
        let circuit = CircuitBreaker::new("test".to_string(), fast_config());

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        // Cooldown of zero: next call is the half-open trial and succeeds
        sleep(Duration::from_millis(10)).await;
        let result = circuit.call(|| async { Ok::<_, String>("recovered") }).await;
        assert!(result.is_ok());
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let circuit = CircuitBreaker::new("test".to_string(), fast_config());

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        sleep(Duration::from_millis(10)).await;
        let _ = circuit.call(|| async { Err::<String, _>("still down") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        let metrics = circuit.metrics().await;
        assert_eq!(metrics.total_trips, 2);
    }

    #[tokio::test]
    async fn test_half_open_admits_exactly_one_probe() {
        let circuit = Arc::new(CircuitBreaker::new("test".to_string(), fast_config()));

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        sleep(Duration::from_millis(10)).await;

        // Move to half-open and park a slow trial call
        let slow = {
            let circuit = Arc::clone(&circuit);
            tokio::spawn(async move {
                circuit
                    .call(|| async {
                        sleep(Duration::from_millis(100)).await;
                        Ok::<_, String>("trial")
                    })
                    .await
            })
        };
        sleep(Duration::from_millis(20)).await;
        assert_eq!(circuit.state(), CircuitState::HalfOpen);

        // A second caller while the trial is in flight is rejected
        let result = circuit.call(|| async { Ok::<_, String>("second") }).await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen { .. })));

        assert!(slow.await.unwrap().is_ok());
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_force_operations() {
        let circuit = CircuitBreaker::new("test".to_string(), test_config(1, 60));

        circuit.force_open().await;
        assert_eq!(circuit.state(), CircuitState::Open);

        circuit.force_closed().await;
        assert_eq!(circuit.state(), CircuitState::Closed);
    }
}
