//! # TaskStream Configuration System
//!
//! Typed configuration for every component of the orchestration core. All
//! values come from YAML files loaded by [`ConfigManager`] with environment
//! overlays (development/test/production); every section carries an explicit
//! `Default` so the core is usable without a config file, and the loaded
//! configuration is validated before use instead of silently falling back.

pub mod error;
pub mod loader;

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `taskstream.yaml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Stream broker connection and naming
    pub stream: StreamConfig,

    /// Acknowledgement retry behavior
    pub acknowledger: AckConfig,

    /// Worker pool sizing and budgets
    pub worker: WorkerConfig,

    /// Orphaned-entry recovery loop
    pub recovery: RecoveryConfig,

    /// Circuit breaker thresholds per guarded dependency
    pub circuit_breaker: CircuitBreakerSettings,

    /// Saga execution deadlines and completion routing
    pub saga: SagaConfig,

    /// Autoscaling decision loop
    pub autoscaler: AutoscalerConfig,
}

impl OrchestrationConfig {
    /// Validate cross-field invariants. Called by the loader after merging.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.stream.express_threshold > 10 {
            return Err(ConfigurationError::invalid(
                "stream.express_threshold",
                "priority scale is 0-10",
            ));
        }
        if self.worker.max_attempts == 0 {
            return Err(ConfigurationError::invalid(
                "worker.max_attempts",
                "must be at least 1",
            ));
        }
        if self.autoscaler.min_workers > self.autoscaler.max_workers {
            return Err(ConfigurationError::invalid(
                "autoscaler.min_workers",
                "must not exceed autoscaler.max_workers",
            ));
        }
        if self.worker.heartbeat_ttl_multiplier < 2 {
            return Err(ConfigurationError::invalid(
                "worker.heartbeat_ttl_multiplier",
                "TTL below 2x the heartbeat interval flaps liveness",
            ));
        }
        if self.recovery.poll_interval_secs == 0 {
            return Err(ConfigurationError::invalid(
                "recovery.poll_interval_secs",
                "must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Stream broker connection and deterministic stream naming.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Broker URL, e.g. `redis://localhost:6379`
    pub url: String,

    /// Prefix for every stream and key owned by this deployment
    pub key_prefix: String,

    /// Priority at or above which a task is routed to the express lane
    pub express_threshold: u8,

    /// Consumer group name used by worker pools
    pub worker_group: String,

    /// Approximate retention cap per stream (entries)
    pub max_stream_len: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "taskstream".to_string(),
            express_threshold: 8,
            worker_group: "workers".to_string(),
            max_stream_len: 100_000,
        }
    }
}

/// Reliable acknowledgement retry behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AckConfig {
    /// Maximum acknowledgement attempts before giving up
    pub max_attempts: u32,

    /// Backoff between attempts, milliseconds
    pub retry_backoff_ms: u64,

    /// Pending entries inspected per verification pass
    pub verify_batch_size: usize,
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_ms: 50,
            verify_batch_size: 1000,
        }
    }
}

impl AckConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Worker pool sizing, processing budgets, and liveness reporting.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Workers per normal-lane pool
    pub workers_per_pool: usize,

    /// Workers per express-lane pool
    pub express_workers: usize,

    /// Blocking consume timeout, milliseconds
    pub block_timeout_ms: u64,

    /// Per-message processing budget on the normal lane, seconds
    pub handler_timeout_secs: u64,

    /// Per-message processing budget on the express lane, seconds
    pub express_handler_timeout_secs: u64,

    /// Heartbeat refresh interval, seconds
    pub heartbeat_interval_secs: u64,

    /// Record TTL as a multiple of the heartbeat interval
    pub heartbeat_ttl_multiplier: u32,

    /// Handler attempts before a task is dead-lettered
    pub max_attempts: u32,

    /// Graceful shutdown budget, seconds
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers_per_pool: 4,
            express_workers: 2,
            block_timeout_ms: 1000,
            handler_timeout_secs: 300,
            express_handler_timeout_secs: 30,
            heartbeat_interval_secs: 5,
            heartbeat_ttl_multiplier: 3,
            max_attempts: 3,
            shutdown_timeout_secs: 30,
        }
    }
}

impl WorkerConfig {
    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_ttl(&self) -> Duration {
        self.heartbeat_interval() * self.heartbeat_ttl_multiplier
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Orphan recovery loop cadence and reclaim policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Polling interval, seconds
    pub poll_interval_secs: u64,

    /// Idle time before a pending entry is considered orphaned, seconds
    pub idle_threshold_secs: u64,

    /// Per-task-type idle threshold overrides, keyed by task type name.
    /// Tune toward the p95 processing time of each type.
    pub idle_threshold_overrides: HashMap<String, u64>,

    /// Broker delivery count above which a reclaimed entry is dead-lettered
    pub max_delivery_count: u64,

    /// Pending entries reclaimed per stream per pass
    pub batch_size: usize,

    /// Consumer name claimed entries are parked on during reclaim
    pub recovery_consumer: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            idle_threshold_secs: 60,
            idle_threshold_overrides: HashMap::new(),
            max_delivery_count: 3,
            batch_size: 100,
            recovery_consumer: "orphan-recovery".to_string(),
        }
    }
}

impl RecoveryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Idle threshold for a task type, falling back to the global default.
    pub fn idle_threshold_for(&self, task_type: &str) -> Duration {
        let secs = self
            .idle_threshold_overrides
            .get(task_type)
            .copied()
            .unwrap_or(self.idle_threshold_secs);
        Duration::from_secs(secs)
    }
}

/// Circuit breaker thresholds, with per-component overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Whether breaker protection is applied at all
    pub enabled: bool,

    /// Defaults for components without an explicit entry
    pub default_config: BreakerComponentConfig,

    /// Per-component overrides keyed by dependency name
    pub component_configs: HashMap<String, BreakerComponentConfig>,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_config: BreakerComponentConfig::default(),
            component_configs: HashMap::new(),
        }
    }
}

impl CircuitBreakerSettings {
    /// Effective config for a named component.
    pub fn for_component(&self, name: &str) -> BreakerComponentConfig {
        self.component_configs
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }
}

/// Thresholds for a single circuit breaker.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerComponentConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Cooldown before a half-open trial is allowed, seconds
    pub cooldown_secs: u64,
}

impl Default for BreakerComponentConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 30,
        }
    }
}

impl BreakerComponentConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Saga execution deadlines and completion-signal routing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SagaConfig {
    /// Deadline applied to a saga without an explicit timeout, seconds
    pub default_timeout_secs: u64,

    /// How long a compensation is awaited before the chain moves on, seconds
    pub compensation_timeout_secs: u64,

    /// Consumer group on the outcomes stream
    pub outcome_group: String,

    /// Blocking read timeout of the completion router, milliseconds
    pub outcome_block_ms: u64,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 600,
            compensation_timeout_secs: 60,
            outcome_group: "saga-orchestrator".to_string(),
            outcome_block_ms: 500,
        }
    }
}

impl SagaConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn compensation_timeout(&self) -> Duration {
        Duration::from_secs(self.compensation_timeout_secs)
    }

    pub fn outcome_block(&self) -> Duration {
        Duration::from_millis(self.outcome_block_ms)
    }
}

/// Autoscaling decision loop thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AutoscalerConfig {
    /// Decision loop interval, seconds
    pub interval_secs: u64,

    /// p95 latency SLA on the normal lane, seconds
    pub latency_sla_secs: f64,

    /// p95 latency SLA on the express lane, seconds
    pub express_latency_sla_secs: f64,

    /// Queue depth that forces a scale-up regardless of latency
    pub high_water_depth: u64,

    /// Lower bound on pool size
    pub min_workers: usize,

    /// Upper bound on pool size
    pub max_workers: usize,

    /// Consecutive under-target samples required before scaling down
    pub scale_down_after: u32,

    /// Workers added or removed per decision
    pub scale_step: usize,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            latency_sla_secs: 60.0,
            express_latency_sla_secs: 5.0,
            high_water_depth: 1000,
            min_workers: 1,
            max_workers: 16,
            scale_down_after: 3,
            scale_step: 2,
        }
    }
}

impl AutoscalerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
