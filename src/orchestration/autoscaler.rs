//! # Autoscaler
//!
//! Periodic scaling decisions per worker pool. Each pass samples queue depth
//! and the pool's rolling p95 latency: an SLA breach or a depth above the
//! high-water mark scales the pool up by one step toward the maximum;
//! a sustained quiet period (consecutive under-target samples) scales it
//! down toward the minimum. The decision loop also refreshes the depth and
//! lag gauges for the metrics exporter.
//!
//! Routing (priority → lane) is not part of this loop: it is stateless and
//! happens per task at enqueue time in [`super::router`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AutoscalerConfig;
use crate::messaging::{Lane, TaskQueueClient};
use crate::metrics::OrchestrationMetrics;

use super::PoolMap;

/// Outcome of evaluating one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Scale to the contained target
    Scale(usize),
    Hold,
}

/// Pure decision rule, separated from the sampling loop for testability.
#[allow(clippy::too_many_arguments)]
pub(crate) fn decide(
    current: usize,
    depth: u64,
    p95_secs: Option<f64>,
    sla_secs: f64,
    config: &AutoscalerConfig,
    quiet_streak: &mut u32,
) -> ScaleDecision {
    let breached = p95_secs.map(|v| v > sla_secs).unwrap_or(false)
        || depth > config.high_water_depth;
    // "Well under target": half the SLA and half the high-water mark
    let quiet = p95_secs.map(|v| v < sla_secs / 2.0).unwrap_or(true)
        && depth < config.high_water_depth / 2;

    if breached {
        *quiet_streak = 0;
        let target = (current + config.scale_step).min(config.max_workers);
        if target > current {
            return ScaleDecision::Scale(target);
        }
        return ScaleDecision::Hold;
    }

    if quiet {
        *quiet_streak += 1;
        if *quiet_streak >= config.scale_down_after {
            *quiet_streak = 0;
            let target = current.saturating_sub(config.scale_step).max(config.min_workers);
            if target < current {
                return ScaleDecision::Scale(target);
            }
        }
        return ScaleDecision::Hold;
    }

    *quiet_streak = 0;
    ScaleDecision::Hold
}

/// Periodic pool-sizing loop.
pub struct Autoscaler {
    pools: Arc<PoolMap>,
    queue: Arc<TaskQueueClient>,
    metrics: Arc<OrchestrationMetrics>,
    config: AutoscalerConfig,
    quiet_streaks: Mutex<HashMap<String, u32>>,
}

impl Autoscaler {
    pub fn new(
        pools: Arc<PoolMap>,
        queue: Arc<TaskQueueClient>,
        metrics: Arc<OrchestrationMetrics>,
        config: AutoscalerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            pools,
            queue,
            metrics,
            config,
            quiet_streaks: Mutex::new(HashMap::new()),
        })
    }

    /// Spawn the decision loop. Stops when `stop_rx` flips to true.
    pub fn spawn(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        info!(
            interval_secs = self.config.interval_secs,
            min_workers = self.config.min_workers,
            max_workers = self.config.max_workers,
            "📈 Autoscaler started"
        );

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.interval()) => {}
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }
                self.evaluate_once().await;
            }
            info!("Autoscaler stopped (expected shutdown)");
        })
    }

    /// One sampling-and-decision pass over every pool. Public so tests and
    /// operator tooling can force a pass.
    pub async fn evaluate_once(&self) {
        let pools: Vec<_> = self
            .pools
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for pool in pools {
            let task_type = pool.task_type();
            let lane = pool.lane();
            let type_label = task_type.as_str();
            let lane_label = lane.as_str();

            let depth = match self.queue.queue_depth(task_type, lane).await {
                Ok(depth) => depth,
                Err(e) => {
                    warn!(pool = %pool.pool_name(), error = %e, "Depth sample failed");
                    continue;
                }
            };
            let lag = self.queue.group_lag(task_type, lane).await.unwrap_or(0);

            self.metrics
                .queue_depth
                .with_label_values(&[type_label, lane_label])
                .set(depth as f64);
            self.metrics
                .consumer_group_lag
                .with_label_values(&[type_label, lane_label])
                .set(lag as f64);

            let stats = pool.stats();
            let p95_secs = stats.p95_latency.map(|d| d.as_secs_f64());
            let sla_secs = match lane {
                Lane::Normal => self.config.latency_sla_secs,
                Lane::Express => self.config.express_latency_sla_secs,
            };

            let decision = {
                let mut streaks = self.quiet_streaks.lock();
                let streak = streaks.entry(pool.pool_name().to_string()).or_insert(0);
                decide(
                    stats.num_workers,
                    depth,
                    p95_secs,
                    sla_secs,
                    &self.config,
                    streak,
                )
            };

            match decision {
                ScaleDecision::Scale(target) => {
                    info!(
                        pool = %pool.pool_name(),
                        current = stats.num_workers,
                        target,
                        depth,
                        p95_secs,
                        "Autoscaler adjusting pool"
                    );
                    pool.scale(target);
                }
                ScaleDecision::Hold => {
                    debug!(pool = %pool.pool_name(), depth, p95_secs, "Autoscaler holding");
                }
            }
        }
    }
}
