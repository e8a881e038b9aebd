//! # Orchestration Core Bootstrap
//!
//! Wires the whole system together: metrics, breaker registry, queue client
//! (breaker-protected when enabled), acknowledger, one worker pool per
//! `(registered type, lane)`, the orphan recovery loop, the autoscaler, and
//! the saga orchestrator. Exposes the two calls external collaborators get:
//! `submit` and `task_status`, plus ordered graceful shutdown.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::OrchestrationConfig;
use crate::error::Result;
use crate::messaging::{
    ProtectedStreamClient, ReliableAcknowledger, StreamClient, TaskQueueClient, TaskStatus,
    TaskStatusStore, TaskType,
};
use crate::metrics::OrchestrationMetrics;
use crate::resilience::CircuitBreakerManager;
use crate::saga::SagaOrchestrator;
use crate::worker::{HandlerRegistry, HeartbeatStore, PoolConfig, PoolContext, WorkerPool};

use super::autoscaler::Autoscaler;
use super::orphan_recovery::OrphanRecovery;
use super::router::TaskRouter;
use super::PoolMap;

/// The assembled orchestration core.
pub struct OrchestrationCore {
    config: OrchestrationConfig,
    metrics: Arc<OrchestrationMetrics>,
    breakers: Arc<CircuitBreakerManager>,
    queue: Arc<TaskQueueClient>,
    router: TaskRouter,
    status: Arc<dyn TaskStatusStore>,
    pools: Arc<PoolMap>,
    sagas: Arc<SagaOrchestrator>,
    recovery: Arc<OrphanRecovery>,
    autoscaler: Arc<Autoscaler>,
    stop_tx: watch::Sender<bool>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl OrchestrationCore {
    /// Build and start the core: streams initialized, pools consuming,
    /// background loops running.
    pub async fn start(
        config: OrchestrationConfig,
        stream_client: Arc<dyn StreamClient>,
        heartbeats: Arc<dyn HeartbeatStore>,
        status: Arc<dyn TaskStatusStore>,
        handlers: Arc<HandlerRegistry>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let metrics = Arc::new(OrchestrationMetrics::new()?);
        let breakers = Arc::new(CircuitBreakerManager::new(config.circuit_breaker.clone()));

        // Broker outages trip one breaker instead of cascading everywhere
        let client: Arc<dyn StreamClient> = if breakers.is_enabled() {
            Arc::new(ProtectedStreamClient::new(
                stream_client,
                Arc::clone(&breakers),
            ))
        } else {
            stream_client
        };

        let queue = Arc::new(TaskQueueClient::new(
            Arc::clone(&client),
            config.stream.clone(),
            Arc::clone(&metrics),
        ));
        let acknowledger = Arc::new(ReliableAcknowledger::new(
            client,
            config.acknowledger.clone(),
            Arc::clone(&metrics),
        ));
        queue.initialize_streams().await?;

        let pool_ctx = PoolContext {
            queue: Arc::clone(&queue),
            acknowledger,
            handlers: Arc::clone(&handlers),
            heartbeats: Arc::clone(&heartbeats),
            status: Arc::clone(&status),
            breakers: Arc::clone(&breakers),
            metrics: Arc::clone(&metrics),
        };

        let pools: Arc<PoolMap> = Arc::new(PoolMap::new());
        for task_type in handlers.registered_types() {
            for lane in crate::messaging::Lane::ALL {
                let pool_config = PoolConfig::for_lane(task_type, lane, &config.worker);
                let pool = WorkerPool::new(pool_config, pool_ctx.clone());
                pool.start()?;
                pools.insert(pool.pool_name().to_string(), pool);
            }
        }
        if pools.is_empty() {
            warn!("No handlers registered; running as a submit-only node");
        }

        let sagas = SagaOrchestrator::start(Arc::clone(&queue), config.saga.clone()).await?;
        let recovery = OrphanRecovery::new(
            Arc::clone(&queue),
            heartbeats,
            Arc::clone(&status),
            Arc::clone(&metrics),
            config.recovery.clone(),
        );
        let autoscaler = Autoscaler::new(
            Arc::clone(&pools),
            Arc::clone(&queue),
            Arc::clone(&metrics),
            config.autoscaler.clone(),
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let background = vec![
            Arc::clone(&recovery).spawn(stop_rx.clone()),
            Arc::clone(&autoscaler).spawn(stop_rx),
        ];

        let router = TaskRouter::new(Arc::clone(&queue), Arc::clone(&status));

        info!(
            pools = pools.len(),
            express_threshold = config.stream.express_threshold,
            "🚀 Orchestration core started"
        );

        Ok(Arc::new(Self {
            config,
            metrics,
            breakers,
            queue,
            router,
            status,
            pools,
            sagas,
            recovery,
            autoscaler,
            stop_tx,
            background: Mutex::new(background),
        }))
    }

    /// Front-door submission: route, record status, enqueue.
    pub async fn submit(
        &self,
        task_type: TaskType,
        priority: u8,
        payload: serde_json::Value,
    ) -> Result<Uuid> {
        Ok(self.router.submit(task_type, priority, payload).await?)
    }

    /// User-visible status for a submitted task.
    pub async fn task_status(&self, task_id: Uuid) -> Result<Option<TaskStatus>> {
        Ok(self.status.get(task_id).await?)
    }

    pub fn config(&self) -> &OrchestrationConfig {
        &self.config
    }

    pub fn queue(&self) -> Arc<TaskQueueClient> {
        Arc::clone(&self.queue)
    }

    pub fn saga_orchestrator(&self) -> Arc<SagaOrchestrator> {
        Arc::clone(&self.sagas)
    }

    pub fn breakers(&self) -> Arc<CircuitBreakerManager> {
        Arc::clone(&self.breakers)
    }

    pub fn metrics(&self) -> Arc<OrchestrationMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn recovery(&self) -> Arc<OrphanRecovery> {
        Arc::clone(&self.recovery)
    }

    pub fn autoscaler(&self) -> Arc<Autoscaler> {
        Arc::clone(&self.autoscaler)
    }

    /// Pull-based metrics exposition for a scrape endpoint.
    pub fn render_metrics(&self) -> String {
        self.metrics.render()
    }

    /// Running pool handle by name (`{type}-{lane}`).
    pub fn pool(&self, name: &str) -> Option<Arc<WorkerPool>> {
        self.pools.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Ordered graceful shutdown: stop the decision loops, drain the worker
    /// pools (in-flight acknowledgements complete), then stop the saga
    /// router.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Orchestration core shutting down");
        let _ = self.stop_tx.send(true);

        let handles: Vec<JoinHandle<()>> = self.background.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        let pools: Vec<Arc<WorkerPool>> = self
            .pools
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for pool in pools {
            if let Err(e) = pool.shutdown().await {
                warn!(pool = %pool.pool_name(), error = %e, "Pool shutdown incomplete");
            }
        }

        self.sagas.shutdown().await;
        info!("Orchestration core stopped");
        Ok(())
    }
}
