//! # Worker Pool
//!
//! A pool of concurrent consumer loops for one `(task type, lane)` stream.
//! Each worker: blocks on `consume`, runs the registered handler under the
//! lane's processing budget, then acknowledges through the reliable
//! acknowledger. Handler failures count against the attempt budget and
//! re-enqueue onto the same lane; exhausted tasks are dead-lettered.
//!
//! Cancellation is cooperative: a per-worker stop signal is observed between
//! iterations, so an in-flight acknowledgement always completes before the
//! loop exits, and shutdown logs as an expected event. Heartbeats run on an
//! independent timer task so a slow handler cannot starve liveness
//! reporting.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::messaging::{
    DeliveredTask, Lane, MessagingError, ReliableAcknowledger, StepOutcome, TaskMessage,
    TaskQueueClient, TaskStatus, TaskStatusStore, TaskType,
};
use crate::metrics::OrchestrationMetrics;
use crate::resilience::CircuitBreakerManager;

use super::handler::{HandlerContext, HandlerRegistry};
use super::heartbeat::{HeartbeatStore, WorkerRecord, WorkerStatus};
use super::WorkerError;

/// Configuration for one pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub pool_name: String,
    pub task_type: TaskType,
    pub lane: Lane,
    pub initial_workers: usize,
    pub block_timeout: Duration,
    /// Per-message processing budget; smaller on the express lane
    pub handler_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_ttl: Duration,
    pub max_attempts: u32,
    pub shutdown_timeout: Duration,
}

impl PoolConfig {
    /// Derive a pool config for `(type, lane)` from the worker section.
    pub fn for_lane(task_type: TaskType, lane: Lane, worker: &WorkerConfig) -> Self {
        let (initial_workers, handler_timeout) = match lane {
            Lane::Normal => (
                worker.workers_per_pool,
                Duration::from_secs(worker.handler_timeout_secs),
            ),
            Lane::Express => (
                worker.express_workers,
                Duration::from_secs(worker.express_handler_timeout_secs),
            ),
        };

        Self {
            pool_name: format!("{task_type}-{lane}"),
            task_type,
            lane,
            initial_workers,
            block_timeout: worker.block_timeout(),
            handler_timeout,
            heartbeat_interval: worker.heartbeat_interval(),
            heartbeat_ttl: worker.heartbeat_ttl(),
            max_attempts: worker.max_attempts,
            shutdown_timeout: worker.shutdown_timeout(),
        }
    }
}

/// Shared services injected into every pool.
#[derive(Clone)]
pub struct PoolContext {
    pub queue: Arc<TaskQueueClient>,
    pub acknowledger: Arc<ReliableAcknowledger>,
    pub handlers: Arc<HandlerRegistry>,
    pub heartbeats: Arc<dyn HeartbeatStore>,
    pub status: Arc<dyn TaskStatusStore>,
    pub breakers: Arc<CircuitBreakerManager>,
    pub metrics: Arc<OrchestrationMetrics>,
}

/// Observable pool state, including the latency window the autoscaler reads.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub pool_name: String,
    pub num_workers: usize,
    pub active_workers: usize,
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    pub p95_latency: Option<Duration>,
}

/// Rolling window of end-to-end task latencies.
#[derive(Debug, Default)]
struct LatencyWindow {
    samples: Mutex<Vec<f64>>,
}

const LATENCY_WINDOW_CAP: usize = 256;

impl LatencyWindow {
    fn record(&self, seconds: f64) {
        let mut samples = self.samples.lock();
        if samples.len() >= LATENCY_WINDOW_CAP {
            samples.remove(0);
        }
        samples.push(seconds);
    }

    fn p95(&self) -> Option<f64> {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let index = ((sorted.len() - 1) as f64 * 0.95).round() as usize;
        Some(sorted[index])
    }
}

#[derive(Debug, Default)]
struct SharedPoolStats {
    tasks_processed: AtomicU64,
    tasks_failed: AtomicU64,
    active_workers: AtomicUsize,
    latency: LatencyWindow,
}

struct WorkerSlot {
    worker_id: String,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Pool of consumer loops for one `(type, lane)` stream.
pub struct WorkerPool {
    config: PoolConfig,
    ctx: PoolContext,
    slots: Mutex<Vec<WorkerSlot>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
    next_worker_seq: AtomicU64,
}

impl WorkerPool {
    pub fn new(config: PoolConfig, ctx: PoolContext) -> Arc<Self> {
        Arc::new(Self {
            config,
            ctx,
            slots: Mutex::new(Vec::new()),
            stats: Arc::new(SharedPoolStats::default()),
            is_running: AtomicBool::new(false),
            next_worker_seq: AtomicU64::new(0),
        })
    }

    pub fn pool_name(&self) -> &str {
        &self.config.pool_name
    }

    pub fn task_type(&self) -> TaskType {
        self.config.task_type
    }

    pub fn lane(&self) -> Lane {
        self.config.lane
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Start the initial workers.
    pub fn start(&self) -> Result<(), WorkerError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::AlreadyRunning);
        }

        {
            let mut slots = self.slots.lock();
            for _ in 0..self.config.initial_workers {
                let slot = self.spawn_worker();
                slots.push(slot);
            }
        }
        self.publish_worker_gauge();

        info!(
            pool = %self.config.pool_name,
            workers = self.config.initial_workers,
            "👷 Worker pool started"
        );
        Ok(())
    }

    /// Scale the pool to `target` workers. Scale-down stops the most
    /// recently added workers cooperatively; they finish (and acknowledge)
    /// their in-flight task first.
    pub fn scale(&self, target: usize) {
        let mut removed = Vec::new();
        {
            let mut slots = self.slots.lock();
            let current = slots.len();
            if target == current {
                return;
            }

            info!(
                pool = %self.config.pool_name,
                current,
                target,
                "Scaling worker pool"
            );

            if target > current {
                for _ in current..target {
                    let slot = self.spawn_worker();
                    slots.push(slot);
                }
            } else {
                while slots.len() > target {
                    if let Some(slot) = slots.pop() {
                        removed.push(slot);
                    }
                }
            }
        }

        for slot in removed {
            let _ = slot.stop_tx.send(true);
            let worker_id = slot.worker_id;
            let handle = slot.handle;
            tokio::spawn(async move {
                if let Err(e) = handle.await {
                    error!(worker_id = %worker_id, error = %e, "Worker task panicked during scale-down");
                }
            });
        }
        self.publish_worker_gauge();
    }

    /// Stop all workers, waiting up to the configured shutdown budget.
    pub async fn shutdown(&self) -> Result<(), WorkerError> {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        info!(pool = %self.config.pool_name, "Initiating worker pool shutdown");

        let slots: Vec<WorkerSlot> = self.slots.lock().drain(..).collect();
        for slot in &slots {
            let _ = slot.stop_tx.send(true);
        }

        let drain = async {
            let results =
                futures::future::join_all(slots.into_iter().map(|slot| slot.handle)).await;
            for result in results {
                if let Err(e) = result {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        let result = tokio::time::timeout(self.config.shutdown_timeout, drain).await;
        self.publish_worker_gauge();

        match result {
            Ok(()) => {
                info!(pool = %self.config.pool_name, "Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => Err(WorkerError::ShutdownTimeout(self.config.shutdown_timeout)),
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            pool_name: self.config.pool_name.clone(),
            num_workers: self.worker_count(),
            active_workers: self.stats.active_workers.load(Ordering::SeqCst),
            tasks_processed: self.stats.tasks_processed.load(Ordering::SeqCst),
            tasks_failed: self.stats.tasks_failed.load(Ordering::SeqCst),
            p95_latency: self.stats.latency.p95().map(Duration::from_secs_f64),
        }
    }

    fn publish_worker_gauge(&self) {
        let count = self.worker_count();
        self.ctx
            .metrics
            .worker_up
            .with_label_values(&[self.config.pool_name.as_str()])
            .set(count as f64);
    }

    fn spawn_worker(&self) -> WorkerSlot {
        let seq = self.next_worker_seq.fetch_add(1, Ordering::SeqCst);
        let worker_id = format!("{}-w{}", self.config.pool_name, seq);
        let (stop_tx, stop_rx) = watch::channel(false);

        let worker = Worker {
            worker_id: worker_id.clone(),
            config: self.config.clone(),
            ctx: self.ctx.clone(),
            stats: Arc::clone(&self.stats),
            stop_rx,
        };
        let handle = tokio::spawn(worker.run());

        WorkerSlot {
            worker_id,
            stop_tx,
            handle,
        }
    }
}

/// One consumer loop. State machine:
/// `STARTING → (heartbeat ∥ consume) → STOPPING → STOPPED`.
struct Worker {
    worker_id: String,
    config: PoolConfig,
    ctx: PoolContext,
    stats: Arc<SharedPoolStats>,
    stop_rx: watch::Receiver<bool>,
}

impl Worker {
    async fn run(self) {
        // STARTING: register the liveness record before consuming anything
        let record = Arc::new(Mutex::new(WorkerRecord::new(
            &self.worker_id,
            &self.config.pool_name,
        )));
        let initial = { record.lock().clone() };
        if let Err(e) = self.ctx.heartbeats.put(&initial, self.config.heartbeat_ttl).await {
            warn!(worker_id = %self.worker_id, error = %e, "Initial heartbeat write failed");
        }
        let heartbeat = self.spawn_heartbeat(Arc::clone(&record));

        info!(
            worker_id = %self.worker_id,
            pool = %self.config.pool_name,
            "Worker started"
        );

        let handler_ctx = HandlerContext {
            breakers: Arc::clone(&self.ctx.breakers),
            lane: self.config.lane,
        };

        loop {
            if *self.stop_rx.borrow() {
                break;
            }

            let consumed = self
                .ctx
                .queue
                .consume(
                    self.config.task_type,
                    self.config.lane,
                    &self.worker_id,
                    1,
                    self.config.block_timeout,
                )
                .await;

            match consumed {
                Ok(batch) => {
                    for delivered in batch {
                        self.process(delivered, &record, &handler_ctx).await;
                    }
                }
                Err(MessagingError::CircuitBreakerOpen { .. }) => {
                    // Broker breaker open: back off for the cooldown instead
                    // of hammering a dead connection
                    debug!(worker_id = %self.worker_id, "Broker breaker open, backing off");
                    tokio::time::sleep(self.config.block_timeout).await;
                }
                Err(e) => {
                    error!(worker_id = %self.worker_id, error = %e, "Failed to consume");
                    tokio::time::sleep(self.config.block_timeout).await;
                }
            }
        }

        // STOPPING: the loop only exits on a stop signal, after finishing
        // (and acknowledging) the in-flight task. Expected event, not an
        // error, so alerting stays quiet on deploys.
        let _ = heartbeat.await;
        if let Err(e) = self.ctx.heartbeats.remove(&self.worker_id).await {
            warn!(worker_id = %self.worker_id, error = %e, "Heartbeat deregistration failed");
        }
        info!(
            worker_id = %self.worker_id,
            pool = %self.config.pool_name,
            "Worker stopped (expected shutdown)"
        );
    }

    /// Liveness reporting on an independent timer.
    fn spawn_heartbeat(&self, record: Arc<Mutex<WorkerRecord>>) -> JoinHandle<()> {
        let store = Arc::clone(&self.ctx.heartbeats);
        let ttl = self.config.heartbeat_ttl;
        let interval = self.config.heartbeat_interval;
        let worker_id = self.worker_id.clone();
        let mut stop_rx = self.stop_rx.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshot = {
                            let mut r = record.lock();
                            r.last_heartbeat = Utc::now();
                            r.clone()
                        };
                        if let Err(e) = store.put(&snapshot, ttl).await {
                            warn!(worker_id = %worker_id, error = %e, "Heartbeat refresh failed");
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn process(
        &self,
        delivered: DeliveredTask,
        record: &Arc<Mutex<WorkerRecord>>,
        handler_ctx: &HandlerContext,
    ) {
        let DeliveredTask { message_id, task } = delivered;

        {
            record.lock().status = WorkerStatus::Processing;
        }
        self.stats.active_workers.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.ctx.status.set(task.task_id, TaskStatus::Processing).await {
            warn!(task_id = %task.task_id, error = %e, "Status update failed");
        }

        debug!(
            worker_id = %self.worker_id,
            task_id = %task.task_id,
            attempt = task.attempt_count + 1,
            "Processing task"
        );

        let outcome = match self.ctx.handlers.get(task.task_type) {
            Some(handler) => {
                tokio::time::timeout(self.config.handler_timeout, handler.handle(&task, handler_ctx))
                    .await
            }
            None => {
                // No handler will ever appear mid-run; retrying is pointless
                error!(
                    worker_id = %self.worker_id,
                    task_type = %task.task_type,
                    "No handler registered, dead-lettering"
                );
                let reason = WorkerError::HandlerNotFound(task.task_type).to_string();
                self.exhaust(&message_id, task, &reason).await;
                self.finish_processing(record, true).await;
                return;
            }
        };

        match outcome {
            Ok(Ok(_output)) => {
                self.complete(&message_id, &task).await;
                self.finish_processing(record, false).await;
            }
            Ok(Err(e)) => {
                self.fail(&message_id, task, WorkerError::Handler(e.to_string()))
                    .await;
                self.finish_processing(record, true).await;
            }
            Err(_elapsed) => {
                self.fail(
                    &message_id,
                    task,
                    WorkerError::HandlerTimeout(self.config.handler_timeout),
                )
                .await;
                self.finish_processing(record, true).await;
            }
        }
    }

    async fn finish_processing(&self, record: &Arc<Mutex<WorkerRecord>>, failed: bool) {
        {
            let mut r = record.lock();
            r.status = WorkerStatus::Idle;
            if failed {
                r.tasks_failed += 1;
            } else {
                r.tasks_processed += 1;
            }
        }
        self.stats.active_workers.fetch_sub(1, Ordering::SeqCst);
        if failed {
            self.stats.tasks_failed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.stats.tasks_processed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Successful handler run: acknowledge, record latency, publish outcome.
    async fn complete(&self, message_id: &str, task: &TaskMessage) {
        let stream = self
            .ctx
            .queue
            .stream_name(self.config.task_type, self.config.lane);

        match self
            .ctx
            .acknowledger
            .ack_with_retry(&stream, self.ctx.queue.worker_group(), message_id)
            .await
        {
            Ok(_) => {
                let type_label = self.config.task_type.as_str();
                let lane_label = self.config.lane.as_str();
                self.ctx
                    .metrics
                    .tasks_completed_total
                    .with_label_values(&[type_label, lane_label])
                    .inc();

                let latency_secs =
                    (Utc::now() - task.created_at).num_milliseconds().max(0) as f64 / 1000.0;
                self.ctx
                    .metrics
                    .task_latency_seconds
                    .with_label_values(&[type_label, lane_label])
                    .observe(latency_secs);
                self.stats.latency.record(latency_secs);

                if let Err(e) = self.ctx.status.set(task.task_id, TaskStatus::Completed).await {
                    warn!(task_id = %task.task_id, error = %e, "Status update failed");
                }
                if let Some(saga) = &task.saga {
                    let outcome = StepOutcome::success(saga, task.task_id);
                    if let Err(e) = self.ctx.queue.publish_outcome(&outcome).await {
                        error!(saga_id = %saga.saga_id, error = %e, "Outcome publication failed");
                    }
                }
            }
            Err(_unverified) => {
                // Not a task failure: the entry stays pending and orphan
                // recovery redelivers it. The acknowledger already logged at
                // warn level and bumped ack_failures_total.
            }
        }
    }

    /// Handler failure: count the attempt, re-enqueue below the cap,
    /// dead-letter at the cap. The original entry is acknowledged only after
    /// the replacement (or archive entry) is durably appended.
    async fn fail(&self, message_id: &str, mut task: TaskMessage, error: WorkerError) {
        let reason = error.to_string();
        task.increment_attempts();

        if task.attempt_count >= self.config.max_attempts {
            self.exhaust(message_id, task, &reason).await;
            return;
        }

        warn!(
            worker_id = %self.worker_id,
            task_id = %task.task_id,
            attempt = task.attempt_count,
            max_attempts = self.config.max_attempts,
            reason = %reason,
            "Handler failed, re-enqueueing for retry"
        );

        // Same lane as the original delivery: routing is decided at enqueue
        // time and never re-evaluated
        match self.ctx.queue.enqueue_to_lane(&task, self.config.lane).await {
            Ok(_) => {
                self.ack_original(message_id).await;
                if let Err(e) = self.ctx.status.set(task.task_id, TaskStatus::Pending).await {
                    warn!(task_id = %task.task_id, error = %e, "Status update failed");
                }
            }
            Err(e) => {
                // Leave the original pending; orphan recovery redelivers it
                error!(
                    task_id = %task.task_id,
                    error = %e,
                    "Re-enqueue failed, leaving entry for orphan recovery"
                );
            }
        }
    }

    /// Retry budget exhausted (or unroutable): archive and acknowledge.
    async fn exhaust(&self, message_id: &str, task: TaskMessage, reason: &str) {
        let task_id = task.task_id;
        let saga = task.saga.clone();

        match self.ctx.queue.move_to_dead_letter(task, reason).await {
            Ok(_) => {
                self.ack_original(message_id).await;
                if let Err(e) = self.ctx.status.set(task_id, TaskStatus::DeadLettered).await {
                    warn!(task_id = %task_id, error = %e, "Status update failed");
                }
                if let Some(saga) = saga {
                    let outcome = StepOutcome::failure(&saga, task_id, reason);
                    if let Err(e) = self.ctx.queue.publish_outcome(&outcome).await {
                        error!(saga_id = %saga.saga_id, error = %e, "Outcome publication failed");
                    }
                }
            }
            Err(e) => {
                error!(
                    task_id = %task_id,
                    error = %e,
                    "Dead-letter move failed, leaving entry for orphan recovery"
                );
            }
        }
    }

    async fn ack_original(&self, message_id: &str) {
        let stream = self
            .ctx
            .queue
            .stream_name(self.config.task_type, self.config.lane);
        // AckFailure is deliberately ignored here: the replacement entry is
        // already durable, and recovery will clear the stale pending entry
        let _ = self
            .ctx
            .acknowledger
            .ack_with_retry(&stream, self.ctx.queue.worker_group(), message_id)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AckConfig, CircuitBreakerSettings, StreamConfig};
    use crate::messaging::{InMemoryStatusStore, InMemoryStreamClient};
    use crate::worker::handler::TaskHandler;
    use crate::worker::heartbeat::InMemoryHeartbeatStore;
    use async_trait::async_trait;
    use serde_json::json;

    struct FlakyHandler;

    #[async_trait]
    impl TaskHandler for FlakyHandler {
        async fn handle(
            &self,
            task: &TaskMessage,
            _ctx: &HandlerContext,
        ) -> anyhow::Result<serde_json::Value> {
            if task.payload["fail"].as_bool().unwrap_or(false) {
                anyhow::bail!("forced failure");
            }
            Ok(json!({"ok": true}))
        }
    }

    fn test_context() -> (PoolContext, Arc<TaskQueueClient>, Arc<InMemoryStatusStore>) {
        let metrics = Arc::new(OrchestrationMetrics::new().unwrap());
        let client: Arc<dyn crate::messaging::StreamClient> =
            Arc::new(InMemoryStreamClient::new());
        let queue = Arc::new(TaskQueueClient::new(
            Arc::clone(&client),
            StreamConfig::default(),
            Arc::clone(&metrics),
        ));
        let acknowledger = Arc::new(ReliableAcknowledger::new(
            client,
            AckConfig {
                max_attempts: 3,
                retry_backoff_ms: 1,
                verify_batch_size: 100,
            },
            Arc::clone(&metrics),
        ));
        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register(TaskType::Codegen, Arc::new(FlakyHandler));
        let status = Arc::new(InMemoryStatusStore::new());

        let ctx = PoolContext {
            queue: Arc::clone(&queue),
            acknowledger,
            handlers,
            heartbeats: Arc::new(InMemoryHeartbeatStore::new()),
            status: Arc::clone(&status) as Arc<dyn TaskStatusStore>,
            breakers: Arc::new(CircuitBreakerManager::new(CircuitBreakerSettings::default())),
            metrics,
        };
        (ctx, queue, status)
    }

    fn test_pool_config() -> PoolConfig {
        PoolConfig {
            pool_name: "codegen-normal".to_string(),
            task_type: TaskType::Codegen,
            lane: Lane::Normal,
            initial_workers: 2,
            block_timeout: Duration::from_millis(20),
            handler_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_millis(50),
            heartbeat_ttl: Duration::from_millis(150),
            max_attempts: 3,
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_pool_processes_and_acks_tasks() {
        let (ctx, queue, status) = test_context();
        let pool = WorkerPool::new(test_pool_config(), ctx);
        pool.start().unwrap();

        let task = TaskMessage::new(TaskType::Codegen, 3, json!({"fail": false}));
        queue.enqueue(&task).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if status.get(task.task_id).await.unwrap() == Some(TaskStatus::Completed) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("task should complete");

        // Nothing left pending once the ack verified
        assert_eq!(queue.group_lag(TaskType::Codegen, Lane::Normal).await.unwrap(), 0);
        assert!(pool.stats().tasks_processed >= 1);

        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_task_retries_then_dead_letters() {
        let (ctx, queue, status) = test_context();
        let pool = WorkerPool::new(test_pool_config(), ctx);
        pool.start().unwrap();

        let task = TaskMessage::new(TaskType::Codegen, 3, json!({"fail": true}));
        queue.enqueue(&task).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if status.get(task.task_id).await.unwrap() == Some(TaskStatus::DeadLettered) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("task should be dead-lettered");

        let dead = queue.peek_dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].original_task.task_id, task.task_id);
        assert_eq!(dead[0].final_attempt_count, 3);

        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_scale_up_and_down() {
        let (ctx, _queue, _status) = test_context();
        let pool = WorkerPool::new(test_pool_config(), ctx);
        pool.start().unwrap();
        assert_eq!(pool.worker_count(), 2);

        pool.scale(5);
        assert_eq!(pool.worker_count(), 5);

        pool.scale(1);
        assert_eq!(pool.worker_count(), 1);

        pool.shutdown().await.unwrap();
        assert_eq!(pool.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_workers_heartbeat_while_running() {
        let (ctx, _queue, _status) = test_context();
        let heartbeats = Arc::clone(&ctx.heartbeats);
        let pool = WorkerPool::new(test_pool_config(), ctx);
        pool.start().unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        let live = heartbeats.live_workers().await.unwrap();
        assert_eq!(live.len(), 2);
        assert!(live.iter().all(|r| r.pool_name == "codegen-normal"));

        pool.shutdown().await.unwrap();
        // Clean shutdown deregisters records rather than waiting for TTL
        let live = heartbeats.live_workers().await.unwrap();
        assert!(live.is_empty());
    }
}
