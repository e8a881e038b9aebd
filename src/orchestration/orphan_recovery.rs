//! # Orphan Recovery Loop
//!
//! Background healing of delivered-but-unacknowledged entries. A consumer
//! that crashed, hung, or lost its connection leaves its deliveries pending
//! forever; this loop finds entries idle beyond the per-type threshold,
//! claims them onto a designated recovery consumer (resetting their idle
//! time), and either redelivers them on the same stream or dead-letters
//! them. The dead-letter decision looks at both the broker delivery count
//! and the task's accumulated attempts: redelivery appends a fresh entry,
//! which resets the broker-side count, so attempts carry the history across
//! reclaims.
//!
//! Worst-case stuck time is bounded by `idle_threshold + poll_interval`,
//! independent of how the original consumer died.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::RecoveryConfig;
use crate::messaging::{
    Lane, MessagingResult, StepOutcome, TaskMessage, TaskQueueClient, TaskStatus, TaskStatusStore,
    TaskType,
};
use crate::metrics::OrchestrationMetrics;
use crate::worker::HeartbeatStore;

/// What one recovery pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Entries reclaimed and redelivered on their stream
    pub reassigned: u64,
    /// Entries moved to the dead-letter stream
    pub dead_lettered: u64,
    /// Dead consumers newly detected this pass
    pub dead_workers: u64,
}

/// Background reclaim loop. One instance per process.
pub struct OrphanRecovery {
    queue: Arc<TaskQueueClient>,
    heartbeats: Arc<dyn HeartbeatStore>,
    status: Arc<dyn TaskStatusStore>,
    metrics: Arc<OrchestrationMetrics>,
    config: RecoveryConfig,
    /// Dead consumers already counted, so the gauge-style counter does not
    /// re-count the same corpse every pass
    counted_dead: Mutex<HashSet<String>>,
}

impl OrphanRecovery {
    pub fn new(
        queue: Arc<TaskQueueClient>,
        heartbeats: Arc<dyn HeartbeatStore>,
        status: Arc<dyn TaskStatusStore>,
        metrics: Arc<OrchestrationMetrics>,
        config: RecoveryConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            heartbeats,
            status,
            metrics,
            config,
            counted_dead: Mutex::new(HashSet::new()),
        })
    }

    /// Spawn the polling loop. Stops when `stop_rx` flips to true.
    pub fn spawn(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            idle_threshold_secs = self.config.idle_threshold_secs,
            "🔄 Orphan recovery loop started"
        );

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                match self.run_once().await {
                    Ok(stats) if stats != RecoveryStats::default() => {
                        info!(
                            reassigned = stats.reassigned,
                            dead_lettered = stats.dead_lettered,
                            dead_workers = stats.dead_workers,
                            "Recovery pass reclaimed orphaned work"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Recovery pass failed"),
                }
            }
            info!("Orphan recovery loop stopped (expected shutdown)");
        })
    }

    /// One reclaim pass over every `(type, lane)` stream. Public so tests
    /// and operator tooling can force a pass without waiting for the timer.
    pub async fn run_once(&self) -> MessagingResult<RecoveryStats> {
        let live: HashSet<String> = self
            .heartbeats
            .live_workers()
            .await?
            .into_iter()
            .map(|r| r.worker_id)
            .collect();

        let mut stats = RecoveryStats::default();
        for task_type in TaskType::ALL {
            for lane in Lane::ALL {
                self.recover_stream(task_type, lane, &live, &mut stats)
                    .await?;
            }
        }
        Ok(stats)
    }

    async fn recover_stream(
        &self,
        task_type: TaskType,
        lane: Lane,
        live_workers: &HashSet<String>,
        stats: &mut RecoveryStats,
    ) -> MessagingResult<()> {
        let client = self.queue.stream_client();
        let stream = self.queue.stream_name(task_type, lane);
        let group = self.queue.worker_group();
        let idle_threshold = self.config.idle_threshold_for(task_type.as_str());

        let pending = client
            .pending(&stream, group, idle_threshold, self.config.batch_size)
            .await?;
        if pending.is_empty() {
            return Ok(());
        }

        debug!(
            stream = %stream,
            orphans = pending.len(),
            "Pending entries exceeded idle threshold"
        );

        // Liveness oracle: a pending consumer with no heartbeat record is dead
        {
            let mut counted = self.counted_dead.lock();
            for entry in &pending {
                if entry.consumer != self.config.recovery_consumer
                    && !live_workers.contains(&entry.consumer)
                    && counted.insert(entry.consumer.clone())
                {
                    warn!(consumer = %entry.consumer, stream = %stream, "Dead worker detected");
                    self.metrics.dead_workers_detected_total.inc();
                    stats.dead_workers += 1;
                }
            }
        }

        let ids: Vec<String> = pending.iter().map(|p| p.message_id.clone()).collect();
        let claimed = client
            .claim(
                &stream,
                group,
                &self.config.recovery_consumer,
                idle_threshold,
                &ids,
            )
            .await?;

        for entry in claimed {
            // Delivery count after our claim, as the broker reports it
            let delivery_count = pending
                .iter()
                .find(|p| p.message_id == entry.id)
                .map(|p| p.delivery_count + 1)
                .unwrap_or(1);

            let mut task: TaskMessage = match serde_json::from_value(entry.payload.clone()) {
                Ok(task) => task,
                Err(e) => {
                    error!(message_id = %entry.id, error = %e, "Unparseable orphan, dead-lettering raw entry");
                    let poison = serde_json::json!({
                        "raw_entry": entry.payload,
                        "failure_reason": format!("unparseable orphaned entry: {e}"),
                        "moved_at": chrono::Utc::now(),
                    });
                    client.append(&self.queue.dead_letter_stream(), &poison).await?;
                    client.ack(&stream, group, &entry.id).await?;
                    stats.dead_lettered += 1;
                    continue;
                }
            };

            // Fresh re-enqueues reset the broker delivery count, so the
            // task's attempt counter carries reclaim history across them
            let exhausted = delivery_count > self.config.max_delivery_count
                || u64::from(task.attempt_count) >= self.config.max_delivery_count;

            if exhausted {
                self.dead_letter_orphan(task, delivery_count).await?;
                client.ack(&stream, group, &entry.id).await?;
                stats.dead_lettered += 1;
            } else {
                // Redeliver on the same stream: the replacement entry is
                // appended before the stale one is acknowledged, preserving
                // at-least-once across a crash of this loop
                task.increment_attempts();
                self.queue.enqueue_to_lane(&task, lane).await?;
                client.ack(&stream, group, &entry.id).await?;

                self.metrics.tasks_reassigned_total.inc();
                stats.reassigned += 1;
                if let Err(e) = self.status.set(task.task_id, TaskStatus::Pending).await {
                    warn!(task_id = %task.task_id, error = %e, "Status update failed");
                }
                info!(
                    task_id = %task.task_id,
                    stream = %stream,
                    delivery_count,
                    "Orphaned task reassigned"
                );
            }
        }
        Ok(())
    }

    async fn dead_letter_orphan(
        &self,
        task: TaskMessage,
        delivery_count: u64,
    ) -> MessagingResult<()> {
        let task_id = task.task_id;
        let saga = task.saga.clone();
        let reason = format!("orphan reclaim exceeded delivery cap ({delivery_count} deliveries)");

        self.queue.move_to_dead_letter(task, &reason).await?;
        if let Err(e) = self.status.set(task_id, TaskStatus::DeadLettered).await {
            warn!(task_id = %task_id, error = %e, "Status update failed");
        }
        if let Some(saga) = saga {
            // A saga step that will never run again must fail the workflow
            // promptly rather than waiting out the saga deadline
            let outcome = StepOutcome::failure(&saga, task_id, &reason);
            if let Err(e) = self.queue.publish_outcome(&outcome).await {
                error!(saga_id = %saga.saga_id, error = %e, "Outcome publication failed");
            }
        }
        Ok(())
    }
}
