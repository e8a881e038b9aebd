//! # Task Queue Client
//!
//! Typed wrapper translating [`TaskMessage`] envelopes to and from stream
//! entries. Owns stream naming (`{prefix}:{type}:{lane}`), the
//! priority-to-lane routing decision (made once, at enqueue time), lazy
//! idempotent consumer-group creation, outcome publication for saga steps,
//! and the dead-letter move.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tracing::{debug, error, info, warn};

use crate::config::StreamConfig;
use crate::metrics::OrchestrationMetrics;

use super::errors::MessagingResult;
use super::message::{DeadLetterEntry, Lane, StepOutcome, TaskMessage, TaskType};
use super::stream_client::StreamClient;

/// A task delivered to a consumer, paired with its broker message id.
#[derive(Debug, Clone)]
pub struct DeliveredTask {
    pub message_id: String,
    pub task: TaskMessage,
}

/// Typed task queue over the stream broker.
#[derive(Clone)]
pub struct TaskQueueClient {
    client: Arc<dyn StreamClient>,
    config: StreamConfig,
    metrics: Arc<OrchestrationMetrics>,
    /// `(stream, group)` pairs already created, to skip repeat round-trips
    groups_ready: Arc<DashSet<String>>,
}

impl TaskQueueClient {
    pub fn new(
        client: Arc<dyn StreamClient>,
        config: StreamConfig,
        metrics: Arc<OrchestrationMetrics>,
    ) -> Self {
        Self {
            client,
            config,
            metrics,
            groups_ready: Arc::new(DashSet::new()),
        }
    }

    /// Deterministic stream name for a `(type, lane)` pair.
    pub fn stream_name(&self, task_type: TaskType, lane: Lane) -> String {
        format!("{}:{}:{}", self.config.key_prefix, task_type, lane)
    }

    /// Stream carrying saga step completion signals.
    pub fn outcomes_stream(&self) -> String {
        format!("{}:outcomes", self.config.key_prefix)
    }

    /// Append-only archive for tasks that exhausted their retry budget.
    pub fn dead_letter_stream(&self) -> String {
        format!("{}:dead_letter", self.config.key_prefix)
    }

    /// Consumer group worker pools read under.
    pub fn worker_group(&self) -> &str {
        &self.config.worker_group
    }

    /// Express threshold currently in force.
    pub fn express_threshold(&self) -> u8 {
        self.config.express_threshold
    }

    pub fn stream_client(&self) -> &Arc<dyn StreamClient> {
        &self.client
    }

    /// Create the consumer group if this client has not seen it yet.
    /// The broker-side create is idempotent; the set only saves round-trips.
    async fn ensure_group_once(&self, stream: &str, group: &str) -> MessagingResult<()> {
        let key = format!("{stream}@{group}");
        if self.groups_ready.contains(&key) {
            return Ok(());
        }
        self.client.ensure_group(stream, group).await?;
        self.groups_ready.insert(key);
        Ok(())
    }

    /// Enqueue a task, routing by priority. Returns the broker message id
    /// and the lane the task landed on.
    pub async fn enqueue(&self, task: &TaskMessage) -> MessagingResult<(String, Lane)> {
        let lane = Lane::for_priority(task.priority, self.config.express_threshold);
        let message_id = self.enqueue_to_lane(task, lane).await?;
        Ok((message_id, lane))
    }

    /// Enqueue to an explicit lane. Used for redelivery after a handler
    /// failure, where the original routing decision is not re-evaluated.
    pub async fn enqueue_to_lane(&self, task: &TaskMessage, lane: Lane) -> MessagingResult<String> {
        let stream = self.stream_name(task.task_type, lane);
        // Group first so the entry is visible to consumers created lazily
        self.ensure_group_once(&stream, &self.config.worker_group)
            .await?;

        let payload = serde_json::to_value(task)?;
        let message_id = self.client.append(&stream, &payload).await?;

        self.metrics
            .tasks_enqueued_total
            .with_label_values(&[task.task_type.as_str(), lane.as_str()])
            .inc();

        debug!(
            task_id = %task.task_id,
            task_type = %task.task_type,
            lane = %lane,
            priority = task.priority,
            message_id = %message_id,
            "📤 Task enqueued"
        );
        Ok(message_id)
    }

    /// Consume up to `count` tasks for a worker, blocking up to `block` when
    /// the stream is drained. Undecodable entries are dead-lettered and
    /// acknowledged so they cannot poison the loop.
    pub async fn consume(
        &self,
        task_type: TaskType,
        lane: Lane,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> MessagingResult<Vec<DeliveredTask>> {
        let stream = self.stream_name(task_type, lane);
        self.ensure_group_once(&stream, &self.config.worker_group)
            .await?;

        let entries = self
            .client
            .read_group(&stream, &self.config.worker_group, consumer, count, block)
            .await?;

        let mut delivered = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<TaskMessage>(entry.payload.clone()) {
                Ok(task) => delivered.push(DeliveredTask {
                    message_id: entry.id,
                    task,
                }),
                Err(e) => {
                    error!(
                        stream = %stream,
                        message_id = %entry.id,
                        error = %e,
                        "Undecodable task entry, moving to dead letter"
                    );
                    let poison = serde_json::json!({
                        "raw_entry": entry.payload,
                        "failure_reason": format!("undecodable task payload: {e}"),
                        "moved_at": chrono::Utc::now(),
                    });
                    self.client.append(&self.dead_letter_stream(), &poison).await?;
                    self.client
                        .ack(&stream, &self.config.worker_group, &entry.id)
                        .await?;
                }
            }
        }
        Ok(delivered)
    }

    /// Plain acknowledgement. Returns true when the entry was removed from
    /// the pending set, false when it was already acknowledged.
    pub async fn ack(
        &self,
        task_type: TaskType,
        lane: Lane,
        message_id: &str,
    ) -> MessagingResult<bool> {
        let stream = self.stream_name(task_type, lane);
        let removed = self
            .client
            .ack(&stream, &self.config.worker_group, message_id)
            .await?;
        Ok(removed > 0)
    }

    /// Move a task to the dead-letter stream. The caller is responsible for
    /// acknowledging the original entry afterwards.
    pub async fn move_to_dead_letter(
        &self,
        task: TaskMessage,
        failure_reason: impl Into<String>,
    ) -> MessagingResult<String> {
        let task_type = task.task_type;
        let entry = DeadLetterEntry::new(task, failure_reason);
        let payload = serde_json::to_value(&entry)?;
        let message_id = self.client.append(&self.dead_letter_stream(), &payload).await?;

        self.metrics
            .tasks_dead_lettered_total
            .with_label_values(&[task_type.as_str()])
            .inc();

        warn!(
            task_id = %entry.original_task.task_id,
            task_type = %task_type,
            attempts = entry.final_attempt_count,
            reason = %entry.failure_reason,
            "💀 Task dead-lettered"
        );
        Ok(message_id)
    }

    /// Peek at dead-letter entries without consuming them. Operator tooling.
    pub async fn peek_dead_letters(&self, count: usize) -> MessagingResult<Vec<DeadLetterEntry>> {
        let entries = self.client.range(&self.dead_letter_stream(), count).await?;
        let mut parsed = Vec::with_capacity(entries.len());
        for entry in entries {
            // Entries written by the poison path have a different shape; skip
            if let Ok(dead) = serde_json::from_value::<DeadLetterEntry>(entry.payload) {
                parsed.push(dead);
            }
        }
        Ok(parsed)
    }

    /// Publish the terminal outcome of a saga-tagged task.
    pub async fn publish_outcome(&self, outcome: &StepOutcome) -> MessagingResult<String> {
        let payload = serde_json::to_value(outcome)?;
        let message_id = self.client.append(&self.outcomes_stream(), &payload).await?;
        debug!(
            saga_id = %outcome.saga_id,
            step = %outcome.step_name,
            success = outcome.success,
            "Step outcome published"
        );
        Ok(message_id)
    }

    /// Consume step outcomes for a saga orchestrator group.
    pub async fn consume_outcomes(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> MessagingResult<Vec<(String, StepOutcome)>> {
        let stream = self.outcomes_stream();
        self.ensure_group_once(&stream, group).await?;

        let entries = self
            .client
            .read_group(&stream, group, consumer, count, block)
            .await?;

        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<StepOutcome>(entry.payload.clone()) {
                Ok(outcome) => outcomes.push((entry.id, outcome)),
                Err(e) => {
                    warn!(message_id = %entry.id, error = %e, "Undecodable outcome entry, acknowledging");
                    self.client.ack(&stream, group, &entry.id).await?;
                }
            }
        }
        Ok(outcomes)
    }

    /// Acknowledge an outcome entry.
    pub async fn ack_outcome(&self, group: &str, message_id: &str) -> MessagingResult<u64> {
        self.client
            .ack(&self.outcomes_stream(), group, message_id)
            .await
    }

    /// Entries retained on the `(type, lane)` stream.
    pub async fn queue_depth(&self, task_type: TaskType, lane: Lane) -> MessagingResult<u64> {
        self.client
            .stream_len(&self.stream_name(task_type, lane))
            .await
    }

    /// Unacknowledged entries for the worker group on `(type, lane)`.
    pub async fn group_lag(&self, task_type: TaskType, lane: Lane) -> MessagingResult<u64> {
        self.client
            .pending_count(&self.stream_name(task_type, lane), &self.config.worker_group)
            .await
    }

    /// Initialize worker groups for every `(type, lane)` stream up front.
    /// Optional: groups are otherwise created lazily on first use.
    pub async fn initialize_streams(&self) -> MessagingResult<()> {
        info!("🏗️ Initializing task streams");
        for task_type in TaskType::ALL {
            for lane in Lane::ALL {
                let stream = self.stream_name(task_type, lane);
                self.ensure_group_once(&stream, &self.config.worker_group)
                    .await?;
            }
        }
        info!("✅ Task streams initialized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::in_memory::InMemoryStreamClient;
    use serde_json::json;

    fn test_client() -> TaskQueueClient {
        TaskQueueClient::new(
            Arc::new(InMemoryStreamClient::new()),
            StreamConfig::default(),
            Arc::new(OrchestrationMetrics::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn test_priority_routes_to_express() {
        let queue = test_client();

        let urgent = TaskMessage::new(TaskType::Reasoning, 9, json!({}));
        let (_, lane) = queue.enqueue(&urgent).await.unwrap();
        assert_eq!(lane, Lane::Express);

        let routine = TaskMessage::new(TaskType::Reasoning, 3, json!({}));
        let (_, lane) = queue.enqueue(&routine).await.unwrap();
        assert_eq!(lane, Lane::Normal);

        // Each stream holds exactly its own task
        assert_eq!(
            queue.queue_depth(TaskType::Reasoning, Lane::Express).await.unwrap(),
            1
        );
        assert_eq!(
            queue.queue_depth(TaskType::Reasoning, Lane::Normal).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_consume_and_ack_roundtrip() {
        let queue = test_client();
        let task = TaskMessage::new(TaskType::Codegen, 5, json!({"prompt": "hi"}));
        queue.enqueue(&task).await.unwrap();

        let delivered = queue
            .consume(TaskType::Codegen, Lane::Normal, "w1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].task.task_id, task.task_id);

        assert!(queue
            .ack(TaskType::Codegen, Lane::Normal, &delivered[0].message_id)
            .await
            .unwrap());
        // Second ack of the same id is a no-op
        assert!(!queue
            .ack(TaskType::Codegen, Lane::Normal, &delivered[0].message_id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_dead_letter_move_and_peek() {
        let queue = test_client();
        let mut task = TaskMessage::new(TaskType::Ml, 2, json!({"model": "xgb"}));
        task.increment_attempts();
        task.increment_attempts();
        task.increment_attempts();

        queue
            .move_to_dead_letter(task.clone(), "handler exhausted retries")
            .await
            .unwrap();

        let dead = queue.peek_dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].original_task.task_id, task.task_id);
        assert_eq!(dead[0].final_attempt_count, 3);
    }

    #[tokio::test]
    async fn test_outcome_roundtrip() {
        let queue = test_client();
        let saga = crate::messaging::SagaContext {
            saga_id: uuid::Uuid::new_v4(),
            step_name: "reserve".to_string(),
        };
        let outcome = StepOutcome::success(&saga, uuid::Uuid::new_v4());
        queue.publish_outcome(&outcome).await.unwrap();

        let consumed = queue
            .consume_outcomes("saga", "router", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(consumed.len(), 1);
        assert_eq!(consumed[0].1.saga_id, saga.saga_id);
        assert!(consumed[0].1.success);

        queue.ack_outcome("saga", &consumed[0].0).await.unwrap();
    }

    #[tokio::test]
    async fn test_poison_entry_goes_to_dead_letter() {
        let queue = test_client();
        // Append garbage directly, bypassing the typed enqueue
        let stream = queue.stream_name(TaskType::Backtest, Lane::Normal);
        queue
            .stream_client()
            .ensure_group(&stream, queue.worker_group())
            .await
            .unwrap();
        queue
            .stream_client()
            .append(&stream, &json!({"not": "a task"}))
            .await
            .unwrap();

        let delivered = queue
            .consume(TaskType::Backtest, Lane::Normal, "w1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert!(delivered.is_empty());

        // Poison entry was acked and parked on the dead-letter stream
        assert_eq!(
            queue.group_lag(TaskType::Backtest, Lane::Normal).await.unwrap(),
            0
        );
        let dlq_len = queue
            .stream_client()
            .stream_len(&queue.dead_letter_stream())
            .await
            .unwrap();
        assert_eq!(dlq_len, 1);
    }
}
