//! # Task Router
//!
//! The submission boundary. Routing is stateless: a task's priority is
//! compared against the express threshold exactly once, at enqueue time, and
//! the task lands on the matching `(type, lane)` stream. Redelivery never
//! re-evaluates the decision.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::messaging::{
    Lane, MessagingResult, TaskMessage, TaskQueueClient, TaskStatus, TaskStatusStore, TaskType,
};

/// Stateless priority router over the task queue.
#[derive(Clone)]
pub struct TaskRouter {
    queue: Arc<TaskQueueClient>,
    status: Arc<dyn TaskStatusStore>,
}

impl TaskRouter {
    pub fn new(queue: Arc<TaskQueueClient>, status: Arc<dyn TaskStatusStore>) -> Self {
        Self { queue, status }
    }

    /// Lane a given priority routes to under the current threshold.
    pub fn lane_for(&self, priority: u8) -> Lane {
        Lane::for_priority(priority, self.queue.express_threshold())
    }

    /// Accept a task submission: build the envelope, record its status, and
    /// enqueue it on the routed stream. Returns the task id the submitter
    /// polls status with.
    pub async fn submit(
        &self,
        task_type: TaskType,
        priority: u8,
        payload: serde_json::Value,
    ) -> MessagingResult<Uuid> {
        let task = TaskMessage::new(task_type, priority, payload);
        self.status.set(task.task_id, TaskStatus::Pending).await?;
        let (_, lane) = self.queue.enqueue(&task).await?;

        debug!(
            task_id = %task.task_id,
            task_type = %task_type,
            priority = task.priority,
            lane = %lane,
            "Task submitted"
        );
        Ok(task.task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use crate::messaging::{InMemoryStatusStore, InMemoryStreamClient};
    use crate::metrics::OrchestrationMetrics;
    use std::time::Duration;

    fn router() -> (TaskRouter, Arc<TaskQueueClient>) {
        let queue = Arc::new(TaskQueueClient::new(
            Arc::new(InMemoryStreamClient::new()),
            StreamConfig::default(),
            Arc::new(OrchestrationMetrics::new().unwrap()),
        ));
        (
            TaskRouter::new(Arc::clone(&queue), Arc::new(InMemoryStatusStore::new())),
            queue,
        )
    }

    #[tokio::test]
    async fn test_threshold_boundary_routing() {
        let (router, _) = router();
        // Default threshold is 8
        assert_eq!(router.lane_for(7), Lane::Normal);
        assert_eq!(router.lane_for(8), Lane::Express);
        assert_eq!(router.lane_for(10), Lane::Express);
    }

    #[tokio::test]
    async fn test_submit_lands_on_routed_stream_only() {
        let (router, queue) = router();

        router
            .submit(TaskType::Ml, 9, serde_json::json!({"job": "train"}))
            .await
            .unwrap();

        assert_eq!(queue.queue_depth(TaskType::Ml, Lane::Express).await.unwrap(), 1);
        assert_eq!(queue.queue_depth(TaskType::Ml, Lane::Normal).await.unwrap(), 0);

        let delivered = queue
            .consume(TaskType::Ml, Lane::Express, "w", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].task.priority, 9);
    }
}
