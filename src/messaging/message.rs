//! # Task Envelope Types
//!
//! The wire-level types carried on task streams: the task envelope itself,
//! the lane/type naming used to derive stream names, saga completion signals,
//! and dead-letter archive entries. Payloads stay opaque `serde_json::Value`
//! here; decoding happens at the handler boundary, keeping this layer
//! type-agnostic.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Highest value on the task priority scale (0..=10).
pub const MAX_PRIORITY: u8 = 10;

/// The kinds of work this core schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Reasoning,
    Codegen,
    Ml,
    Backtest,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [
        TaskType::Reasoning,
        TaskType::Codegen,
        TaskType::Ml,
        TaskType::Backtest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reasoning => "reasoning",
            Self::Codegen => "codegen",
            Self::Ml => "ml",
            Self::Backtest => "backtest",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reasoning" => Ok(Self::Reasoning),
            "codegen" => Ok(Self::Codegen),
            "ml" => Ok(Self::Ml),
            "backtest" => Ok(Self::Backtest),
            _ => Err(format!("Invalid task type: {s}")),
        }
    }
}

/// Delivery lane: express serves high-priority work on isolated streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Normal,
    Express,
}

impl Lane {
    pub const ALL: [Lane; 2] = [Lane::Normal, Lane::Express];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Express => "express",
        }
    }

    /// Routing rule: priority at or above the threshold rides express.
    /// Evaluated once at enqueue time, never on redelivery.
    pub fn for_priority(priority: u8, express_threshold: u8) -> Lane {
        if priority >= express_threshold {
            Lane::Express
        } else {
            Lane::Normal
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Saga linkage carried by tasks enqueued as workflow steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaContext {
    pub saga_id: Uuid,
    pub step_name: String,
}

/// A unit of work as it travels through a stream.
///
/// Immutable once enqueued except `attempt_count`, which is bumped on every
/// handler retry and on orphan reclaim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: Uuid,
    pub task_type: TaskType,
    pub priority: u8,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saga: Option<SagaContext>,
}

impl TaskMessage {
    /// Build a fresh task. Priority is clamped to the 0..=10 scale.
    pub fn new(task_type: TaskType, priority: u8, payload: serde_json::Value) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            task_type,
            priority: priority.min(MAX_PRIORITY),
            payload,
            created_at: Utc::now(),
            attempt_count: 0,
            saga: None,
        }
    }

    /// Tag this task as a saga step so workers publish its outcome.
    pub fn with_saga(mut self, saga_id: Uuid, step_name: impl Into<String>) -> Self {
        self.saga = Some(SagaContext {
            saga_id,
            step_name: step_name.into(),
        });
        self
    }

    pub fn increment_attempts(&mut self) {
        self.attempt_count += 1;
    }

    /// Age since the producer created the task.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}

/// Terminal result of a saga-tagged task, published on the outcomes stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub saga_id: Uuid,
    pub step_name: String,
    pub task_id: Uuid,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl StepOutcome {
    pub fn success(saga: &SagaContext, task_id: Uuid) -> Self {
        Self {
            saga_id: saga.saga_id,
            step_name: saga.step_name.clone(),
            task_id,
            success: true,
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failure(saga: &SagaContext, task_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            saga_id: saga.saga_id,
            step_name: saga.step_name.clone(),
            task_id,
            success: false,
            error: Some(error.into()),
            finished_at: Utc::now(),
        }
    }
}

/// Archive record for a task that exhausted its retry budget.
/// Append-only; read by operators, never replayed automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub original_task: TaskMessage,
    pub failure_reason: String,
    pub final_attempt_count: u32,
    pub moved_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(task: TaskMessage, failure_reason: impl Into<String>) -> Self {
        let final_attempt_count = task.attempt_count;
        Self {
            original_task: task,
            failure_reason: failure_reason.into(),
            final_attempt_count,
            moved_at: Utc::now(),
        }
    }
}

/// User-visible task status. Submitters only ever observe this plus the
/// task id; retry and reclaim mechanics stay internal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    DeadLettered,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::DeadLettered => "dead-lettered",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_routing_threshold() {
        assert_eq!(Lane::for_priority(8, 8), Lane::Express);
        assert_eq!(Lane::for_priority(10, 8), Lane::Express);
        assert_eq!(Lane::for_priority(7, 8), Lane::Normal);
        assert_eq!(Lane::for_priority(0, 8), Lane::Normal);
    }

    #[test]
    fn test_priority_is_clamped() {
        let task = TaskMessage::new(TaskType::Ml, 200, serde_json::json!({}));
        assert_eq!(task.priority, MAX_PRIORITY);
    }

    #[test]
    fn test_task_message_roundtrip() {
        let task = TaskMessage::new(
            TaskType::Backtest,
            9,
            serde_json::json!({"symbol": "ES", "window": 30}),
        )
        .with_saga(Uuid::new_v4(), "run_backtest");

        let serialized = serde_json::to_string(&task).expect("Failed to serialize");
        let deserialized: TaskMessage =
            serde_json::from_str(&serialized).expect("Failed to deserialize");

        assert_eq!(task.task_id, deserialized.task_id);
        assert_eq!(task.task_type, deserialized.task_type);
        assert_eq!(task.saga, deserialized.saga);
    }

    #[test]
    fn test_task_type_string_conversion() {
        assert_eq!(TaskType::Codegen.to_string(), "codegen");
        assert_eq!("backtest".parse::<TaskType>().unwrap(), TaskType::Backtest);
        assert!("unknown".parse::<TaskType>().is_err());
    }

    #[test]
    fn test_dead_letter_entry_preserves_attempts() {
        let mut task = TaskMessage::new(TaskType::Reasoning, 1, serde_json::json!({}));
        task.increment_attempts();
        task.increment_attempts();

        let entry = DeadLetterEntry::new(task, "handler exhausted retries");
        assert_eq!(entry.final_attempt_count, 2);
        assert!(entry.failure_reason.contains("exhausted"));
    }
}
