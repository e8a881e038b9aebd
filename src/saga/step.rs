//! Saga step and workflow definitions.
//!
//! A definition carries the ordered steps and, per step, the compensating
//! action that undoes it. Validation happens at construction so a malformed
//! workflow can never start executing.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::Value;

use crate::messaging::TaskType;

use super::SagaError;

/// The action enqueued to undo a completed step. Compensations must be
/// idempotent: after a saga deadline they can race a concurrently completing
/// step, and the losing writer's effect has to be a no-op.
#[derive(Debug, Clone)]
pub struct CompensationAction {
    pub task_type: TaskType,
    pub priority: u8,
    pub payload: Value,
}

impl CompensationAction {
    pub fn new(task_type: TaskType, priority: u8, payload: Value) -> Self {
        Self {
            task_type,
            priority,
            payload,
        }
    }
}

/// One ordered step of a workflow.
#[derive(Debug, Clone)]
pub struct SagaStep {
    /// Unique within the definition; completion signals key on it
    pub name: String,
    pub task_type: TaskType,
    pub priority: u8,
    pub payload: Value,
    pub compensation: CompensationAction,
}

impl SagaStep {
    pub fn new(
        name: impl Into<String>,
        task_type: TaskType,
        priority: u8,
        payload: Value,
        compensation: CompensationAction,
    ) -> Self {
        Self {
            name: name.into(),
            task_type,
            priority,
            payload,
            compensation,
        }
    }

    /// Step name the compensation's outcome is published under.
    pub fn compensation_name(&self) -> String {
        format!("compensate:{}", self.name)
    }
}

/// Ordered multi-step workflow with per-step compensations.
#[derive(Debug, Clone)]
pub struct SagaDefinition {
    pub name: String,
    pub steps: Vec<SagaStep>,
    /// Overrides the configured default deadline when set
    pub timeout: Option<Duration>,
}

impl SagaDefinition {
    /// Build a definition, rejecting empty workflows and duplicate step
    /// names up front.
    pub fn new(name: impl Into<String>, steps: Vec<SagaStep>) -> Result<Self, SagaError> {
        let name = name.into();
        if steps.is_empty() {
            return Err(SagaError::InvalidDefinition(format!(
                "saga '{name}' has no steps"
            )));
        }

        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.name.as_str()) {
                return Err(SagaError::InvalidDefinition(format!(
                    "saga '{name}' has duplicate step name '{}'",
                    step.name
                )));
            }
        }

        Ok(Self {
            name,
            steps,
            timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(name: &str) -> SagaStep {
        SagaStep::new(
            name,
            TaskType::Backtest,
            5,
            json!({"step": name}),
            CompensationAction::new(TaskType::Backtest, 5, json!({"undo": name})),
        )
    }

    #[test]
    fn test_valid_definition() {
        let saga = SagaDefinition::new("nightly", vec![step("a"), step("b")]).unwrap();
        assert_eq!(saga.step_count(), 2);
        assert!(saga.timeout.is_none());
    }

    #[test]
    fn test_empty_definition_rejected() {
        let result = SagaDefinition::new("empty", vec![]);
        assert!(matches!(result, Err(SagaError::InvalidDefinition(_))));
    }

    #[test]
    fn test_duplicate_step_names_rejected() {
        let result = SagaDefinition::new("dup", vec![step("a"), step("a")]);
        assert!(matches!(result, Err(SagaError::InvalidDefinition(_))));
    }

    #[test]
    fn test_compensation_name_is_derived() {
        assert_eq!(step("reserve").compensation_name(), "compensate:reserve");
    }
}
