//! Saga workflow states and the transition table.
//!
//! The machine is parameterized by the number of steps in the definition and
//! validates every transition against the table below; anything else is an
//! [`SagaError::IllegalTransition`].
//!
//! ```text
//! Pending ──▶ ExecutingStep(0) ──▶ … ──▶ ExecutingStep(n-1) ──▶ Completed
//!    │              │ failure/deadline
//!    └──────────────▼
//!                 Failed ──▶ Compensating(k) ──▶ … ──▶ Compensating(0) ──▶ RolledBack
//!                    └──────────────────────────────────────────────────────▶ (nothing completed)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::SagaError;

/// Workflow state. `ExecutingStep`/`Compensating` carry the step index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "step")]
pub enum SagaState {
    /// Created, no step dispatched yet
    Pending,
    /// Step `i` is in flight
    ExecutingStep(usize),
    /// A step failed or the deadline passed; compensation not yet started
    Failed,
    /// Compensation for completed step `i` is in flight
    Compensating(usize),
    /// Every step succeeded
    Completed,
    /// Compensation chain finished after a failure
    RolledBack,
}

impl SagaState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::RolledBack)
    }
}

impl fmt::Display for SagaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::ExecutingStep(i) => write!(f, "executing_step({i})"),
            Self::Failed => write!(f, "failed"),
            Self::Compensating(i) => write!(f, "compensating({i})"),
            Self::Completed => write!(f, "completed"),
            Self::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// Explicit state machine over [`SagaState`], sized at construction from the
/// saga definition.
#[derive(Debug, Clone)]
pub struct SagaStateMachine {
    state: SagaState,
    step_count: usize,
}

impl SagaStateMachine {
    pub fn new(step_count: usize) -> Self {
        Self {
            state: SagaState::Pending,
            step_count,
        }
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    /// Whether `from → to` is in the transition table.
    fn allowed(&self, from: SagaState, to: SagaState) -> bool {
        use SagaState::*;
        let n = self.step_count;
        match (from, to) {
            (Pending, ExecutingStep(0)) => true,
            (Pending, Failed) => true,
            (ExecutingStep(i), ExecutingStep(j)) => j == i + 1 && j < n,
            (ExecutingStep(i), Completed) => i + 1 == n,
            (ExecutingStep(i), Failed) => i < n,
            (Failed, Compensating(i)) => i < n,
            (Failed, RolledBack) => true,
            (Compensating(i), Compensating(j)) => j + 1 == i,
            (Compensating(_), RolledBack) => true,
            _ => false,
        }
    }

    /// Apply a transition, rejecting anything outside the table.
    pub fn transition(&mut self, to: SagaState) -> Result<(), SagaError> {
        if !self.allowed(self.state, to) {
            return Err(SagaError::IllegalTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut machine = SagaStateMachine::new(3);
        machine.transition(SagaState::ExecutingStep(0)).unwrap();
        machine.transition(SagaState::ExecutingStep(1)).unwrap();
        machine.transition(SagaState::ExecutingStep(2)).unwrap();
        machine.transition(SagaState::Completed).unwrap();
        assert!(machine.state().is_terminal());
    }

    #[test]
    fn test_failure_and_reverse_compensation() {
        let mut machine = SagaStateMachine::new(4);
        machine.transition(SagaState::ExecutingStep(0)).unwrap();
        machine.transition(SagaState::ExecutingStep(1)).unwrap();
        machine.transition(SagaState::ExecutingStep(2)).unwrap();
        machine.transition(SagaState::Failed).unwrap();
        // Steps 0 and 1 completed; compensation runs 1 then 0
        machine.transition(SagaState::Compensating(1)).unwrap();
        machine.transition(SagaState::Compensating(0)).unwrap();
        machine.transition(SagaState::RolledBack).unwrap();
        assert_eq!(machine.state(), SagaState::RolledBack);
    }

    #[test]
    fn test_rolled_back_cannot_complete() {
        let mut machine = SagaStateMachine::new(1);
        machine.transition(SagaState::ExecutingStep(0)).unwrap();
        machine.transition(SagaState::Failed).unwrap();
        machine.transition(SagaState::RolledBack).unwrap();

        let result = machine.transition(SagaState::Completed);
        assert!(matches!(
            result,
            Err(SagaError::IllegalTransition { .. })
        ));
        assert_eq!(machine.state(), SagaState::RolledBack);
    }

    #[test]
    fn test_cannot_skip_steps() {
        let mut machine = SagaStateMachine::new(3);
        machine.transition(SagaState::ExecutingStep(0)).unwrap();
        assert!(machine.transition(SagaState::ExecutingStep(2)).is_err());
    }

    #[test]
    fn test_compensation_must_run_in_reverse() {
        let mut machine = SagaStateMachine::new(3);
        machine.transition(SagaState::ExecutingStep(0)).unwrap();
        machine.transition(SagaState::ExecutingStep(1)).unwrap();
        machine.transition(SagaState::Failed).unwrap();
        machine.transition(SagaState::Compensating(0)).unwrap();
        // Reverse order only: 0 cannot be followed by 1
        assert!(machine.transition(SagaState::Compensating(1)).is_err());
    }

    #[test]
    fn test_early_completion_is_illegal() {
        let mut machine = SagaStateMachine::new(2);
        machine.transition(SagaState::ExecutingStep(0)).unwrap();
        assert!(machine.transition(SagaState::Completed).is_err());
    }

    #[test]
    fn test_timeout_before_first_step() {
        let mut machine = SagaStateMachine::new(2);
        machine.transition(SagaState::Failed).unwrap();
        machine.transition(SagaState::RolledBack).unwrap();
    }

    #[test]
    fn test_state_serde_roundtrip() {
        let state = SagaState::ExecutingStep(2);
        let json = serde_json::to_string(&state).unwrap();
        let parsed: SagaState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }
}
