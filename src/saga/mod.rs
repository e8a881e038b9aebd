//! # Saga Module
//!
//! Multi-step workflow coordination without a distributed transaction. Each
//! step is enqueued as a task; on failure at step *k*, compensating actions
//! for steps *k−1 … 1* run in reverse order and the workflow lands in
//! `RolledBack`. The state machine is an explicit typed enum with a
//! transition table, so illegal transitions (e.g. `RolledBack → Completed`)
//! are unrepresentable rather than a runtime surprise.

pub mod orchestrator;
pub mod states;
pub mod step;

use thiserror::Error;

use crate::messaging::MessagingError;

pub use orchestrator::{SagaOrchestrator, SagaReport};
pub use states::{SagaState, SagaStateMachine};
pub use step::{CompensationAction, SagaDefinition, SagaStep};

/// Errors raised by saga construction and execution.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Definition rejected at construction time
    #[error("saga definition invalid: {0}")]
    InvalidDefinition(String),

    /// A transition outside the table was attempted
    #[error("illegal saga transition from {from} to {to}")]
    IllegalTransition { from: SagaState, to: SagaState },

    /// A step or compensation could not be enqueued
    #[error(transparent)]
    Messaging(#[from] MessagingError),

    /// The orchestrator's completion router is no longer running
    #[error("saga orchestrator is shut down")]
    ShutDown,
}
