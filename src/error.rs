//! # Crate-Level Error Types
//!
//! Top-level error enum aggregating the structured errors of each subsystem.
//! Components define their own thiserror enums; this type exists for callers
//! that drive the whole core (bootstrap, background loops) and need a single
//! error channel.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::saga::SagaError;
use crate::worker::WorkerError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("saga error: {0}")]
    Saga(#[from] SagaError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("timeout: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
