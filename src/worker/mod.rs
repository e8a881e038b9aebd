//! # Worker Module
//!
//! Worker pools per `(task type, lane)`: concurrent consumer loops that
//! claim tasks from the stream, run the registered handler with a per-lane
//! processing budget, acknowledge through the reliable acknowledger, and
//! report liveness through TTL heartbeat records.

pub mod handler;
pub mod heartbeat;
pub mod pool;

use std::time::Duration;

use thiserror::Error;

use crate::messaging::{MessagingError, TaskType};

pub use handler::{HandlerContext, HandlerRegistry, TaskHandler};
pub use heartbeat::{
    HeartbeatStore, InMemoryHeartbeatStore, RedisHeartbeatStore, WorkerRecord, WorkerStatus,
    HEARTBEAT_KEY_PREFIX,
};
pub use pool::{PoolConfig, PoolContext, PoolStats, WorkerPool};

/// Errors raised inside worker pools and handlers.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Task-specific failure, counted against the attempt budget
    #[error("handler failed: {0}")]
    Handler(String),

    #[error("handler timed out after {0:?}")]
    HandlerTimeout(Duration),

    #[error("no handler registered for task type {0}")]
    HandlerNotFound(TaskType),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error("pool is already running")]
    AlreadyRunning,

    #[error("shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}
