#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # TaskStream Core
//!
//! Distributed task orchestration core: accepts heterogeneous units of work
//! (reasoning, code generation, ML, backtests), distributes them across
//! worker pools through a stream broker with consumer-group semantics,
//! guarantees at-least-once delivery with bounded-time recovery of stuck
//! work, isolates failing dependencies behind circuit breakers, and
//! coordinates multi-step workflows with compensating rollback.
//!
//! ## Architecture
//!
//! - [`messaging`] - stream broker seam (Redis Streams / in-memory), typed
//!   task queue with priority-lane routing, verified acknowledgement,
//!   dead-letter archive, task status store
//! - [`worker`] - worker pools per `(type, lane)` with TTL heartbeats and
//!   cooperative shutdown
//! - [`resilience`] - per-dependency circuit breakers behind an injected
//!   registry
//! - [`saga`] - explicit workflow state machine with reverse-order
//!   compensation
//! - [`orchestration`] - priority router, orphan recovery loop, autoscaler,
//!   and the bootstrap core
//! - [`metrics`] - Prometheus instruments and text exposition
//! - [`config`] - environment-overlaid YAML configuration
//!
//! ## Delivery contract
//!
//! At-least-once, never exactly-once: every task is eventually acknowledged
//! or dead-lettered within a bounded time, a crashed consumer's work is
//! reclaimed within `idle_threshold + poll_interval`, and acknowledging an
//! already-acknowledged entry is a no-op.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskstream_core::config::OrchestrationConfig;
//! use taskstream_core::messaging::{InMemoryStatusStore, InMemoryStreamClient, TaskType};
//! use taskstream_core::orchestration::OrchestrationCore;
//! use taskstream_core::worker::{HandlerRegistry, InMemoryHeartbeatStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handlers = Arc::new(HandlerRegistry::new());
//! // handlers.register(TaskType::Reasoning, Arc::new(MyHandler));
//!
//! let core = OrchestrationCore::start(
//!     OrchestrationConfig::default(),
//!     Arc::new(InMemoryStreamClient::new()),
//!     Arc::new(InMemoryHeartbeatStore::new()),
//!     Arc::new(InMemoryStatusStore::new()),
//!     handlers,
//! )
//! .await?;
//!
//! let task_id = core
//!     .submit(TaskType::Reasoning, 9, serde_json::json!({"question": "why"}))
//!     .await?;
//! let status = core.task_status(task_id).await?;
//! println!("{task_id} is {status:?}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod messaging;
pub mod metrics;
pub mod orchestration;
pub mod resilience;
pub mod saga;
pub mod telemetry;
pub mod worker;

pub use config::{ConfigManager, OrchestrationConfig};
pub use error::{OrchestratorError, Result};
pub use messaging::{Lane, TaskMessage, TaskStatus, TaskType};
pub use orchestration::OrchestrationCore;
