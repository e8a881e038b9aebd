//! # Messaging Module
//!
//! Stream-based messaging for task orchestration: the broker seam
//! ([`StreamClient`]), its Redis Streams and in-memory implementations, the
//! circuit-breaker-protected wrapper, the typed task queue with
//! priority-lane routing, verified acknowledgement, and the user-visible
//! task status store.

pub mod acknowledger;
pub mod errors;
pub mod in_memory;
pub mod message;
pub mod protected_client;
pub mod queue_client;
pub mod redis_client;
pub mod status_store;
pub mod stream_client;

pub use acknowledger::{AckFailure, AckOutcome, ReliableAcknowledger};
pub use errors::{MessagingError, MessagingResult};
pub use in_memory::InMemoryStreamClient;
pub use message::{
    DeadLetterEntry, Lane, SagaContext, StepOutcome, TaskMessage, TaskStatus, TaskType,
    MAX_PRIORITY,
};
pub use protected_client::{ProtectedStreamClient, BROKER_COMPONENT};
pub use queue_client::{DeliveredTask, TaskQueueClient};
pub use redis_client::RedisStreamClient;
pub use status_store::{InMemoryStatusStore, RedisStatusStore, TaskStatusStore, STATUS_TTL};
pub use stream_client::{PendingEntry, StreamClient, StreamEntry};
