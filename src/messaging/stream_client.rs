//! # Stream Client Trait
//!
//! The broker seam. Every component talks to the stream store through this
//! trait, so the Redis Streams implementation, the circuit-breaker-protected
//! wrapper, and the in-memory broker used in tests are interchangeable.
//!
//! Semantics follow Redis Streams consumer groups: append with a generated
//! id, blocking group reads that deliver each entry to at most one live
//! consumer, acknowledgement by id, and introspection/claiming of pending
//! (delivered-but-unacknowledged) entries.

use std::time::Duration;

use async_trait::async_trait;

use super::errors::MessagingResult;

/// A delivered stream entry: broker-assigned id plus the JSON payload.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub payload: serde_json::Value,
}

/// Broker-tracked state of a delivered-but-unacknowledged entry.
///
/// Derived state: queried by the acknowledger (verification) and the orphan
/// recovery loop (reclaim); owned exclusively by neither.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub message_id: String,
    pub consumer: String,
    pub idle: Duration,
    pub delivery_count: u64,
}

/// Typed access to an ordered, append-only stream store with consumer groups.
#[async_trait]
pub trait StreamClient: Send + Sync + 'static {
    /// Create the consumer group if absent. Idempotent.
    async fn ensure_group(&self, stream: &str, group: &str) -> MessagingResult<()>;

    /// Append a payload; returns the broker-assigned message id.
    async fn append(&self, stream: &str, payload: &serde_json::Value) -> MessagingResult<String>;

    /// Read up to `count` new entries for `consumer` within `group`,
    /// blocking up to `block` when the stream is drained.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> MessagingResult<Vec<StreamEntry>>;

    /// Acknowledge an entry. Returns the number of entries actually removed
    /// from the pending set (0 when already acknowledged: a no-op, not an
    /// error).
    async fn ack(&self, stream: &str, group: &str, message_id: &str) -> MessagingResult<u64>;

    /// List pending entries idle for at least `min_idle`, oldest first.
    async fn pending(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
        count: usize,
    ) -> MessagingResult<Vec<PendingEntry>>;

    /// Claim pending entries onto `consumer`, resetting their idle time and
    /// bumping their delivery count. Entries no longer pending are skipped.
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[String],
    ) -> MessagingResult<Vec<StreamEntry>>;

    /// Read up to `count` retained entries from the head of the stream
    /// without consuming them. Operator tooling only (dead-letter review).
    async fn range(&self, stream: &str, count: usize) -> MessagingResult<Vec<StreamEntry>>;

    /// Total entries currently retained on the stream.
    async fn stream_len(&self, stream: &str) -> MessagingResult<u64>;

    /// Number of pending (unacknowledged) entries for the group.
    async fn pending_count(&self, stream: &str, group: &str) -> MessagingResult<u64>;
}
