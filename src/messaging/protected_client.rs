//! # Circuit Breaker Protected Stream Client
//!
//! Wraps any [`StreamClient`] with circuit breaker protection so a broker
//! outage trips one breaker instead of cascading an error storm through every
//! worker loop and background task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::resilience::CircuitBreakerManager;

use super::errors::MessagingResult;
use super::stream_client::{PendingEntry, StreamClient, StreamEntry};

/// Dependency name the broker breaker is registered under.
pub const BROKER_COMPONENT: &str = "stream_broker";

/// Stream client with circuit breaker protection.
#[derive(Clone)]
pub struct ProtectedStreamClient {
    /// Underlying stream client
    client: Arc<dyn StreamClient>,

    /// Circuit breaker registry
    circuit_manager: Arc<CircuitBreakerManager>,
}

impl ProtectedStreamClient {
    pub fn new(client: Arc<dyn StreamClient>, circuit_manager: Arc<CircuitBreakerManager>) -> Self {
        Self {
            client,
            circuit_manager,
        }
    }

    /// Whether the broker is currently considered healthy.
    pub async fn is_healthy(&self) -> bool {
        self.circuit_manager
            .breaker(BROKER_COMPONENT)
            .is_healthy()
            .await
    }
}

#[async_trait]
impl StreamClient for ProtectedStreamClient {
    async fn ensure_group(&self, stream: &str, group: &str) -> MessagingResult<()> {
        let breaker = self.circuit_manager.breaker(BROKER_COMPONENT);
        breaker
            .call(|| async { self.client.ensure_group(stream, group).await })
            .await
            .map_err(Into::into)
    }

    async fn append(&self, stream: &str, payload: &serde_json::Value) -> MessagingResult<String> {
        let breaker = self.circuit_manager.breaker(BROKER_COMPONENT);
        breaker
            .call(|| async { self.client.append(stream, payload).await })
            .await
            .map_err(Into::into)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> MessagingResult<Vec<StreamEntry>> {
        let breaker = self.circuit_manager.breaker(BROKER_COMPONENT);
        breaker
            .call(|| async {
                self.client
                    .read_group(stream, group, consumer, count, block)
                    .await
            })
            .await
            .map_err(Into::into)
    }

    async fn ack(&self, stream: &str, group: &str, message_id: &str) -> MessagingResult<u64> {
        let breaker = self.circuit_manager.breaker(BROKER_COMPONENT);
        breaker
            .call(|| async { self.client.ack(stream, group, message_id).await })
            .await
            .map_err(Into::into)
    }

    async fn pending(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
        count: usize,
    ) -> MessagingResult<Vec<PendingEntry>> {
        let breaker = self.circuit_manager.breaker(BROKER_COMPONENT);
        breaker
            .call(|| async { self.client.pending(stream, group, min_idle, count).await })
            .await
            .map_err(Into::into)
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[String],
    ) -> MessagingResult<Vec<StreamEntry>> {
        let breaker = self.circuit_manager.breaker(BROKER_COMPONENT);
        breaker
            .call(|| async {
                self.client
                    .claim(stream, group, consumer, min_idle, ids)
                    .await
            })
            .await
            .map_err(Into::into)
    }

    async fn range(&self, stream: &str, count: usize) -> MessagingResult<Vec<StreamEntry>> {
        let breaker = self.circuit_manager.breaker(BROKER_COMPONENT);
        breaker
            .call(|| async { self.client.range(stream, count).await })
            .await
            .map_err(Into::into)
    }

    async fn stream_len(&self, stream: &str) -> MessagingResult<u64> {
        let breaker = self.circuit_manager.breaker(BROKER_COMPONENT);
        breaker
            .call(|| async { self.client.stream_len(stream).await })
            .await
            .map_err(Into::into)
    }

    async fn pending_count(&self, stream: &str, group: &str) -> MessagingResult<u64> {
        let breaker = self.circuit_manager.breaker(BROKER_COMPONENT);
        breaker
            .call(|| async { self.client.pending_count(stream, group).await })
            .await
            .map_err(Into::into)
    }
}
