//! # Reliable Acknowledger
//!
//! Acknowledgement with bounded retries and pending-set verification. A
//! broker call can "succeed" at the client while the broker fails to commit;
//! after every ack this component checks the entry really left the pending
//! set before reporting success.
//!
//! An exhausted acknowledgement is **not** a task failure: the caller must
//! leave the entry alone and let orphan recovery heal it. That is why the
//! failure type logs at warn level, not error.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::AckConfig;
use crate::metrics::OrchestrationMetrics;

use super::errors::MessagingResult;
use super::stream_client::StreamClient;

/// Successful acknowledgement outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The entry was removed from the pending set by this call
    Acked,
    /// The entry was not pending anymore; acknowledging twice is a no-op
    AlreadyAcked,
}

/// Acknowledgement gave up after bounded attempts. Non-fatal by contract:
/// the entry stays pending and orphan recovery will reclaim it.
#[derive(Debug, Clone, Error)]
#[error("acknowledgement unverified for {message_id} on {stream} after {attempts} attempts")]
pub struct AckFailure {
    pub stream: String,
    pub message_id: String,
    pub attempts: u32,
}

/// Acknowledger with retry and verification.
#[derive(Clone)]
pub struct ReliableAcknowledger {
    client: Arc<dyn StreamClient>,
    config: AckConfig,
    metrics: Arc<OrchestrationMetrics>,
}

impl ReliableAcknowledger {
    pub fn new(
        client: Arc<dyn StreamClient>,
        config: AckConfig,
        metrics: Arc<OrchestrationMetrics>,
    ) -> Self {
        Self {
            client,
            config,
            metrics,
        }
    }

    /// Acknowledge `message_id`, retrying transport failures and verifying
    /// the entry left the pending set.
    pub async fn ack_with_retry(
        &self,
        stream: &str,
        group: &str,
        message_id: &str,
    ) -> Result<AckOutcome, AckFailure> {
        let mut acked_by_this_call = false;

        for attempt in 1..=self.config.max_attempts {
            match self.client.ack(stream, group, message_id).await {
                Ok(removed) => {
                    acked_by_this_call = acked_by_this_call || removed > 0;

                    match self.verify_not_pending(stream, group, message_id).await {
                        Ok(true) => {
                            debug!(
                                stream = %stream,
                                message_id = %message_id,
                                attempt,
                                "Acknowledgement verified"
                            );
                            return Ok(if acked_by_this_call {
                                AckOutcome::Acked
                            } else {
                                AckOutcome::AlreadyAcked
                            });
                        }
                        Ok(false) => {
                            // Client call succeeded but the broker still lists
                            // the entry as pending; retry the whole ack
                            warn!(
                                stream = %stream,
                                message_id = %message_id,
                                attempt,
                                "Ack reported success but entry still pending"
                            );
                        }
                        Err(e) => {
                            warn!(
                                stream = %stream,
                                message_id = %message_id,
                                attempt,
                                error = %e,
                                "Pending verification failed"
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        stream = %stream,
                        message_id = %message_id,
                        attempt,
                        error = %e,
                        "Acknowledgement attempt failed"
                    );
                }
            }

            if attempt < self.config.max_attempts {
                tokio::time::sleep(self.config.retry_backoff() * attempt).await;
            }
        }

        self.metrics.ack_failures_total.inc();
        let failure = AckFailure {
            stream: stream.to_string(),
            message_id: message_id.to_string(),
            attempts: self.config.max_attempts,
        };
        // Warn, not error: orphan recovery heals this without operator action
        warn!(
            stream = %stream,
            message_id = %message_id,
            attempts = failure.attempts,
            "Acknowledgement unverified, leaving entry for orphan recovery"
        );
        Err(failure)
    }

    /// True when the entry is absent from the group's pending set.
    async fn verify_not_pending(
        &self,
        stream: &str,
        group: &str,
        message_id: &str,
    ) -> MessagingResult<bool> {
        let pending = self
            .client
            .pending(stream, group, Duration::ZERO, self.config.verify_batch_size)
            .await?;
        Ok(!pending.iter().any(|p| p.message_id == message_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::in_memory::InMemoryStreamClient;
    use serde_json::json;

    fn acknowledger(client: Arc<dyn StreamClient>) -> ReliableAcknowledger {
        ReliableAcknowledger::new(
            client,
            AckConfig {
                max_attempts: 3,
                retry_backoff_ms: 1,
                verify_batch_size: 100,
            },
            Arc::new(OrchestrationMetrics::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn test_ack_and_verify() {
        let client = Arc::new(InMemoryStreamClient::new());
        client.ensure_group("s", "g").await.unwrap();
        let id = client.append("s", &json!({})).await.unwrap();
        client
            .read_group("s", "g", "w", 1, Duration::ZERO)
            .await
            .unwrap();

        let acker = acknowledger(client.clone());
        let outcome = acker.ack_with_retry("s", "g", &id).await.unwrap();
        assert_eq!(outcome, AckOutcome::Acked);
        assert_eq!(client.pending_count("s", "g").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_double_ack_is_noop() {
        let client = Arc::new(InMemoryStreamClient::new());
        client.ensure_group("s", "g").await.unwrap();
        let id = client.append("s", &json!({})).await.unwrap();
        client
            .read_group("s", "g", "w", 1, Duration::ZERO)
            .await
            .unwrap();

        let acker = acknowledger(client.clone());
        assert_eq!(
            acker.ack_with_retry("s", "g", &id).await.unwrap(),
            AckOutcome::Acked
        );
        assert_eq!(
            acker.ack_with_retry("s", "g", &id).await.unwrap(),
            AckOutcome::AlreadyAcked
        );
    }

    #[tokio::test]
    async fn test_ack_of_never_delivered_id_verifies_clean() {
        let client = Arc::new(InMemoryStreamClient::new());
        client.ensure_group("s", "g").await.unwrap();

        // Nothing pending: verification passes immediately
        let acker = acknowledger(client);
        let outcome = acker.ack_with_retry("s", "g", "1-0").await.unwrap();
        assert_eq!(outcome, AckOutcome::AlreadyAcked);
    }
}
