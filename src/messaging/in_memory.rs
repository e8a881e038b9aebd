//! # In-Memory Stream Broker
//!
//! A process-local [`StreamClient`] with full consumer-group semantics:
//! per-group delivery cursors, pending-entry bookkeeping with idle times and
//! delivery counts, claim with idle reset, and blocking reads via [`Notify`].
//!
//! Used by the test suites and by embedded deployments that do not need a
//! broker process; behavior mirrors the Redis implementation so tests
//! exercise the same delivery contract production runs against.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::errors::MessagingResult;
use super::stream_client::{PendingEntry, StreamClient, StreamEntry};

#[derive(Default)]
struct PendingState {
    consumer: String,
    delivered_at: Option<Instant>,
    delivery_count: u64,
    index: usize,
}

#[derive(Default)]
struct GroupState {
    /// Cursor into the entry log: everything before it has been delivered.
    next_index: usize,
    pending: HashMap<String, PendingState>,
}

#[derive(Default)]
struct StreamState {
    entries: Vec<(String, serde_json::Value)>,
    next_seq: u64,
    groups: HashMap<String, GroupState>,
}

/// In-memory broker; cheap to clone, all clones share state.
#[derive(Clone, Default)]
pub struct InMemoryStreamClient {
    streams: Arc<Mutex<HashMap<String, StreamState>>>,
    appended: Arc<Notify>,
}

impl InMemoryStreamClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_read(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Vec<StreamEntry> {
        let mut streams = self.streams.lock();
        let state = streams.entry(stream.to_string()).or_default();
        let total = state.entries.len();
        let group_state = state.groups.entry(group.to_string()).or_default();

        let mut delivered = Vec::new();
        while group_state.next_index < total && delivered.len() < count {
            let index = group_state.next_index;
            group_state.next_index += 1;

            let (id, payload) = state.entries[index].clone();
            group_state.pending.insert(
                id.clone(),
                PendingState {
                    consumer: consumer.to_string(),
                    delivered_at: Some(Instant::now()),
                    delivery_count: 1,
                    index,
                },
            );
            delivered.push(StreamEntry { id, payload });
        }
        delivered
    }
}

#[async_trait]
impl StreamClient for InMemoryStreamClient {
    async fn ensure_group(&self, stream: &str, group: &str) -> MessagingResult<()> {
        let mut streams = self.streams.lock();
        streams
            .entry(stream.to_string())
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default();
        Ok(())
    }

    async fn append(&self, stream: &str, payload: &serde_json::Value) -> MessagingResult<String> {
        let id = {
            let mut streams = self.streams.lock();
            let state = streams.entry(stream.to_string()).or_default();
            state.next_seq += 1;
            let id = format!("{}-0", state.next_seq);
            state.entries.push((id.clone(), payload.clone()));
            id
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> MessagingResult<Vec<StreamEntry>> {
        let deadline = Instant::now() + block;
        loop {
            let delivered = self.try_read(stream, group, consumer, count);
            if !delivered.is_empty() {
                return Ok(delivered);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            // Wake on append or give up at the deadline; a missed wakeup only
            // costs one bounded wait.
            let _ = tokio::time::timeout(remaining, self.appended.notified()).await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, message_id: &str) -> MessagingResult<u64> {
        let mut streams = self.streams.lock();
        let removed = streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
            .map(|g| g.pending.remove(message_id).is_some())
            .unwrap_or(false);
        Ok(u64::from(removed))
    }

    async fn pending(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
        count: usize,
    ) -> MessagingResult<Vec<PendingEntry>> {
        let streams = self.streams.lock();
        let Some(group_state) = streams.get(stream).and_then(|s| s.groups.get(group)) else {
            return Ok(Vec::new());
        };

        let mut entries: Vec<PendingEntry> = group_state
            .pending
            .iter()
            .filter_map(|(id, p)| {
                let idle = p.delivered_at.map(|t| t.elapsed()).unwrap_or_default();
                (idle >= min_idle).then(|| PendingEntry {
                    message_id: id.clone(),
                    consumer: p.consumer.clone(),
                    idle,
                    delivery_count: p.delivery_count,
                })
            })
            .collect();

        entries.sort_by(|a, b| b.idle.cmp(&a.idle));
        entries.truncate(count);
        Ok(entries)
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[String],
    ) -> MessagingResult<Vec<StreamEntry>> {
        let mut streams = self.streams.lock();
        let Some(state) = streams.get_mut(stream) else {
            return Ok(Vec::new());
        };
        let entries = &state.entries;
        let Some(group_state) = state.groups.get_mut(group) else {
            return Ok(Vec::new());
        };

        let mut claimed = Vec::new();
        for id in ids {
            if let Some(pending) = group_state.pending.get_mut(id) {
                let idle = pending.delivered_at.map(|t| t.elapsed()).unwrap_or_default();
                if idle < min_idle {
                    continue;
                }
                pending.consumer = consumer.to_string();
                // Idle time resets on a successful re-claim
                pending.delivered_at = Some(Instant::now());
                pending.delivery_count += 1;

                let (entry_id, payload) = entries[pending.index].clone();
                claimed.push(StreamEntry {
                    id: entry_id,
                    payload,
                });
            }
        }
        Ok(claimed)
    }

    async fn range(&self, stream: &str, count: usize) -> MessagingResult<Vec<StreamEntry>> {
        let streams = self.streams.lock();
        Ok(streams
            .get(stream)
            .map(|s| {
                s.entries
                    .iter()
                    .take(count)
                    .map(|(id, payload)| StreamEntry {
                        id: id.clone(),
                        payload: payload.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn stream_len(&self, stream: &str) -> MessagingResult<u64> {
        let streams = self.streams.lock();
        Ok(streams
            .get(stream)
            .map(|s| s.entries.len() as u64)
            .unwrap_or(0))
    }

    async fn pending_count(&self, stream: &str, group: &str) -> MessagingResult<u64> {
        let streams = self.streams.lock();
        Ok(streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_group_delivery_and_ack() {
        let client = InMemoryStreamClient::new();
        client.ensure_group("s", "g").await.unwrap();

        let id = client.append("s", &json!({"n": 1})).await.unwrap();
        let read = client
            .read_group("s", "g", "c1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].id, id);

        // Entry is pending until acknowledged
        assert_eq!(client.pending_count("s", "g").await.unwrap(), 1);
        assert_eq!(client.ack("s", "g", &id).await.unwrap(), 1);
        assert_eq!(client.pending_count("s", "g").await.unwrap(), 0);

        // Double-ack is a no-op, not an error
        assert_eq!(client.ack("s", "g", &id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_each_entry_delivered_to_one_consumer() {
        let client = InMemoryStreamClient::new();
        client.ensure_group("s", "g").await.unwrap();
        for n in 0..4 {
            client.append("s", &json!({ "n": n })).await.unwrap();
        }

        let a = client
            .read_group("s", "g", "a", 2, Duration::ZERO)
            .await
            .unwrap();
        let b = client
            .read_group("s", "g", "b", 10, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 2);
        let mut ids: Vec<_> = a.iter().chain(b.iter()).map(|e| e.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4, "no entry delivered twice");
    }

    #[tokio::test]
    async fn test_claim_resets_idle_and_bumps_delivery_count() {
        let client = InMemoryStreamClient::new();
        client.ensure_group("s", "g").await.unwrap();
        let id = client.append("s", &json!({})).await.unwrap();
        client
            .read_group("s", "g", "dead-consumer", 1, Duration::ZERO)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        let claimed = client
            .claim("s", "g", "recovery", Duration::from_millis(10), &[id.clone()])
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);

        let pending = client
            .pending("s", "g", Duration::ZERO, 10)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].consumer, "recovery");
        assert_eq!(pending[0].delivery_count, 2);
        assert!(pending[0].idle < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_blocking_read_wakes_on_append() {
        let client = InMemoryStreamClient::new();
        client.ensure_group("s", "g").await.unwrap();

        let reader = client.clone();
        let handle = tokio::spawn(async move {
            reader
                .read_group("s", "g", "c", 1, Duration::from_secs(5))
                .await
                .unwrap()
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        client.append("s", &json!({"wake": true})).await.unwrap();

        let read = handle.await.unwrap();
        assert_eq!(read.len(), 1);
    }
}
