//! # Worker Heartbeats
//!
//! TTL-based liveness. Each worker owns one [`WorkerRecord`] stored under
//! `worker:heartbeat:{worker_id}` and refreshes it on an independent timer,
//! so a slow handler never starves liveness reporting. A record that stops
//! being refreshed expires, and expiry is the sole death signal: no
//! process-to-process health RPC exists anywhere in the core.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::messaging::{MessagingError, MessagingResult};

/// Key prefix for heartbeat records.
pub const HEARTBEAT_KEY_PREFIX: &str = "worker:heartbeat:";

/// What a worker is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Processing,
}

/// Liveness record owned by exactly one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub worker_id: String,
    pub pool_name: String,
    pub status: WorkerStatus,
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl WorkerRecord {
    pub fn new(worker_id: impl Into<String>, pool_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            worker_id: worker_id.into(),
            pool_name: pool_name.into(),
            status: WorkerStatus::Idle,
            tasks_processed: 0,
            tasks_failed: 0,
            started_at: now,
            last_heartbeat: now,
        }
    }
}

/// Heartbeat persistence with TTL expiry as the liveness oracle.
#[async_trait]
pub trait HeartbeatStore: Send + Sync + 'static {
    /// Write (or refresh) a record with the given TTL.
    async fn put(&self, record: &WorkerRecord, ttl: Duration) -> MessagingResult<()>;

    /// Fetch a record; `None` means the worker is dead or never existed.
    async fn get(&self, worker_id: &str) -> MessagingResult<Option<WorkerRecord>>;

    /// Remove a record on clean shutdown.
    async fn remove(&self, worker_id: &str) -> MessagingResult<()>;

    /// All currently live workers.
    async fn live_workers(&self) -> MessagingResult<Vec<WorkerRecord>>;
}

/// Redis-backed heartbeat store (`SET ... EX`).
#[derive(Clone)]
pub struct RedisHeartbeatStore {
    redis: ConnectionManager,
}

impl RedisHeartbeatStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn key(worker_id: &str) -> String {
        format!("{HEARTBEAT_KEY_PREFIX}{worker_id}")
    }
}

#[async_trait]
impl HeartbeatStore for RedisHeartbeatStore {
    async fn put(&self, record: &WorkerRecord, ttl: Duration) -> MessagingResult<()> {
        let mut conn = self.redis.clone();
        let raw = serde_json::to_string(record)?;
        conn.set_ex::<_, _, ()>(
            Self::key(&record.worker_id),
            raw,
            ttl.as_secs().max(1) as u64,
        )
        .await
        .map_err(MessagingError::from)?;
        Ok(())
    }

    async fn get(&self, worker_id: &str) -> MessagingResult<Option<WorkerRecord>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn
            .get(Self::key(worker_id))
            .await
            .map_err(MessagingError::from)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn remove(&self, worker_id: &str) -> MessagingResult<()> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(Self::key(worker_id))
            .await
            .map_err(MessagingError::from)?;
        Ok(())
    }

    async fn live_workers(&self) -> MessagingResult<Vec<WorkerRecord>> {
        let mut conn = self.redis.clone();
        let pattern = format!("{HEARTBEAT_KEY_PREFIX}*");

        let keys: Vec<String> = {
            let mut iter: redis::AsyncIter<String> = conn
                .scan_match(pattern)
                .await
                .map_err(MessagingError::from)?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let raw: Option<String> = conn.get(&key).await.map_err(MessagingError::from)?;
            if let Some(raw) = raw {
                if let Ok(record) = serde_json::from_str::<WorkerRecord>(&raw) {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }
}

/// In-memory heartbeat store honoring TTL expiry, for tests and embedded use.
#[derive(Default)]
pub struct InMemoryHeartbeatStore {
    records: DashMap<String, (WorkerRecord, Instant)>,
}

impl InMemoryHeartbeatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HeartbeatStore for InMemoryHeartbeatStore {
    async fn put(&self, record: &WorkerRecord, ttl: Duration) -> MessagingResult<()> {
        self.records.insert(
            record.worker_id.clone(),
            (record.clone(), Instant::now() + ttl),
        );
        Ok(())
    }

    async fn get(&self, worker_id: &str) -> MessagingResult<Option<WorkerRecord>> {
        Ok(self.records.get(worker_id).and_then(|entry| {
            let (record, expires_at) = entry.value();
            (Instant::now() < *expires_at).then(|| record.clone())
        }))
    }

    async fn remove(&self, worker_id: &str) -> MessagingResult<()> {
        self.records.remove(worker_id);
        Ok(())
    }

    async fn live_workers(&self) -> MessagingResult<Vec<WorkerRecord>> {
        let now = Instant::now();
        Ok(self
            .records
            .iter()
            .filter(|entry| now < entry.value().1)
            .map(|entry| entry.value().0.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_expires_without_refresh() {
        let store = InMemoryHeartbeatStore::new();
        let record = WorkerRecord::new("w1", "reasoning-normal");

        store.put(&record, Duration::from_millis(30)).await.unwrap();
        assert!(store.get("w1").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.get("w1").await.unwrap().is_none());
        assert!(store.live_workers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_extends_liveness() {
        let store = InMemoryHeartbeatStore::new();
        let mut record = WorkerRecord::new("w1", "ml-express");

        store.put(&record, Duration::from_millis(40)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;

        record.last_heartbeat = Utc::now();
        record.tasks_processed = 7;
        store.put(&record, Duration::from_millis(40)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(25)).await;
        let fetched = store.get("w1").await.unwrap().expect("still live");
        assert_eq!(fetched.tasks_processed, 7);
    }

    #[tokio::test]
    async fn test_remove_on_clean_shutdown() {
        let store = InMemoryHeartbeatStore::new();
        let record = WorkerRecord::new("w1", "codegen-normal");
        store.put(&record, Duration::from_secs(60)).await.unwrap();

        store.remove("w1").await.unwrap();
        assert!(store.get("w1").await.unwrap().is_none());
    }
}
