//! # Task Status Store
//!
//! User-visible task status keyed by task id. Submitters query this through
//! the front door; the worker pool and recovery loop keep it current as tasks
//! move through their lifecycle. Entries carry a TTL so the store does not
//! grow without bound.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use super::errors::{MessagingError, MessagingResult};
use super::message::TaskStatus;

/// How long a status entry stays queryable.
pub const STATUS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Status lookup and update, keyed by task id.
#[async_trait]
pub trait TaskStatusStore: Send + Sync + 'static {
    async fn set(&self, task_id: Uuid, status: TaskStatus) -> MessagingResult<()>;
    async fn get(&self, task_id: Uuid) -> MessagingResult<Option<TaskStatus>>;
}

/// Redis-backed status store under `task:status:{task_id}` keys.
#[derive(Clone)]
pub struct RedisStatusStore {
    redis: ConnectionManager,
}

impl RedisStatusStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn key(task_id: Uuid) -> String {
        format!("task:status:{task_id}")
    }
}

#[async_trait]
impl TaskStatusStore for RedisStatusStore {
    async fn set(&self, task_id: Uuid, status: TaskStatus) -> MessagingResult<()> {
        let mut conn = self.redis.clone();
        let raw = serde_json::to_string(&status)?;
        conn.set_ex::<_, _, ()>(Self::key(task_id), raw, STATUS_TTL.as_secs() as u64)
            .await
            .map_err(MessagingError::from)?;
        Ok(())
    }

    async fn get(&self, task_id: Uuid) -> MessagingResult<Option<TaskStatus>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn
            .get(Self::key(task_id))
            .await
            .map_err(MessagingError::from)?;

        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }
}

/// In-memory status store for tests and embedded deployments.
#[derive(Default)]
pub struct InMemoryStatusStore {
    entries: DashMap<Uuid, (TaskStatus, Instant)>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStatusStore for InMemoryStatusStore {
    async fn set(&self, task_id: Uuid, status: TaskStatus) -> MessagingResult<()> {
        self.entries
            .insert(task_id, (status, Instant::now() + STATUS_TTL));
        Ok(())
    }

    async fn get(&self, task_id: Uuid) -> MessagingResult<Option<TaskStatus>> {
        Ok(self.entries.get(&task_id).and_then(|entry| {
            let (status, expires_at) = *entry.value();
            (Instant::now() < expires_at).then_some(status)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lifecycle_updates_overwrite() {
        let store = InMemoryStatusStore::new();
        let task_id = Uuid::new_v4();

        store.set(task_id, TaskStatus::Pending).await.unwrap();
        store.set(task_id, TaskStatus::Processing).await.unwrap();
        store.set(task_id, TaskStatus::Completed).await.unwrap();

        assert_eq!(
            store.get(task_id).await.unwrap(),
            Some(TaskStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_unknown_task_has_no_status() {
        let store = InMemoryStatusStore::new();
        assert_eq!(store.get(Uuid::new_v4()).await.unwrap(), None);
    }
}
