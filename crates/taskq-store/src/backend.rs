//! Storage traits and error types

use std::time::Duration;

use async_trait::async_trait;
use taskq_core::{QueueId, TaskId};

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A task as returned by a queue query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub id: TaskId,
    pub payload: String,
}

/// A known queue with its current task count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRef {
    pub id: QueueId,
    pub name: String,
    pub count: u64,
}

/// Durable task/queue storage (object safe).
///
/// Tasks are opaque payloads with a set of queue memberships; queues come
/// into existence the first time a task references them. Per-task and
/// per-queue metadata are free-form JSON values keyed by string.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a task with at least one queue membership, returning its id.
    async fn create_task(&self, queues: &[&str], payload: &str) -> Result<TaskId, StoreError>;

    /// Tasks currently in `queue`, oldest first by creation, up to `limit`.
    async fn query_tasks(&self, queue: &str, limit: usize) -> Result<Vec<TaskRecord>, StoreError>;

    /// Count-only variant of [`TaskStore::query_tasks`].
    async fn count_tasks(&self, queue: &str) -> Result<u64, StoreError>;

    async fn add_membership(&self, task: TaskId, queue: &str) -> Result<(), StoreError>;

    async fn remove_membership(&self, task: TaskId, queue: &str) -> Result<(), StoreError>;

    /// Queue names the task currently belongs to. An unknown task id is
    /// [`StoreError::NotFound`]; a live task with no remaining memberships
    /// yields an empty vec.
    async fn memberships(&self, task: TaskId) -> Result<Vec<String>, StoreError>;

    async fn delete_task(&self, task: TaskId) -> Result<(), StoreError>;

    /// All queues known to the store, with task counts.
    async fn list_queues(&self) -> Result<Vec<QueueRef>, StoreError>;

    async fn queue_id(&self, name: &str) -> Result<Option<QueueId>, StoreError>;

    async fn get_queue_meta(
        &self,
        queue: QueueId,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StoreError>;

    async fn set_queue_meta(
        &self,
        queue: QueueId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError>;

    async fn clear_queue_meta(&self, queue: QueueId, key: &str) -> Result<(), StoreError>;

    async fn get_task_meta(
        &self,
        task: TaskId,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StoreError>;

    async fn set_task_meta(
        &self,
        task: TaskId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError>;
}

/// Ephemeral key/value store used for lock tokens.
///
/// Entries expire after their TTL; an expired entry behaves exactly like a
/// missing one.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Atomically set `key` to `value` only if no live entry exists.
    /// Returns false without side effects when the key is already held.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, StoreError>;

    /// Current live value for `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditionally remove `key`.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
