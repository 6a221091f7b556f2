//! In-memory store implementations
//!
//! Used by the test suites and by single-process deployments that do not need
//! durability. Creation order doubles as the FIFO ordering key.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use taskq_core::{QueueId, TaskId};
use tokio::sync::RwLock;

use crate::backend::{LockStore, QueueRef, StoreError, TaskRecord, TaskStore};

#[derive(Debug)]
struct TaskRow {
    payload: String,
    queues: BTreeSet<String>,
    meta: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Default)]
struct Inner {
    next_task_id: TaskId,
    next_queue_id: QueueId,
    tasks: BTreeMap<TaskId, TaskRow>,
    queues: HashMap<String, QueueId>,
    queue_meta: HashMap<(QueueId, String), serde_json::Value>,
}

impl Inner {
    fn ensure_queue(&mut self, name: &str) -> QueueId {
        if let Some(id) = self.queues.get(name) {
            return *id;
        }
        self.next_queue_id += 1;
        self.queues.insert(name.to_string(), self.next_queue_id);
        self.next_queue_id
    }
}

/// Task store backed by maps guarded with a tokio `RwLock`.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    inner: RwLock<Inner>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create_task(&self, queues: &[&str], payload: &str) -> Result<TaskId, StoreError> {
        let mut inner = self.inner.write().await;
        inner.next_task_id += 1;
        let id = inner.next_task_id;

        let mut names = BTreeSet::new();
        for queue in queues {
            inner.ensure_queue(queue);
            names.insert(queue.to_string());
        }

        inner.tasks.insert(
            id,
            TaskRow {
                payload: payload.to_string(),
                queues: names,
                meta: HashMap::new(),
            },
        );
        Ok(id)
    }

    async fn query_tasks(&self, queue: &str, limit: usize) -> Result<Vec<TaskRecord>, StoreError> {
        let inner = self.inner.read().await;
        // BTreeMap iteration is id-ascending, which is creation order here.
        Ok(inner
            .tasks
            .iter()
            .filter(|(_, row)| row.queues.contains(queue))
            .take(limit)
            .map(|(id, row)| TaskRecord {
                id: *id,
                payload: row.payload.clone(),
            })
            .collect())
    }

    async fn count_tasks(&self, queue: &str) -> Result<u64, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .tasks
            .values()
            .filter(|row| row.queues.contains(queue))
            .count() as u64)
    }

    async fn add_membership(&self, task: TaskId, queue: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.ensure_queue(queue);
        let row = inner
            .tasks
            .get_mut(&task)
            .ok_or_else(|| StoreError::NotFound(format!("task {task}")))?;
        row.queues.insert(queue.to_string());
        Ok(())
    }

    async fn remove_membership(&self, task: TaskId, queue: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let row = inner
            .tasks
            .get_mut(&task)
            .ok_or_else(|| StoreError::NotFound(format!("task {task}")))?;
        row.queues.remove(queue);
        Ok(())
    }

    async fn memberships(&self, task: TaskId) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read().await;
        let row = inner
            .tasks
            .get(&task)
            .ok_or_else(|| StoreError::NotFound(format!("task {task}")))?;
        Ok(row.queues.iter().cloned().collect())
    }

    async fn delete_task(&self, task: TaskId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.tasks.remove(&task);
        Ok(())
    }

    async fn list_queues(&self) -> Result<Vec<QueueRef>, StoreError> {
        let inner = self.inner.read().await;
        let mut refs: Vec<QueueRef> = inner
            .queues
            .iter()
            .map(|(name, id)| QueueRef {
                id: *id,
                name: name.clone(),
                count: inner
                    .tasks
                    .values()
                    .filter(|row| row.queues.contains(name))
                    .count() as u64,
            })
            .collect();
        refs.sort_by_key(|q| q.id);
        Ok(refs)
    }

    async fn queue_id(&self, name: &str) -> Result<Option<QueueId>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.queues.get(name).copied())
    }

    async fn get_queue_meta(
        &self,
        queue: QueueId,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.queue_meta.get(&(queue, key.to_string())).cloned())
    }

    async fn set_queue_meta(
        &self,
        queue: QueueId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.queue_meta.insert((queue, key.to_string()), value);
        Ok(())
    }

    async fn clear_queue_meta(&self, queue: QueueId, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.queue_meta.remove(&(queue, key.to_string()));
        Ok(())
    }

    async fn get_task_meta(
        &self,
        task: TaskId,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .tasks
            .get(&task)
            .and_then(|row| row.meta.get(key))
            .cloned())
    }

    async fn set_task_meta(
        &self,
        task: TaskId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let row = inner
            .tasks
            .get_mut(&task)
            .ok_or_else(|| StoreError::NotFound(format!("task {task}")))?;
        row.meta.insert(key.to_string(), value);
        Ok(())
    }
}

/// Ephemeral lock store with per-entry expiry.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        if let Some((_, expires)) = entries.get(key) {
            if *expires > now {
                return Ok(false);
            }
        }
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
