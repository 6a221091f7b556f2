//! SQLite store implementation
//!
//! One pool serves both the durable task store and the lock store. Lock
//! expiry is enforced on read and on acquisition, so a crashed holder never
//! blocks a queue past the TTL.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use taskq_core::{QueueId, TaskId};
use tracing::info;

use crate::backend::{LockStore, QueueRef, StoreError, TaskRecord, TaskStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queues (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%f', 'now'))
);
CREATE TABLE IF NOT EXISTS memberships (
    task_id INTEGER NOT NULL,
    queue_id INTEGER NOT NULL,
    PRIMARY KEY (task_id, queue_id)
);
CREATE TABLE IF NOT EXISTS queue_meta (
    queue_id INTEGER NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (queue_id, key)
);
CREATE TABLE IF NOT EXISTS task_meta (
    task_id INTEGER NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (task_id, key)
);
CREATE TABLE IF NOT EXISTS locks (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memberships_queue ON memberships (queue_id, task_id);
"#;

/// SQLite-backed task and lock store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `url` (e.g. "sqlite:taskq.db?mode=rwc" or "sqlite::memory:")
    /// and create the schema if missing.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .pragma("busy_timeout", "30000")
            .pragma("foreign_keys", "ON");

        // An in-memory database lives inside a single connection; pooling
        // more than one would hand out empty copies.
        let memory = url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if memory { 1 } else { 5 })
            .min_connections(if memory { 1 } else { 0 })
            .idle_timeout(if memory { None } else { Some(Duration::from_secs(600)) })
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        info!(url, "sqlite store ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_queue(&self, name: &str) -> Result<QueueId, StoreError> {
        sqlx::query("INSERT OR IGNORE INTO queues (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let row = sqlx::query("SELECT id FROM queues WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        row.try_get("id").map_err(|e| StoreError::Query(e.to_string()))
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn create_task(&self, queues: &[&str], payload: &str) -> Result<TaskId, StoreError> {
        let result = sqlx::query("INSERT INTO tasks (payload) VALUES (?)")
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let id = result.last_insert_rowid();

        for queue in queues {
            let queue_id = self.ensure_queue(queue).await?;
            sqlx::query("INSERT OR IGNORE INTO memberships (task_id, queue_id) VALUES (?, ?)")
                .bind(id)
                .bind(queue_id)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
        }

        Ok(id)
    }

    async fn query_tasks(&self, queue: &str, limit: usize) -> Result<Vec<TaskRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.payload FROM tasks t
            JOIN memberships m ON m.task_id = t.id
            JOIN queues q ON q.id = m.queue_id
            WHERE q.name = ?
            ORDER BY t.id ASC
            LIMIT ?
            "#,
        )
        .bind(queue)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                Ok(TaskRecord {
                    id: row.try_get("id").map_err(|e| StoreError::Query(e.to_string()))?,
                    payload: row
                        .try_get("payload")
                        .map_err(|e| StoreError::Query(e.to_string()))?,
                })
            })
            .collect()
    }

    async fn count_tasks(&self, queue: &str) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM memberships m
            JOIN queues q ON q.id = m.queue_id
            WHERE q.name = ?
            "#,
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        let n: i64 = row.try_get("n").map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(n as u64)
    }

    async fn add_membership(&self, task: TaskId, queue: &str) -> Result<(), StoreError> {
        let queue_id = self.ensure_queue(queue).await?;
        sqlx::query("INSERT OR IGNORE INTO memberships (task_id, queue_id) VALUES (?, ?)")
            .bind(task)
            .bind(queue_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn remove_membership(&self, task: TaskId, queue: &str) -> Result<(), StoreError> {
        sqlx::query(
            "DELETE FROM memberships WHERE task_id = ? AND queue_id = (SELECT id FROM queues WHERE name = ?)",
        )
        .bind(task)
        .bind(queue)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn memberships(&self, task: TaskId) -> Result<Vec<String>, StoreError> {
        let exists = sqlx::query("SELECT 1 FROM tasks WHERE id = ?")
            .bind(task)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        if exists.is_none() {
            return Err(StoreError::NotFound(format!("task {task}")));
        }

        let rows = sqlx::query(
            r#"
            SELECT q.name FROM queues q
            JOIN memberships m ON m.queue_id = q.id
            WHERE m.task_id = ?
            ORDER BY q.name
            "#,
        )
        .bind(task)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.into_iter()
            .map(|row| row.try_get("name").map_err(|e| StoreError::Query(e.to_string())))
            .collect()
    }

    async fn delete_task(&self, task: TaskId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM memberships WHERE task_id = ?")
            .bind(task)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        sqlx::query("DELETE FROM task_meta WHERE task_id = ?")
            .bind(task)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(task)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn list_queues(&self) -> Result<Vec<QueueRef>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT q.id, q.name, COUNT(m.task_id) AS n
            FROM queues q
            LEFT JOIN memberships m ON m.queue_id = q.id
            GROUP BY q.id, q.name
            ORDER BY q.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let n: i64 = row.try_get("n").map_err(|e| StoreError::Query(e.to_string()))?;
                Ok(QueueRef {
                    id: row.try_get("id").map_err(|e| StoreError::Query(e.to_string()))?,
                    name: row
                        .try_get("name")
                        .map_err(|e| StoreError::Query(e.to_string()))?,
                    count: n as u64,
                })
            })
            .collect()
    }

    async fn queue_id(&self, name: &str) -> Result<Option<QueueId>, StoreError> {
        let row = sqlx::query("SELECT id FROM queues WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        match row {
            Some(row) => Ok(Some(
                row.try_get("id").map_err(|e| StoreError::Query(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn get_queue_meta(
        &self,
        queue: QueueId,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let row = sqlx::query("SELECT value FROM queue_meta WHERE queue_id = ? AND key = ?")
            .bind(queue)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let raw: String = row
                    .try_get("value")
                    .map_err(|e| StoreError::Query(e.to_string()))?;
                serde_json::from_str(&raw)
                    .map(Some)
                    .map_err(|e| StoreError::Serialization(e.to_string()))
            }
            None => Ok(None),
        }
    }

    async fn set_queue_meta(
        &self,
        queue: QueueId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(&value)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO queue_meta (queue_id, key, value) VALUES (?, ?, ?)
            ON CONFLICT (queue_id, key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(queue)
        .bind(key)
        .bind(raw)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn clear_queue_meta(&self, queue: QueueId, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM queue_meta WHERE queue_id = ? AND key = ?")
            .bind(queue)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn get_task_meta(
        &self,
        task: TaskId,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let row = sqlx::query("SELECT value FROM task_meta WHERE task_id = ? AND key = ?")
            .bind(task)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let raw: String = row
                    .try_get("value")
                    .map_err(|e| StoreError::Query(e.to_string()))?;
                serde_json::from_str(&raw)
                    .map(Some)
                    .map_err(|e| StoreError::Serialization(e.to_string()))
            }
            None => Ok(None),
        }
    }

    async fn set_task_meta(
        &self,
        task: TaskId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(&value)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO task_meta (task_id, key, value) VALUES (?, ?, ?)
            ON CONFLICT (task_id, key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(task)
        .bind(key)
        .bind(raw)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl LockStore for SqliteStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        // An expired row is overwritten; a live one makes the upsert a no-op.
        let result = sqlx::query(
            r#"
            INSERT INTO locks (key, value, expires_at)
            VALUES (?, ?, datetime('now', '+' || ? || ' seconds'))
            ON CONFLICT (key) DO UPDATE
                SET value = excluded.value, expires_at = excluded.expires_at
                WHERE locks.expires_at <= datetime('now')
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(ttl.as_secs() as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(
            "SELECT value FROM locks WHERE key = ? AND expires_at > datetime('now')",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        match row {
            Some(row) => Ok(Some(
                row.try_get("value")
                    .map_err(|e| StoreError::Query(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM locks WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }
}
