//! # taskq-store
//!
//! Storage collaborators for the taskq engine: the durable task/queue store
//! and the ephemeral key/value store backing queue locks.
//!
//! Features:
//! - Object-safe `TaskStore` and `LockStore` traits
//! - In-memory implementations for tests and single-process deployments
//! - SQLite implementation via sqlx (default `sqlite` feature)

pub mod backend;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use backend::{LockStore, QueueRef, StoreError, TaskRecord, TaskStore};
pub use memory::{MemoryLockStore, MemoryTaskStore};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
