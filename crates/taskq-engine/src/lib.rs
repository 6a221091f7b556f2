//! # taskq-engine
//!
//! The decision loop of the deferred task queue: per-cycle scheduling,
//! advisory per-queue locks, dispatch hand-off and the drain-and-retry
//! processor.
//!
//! Features:
//! - `LockManager` over any ephemeral key/value store
//! - `Scheduler` evaluating eligibility once per trigger cycle
//! - `Processor` draining bounded batches with a bounded-retry policy
//! - Immediate (HTTP) and deferred (timer worker) dispatch backends

pub mod dispatch;
pub mod lock;
pub mod processor;
pub mod scheduler;

pub use dispatch::{Dispatch, DispatchError, HttpDispatch, TimerDispatch, TimerWorker, TriggerJob};
pub use lock::{LockManager, DEFAULT_LOCK_TTL};
pub use processor::{Processor, ProcessorConfig};
pub use scheduler::{PassReport, Scheduler};

use taskq_store::StoreError;

/// Queue metadata key holding the last successful run (unix seconds).
pub const LAST_RUN_KEY: &str = "last_run";

/// Task metadata key holding the per-queue retry counter map.
pub const RETRY_META_KEY: &str = "retry";

/// Suffix of the sibling queue that retry-exhausted tasks move into.
pub const FAILED_QUEUE_SUFFIX: &str = "_failed";

/// Name of the failed sibling for a queue.
pub fn failed_queue(name: &str) -> String {
    format!("{name}{FAILED_QUEUE_SUFFIX}")
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
