//! Observability hooks for processing outcomes
//!
//! External collaborators observe per-task and per-batch failures through this
//! trait rather than through the processor's return value. The default
//! implementations log via `tracing`.

use crate::handler::{HandlerFault, TaskId};

/// Hooks fired by the processor while classifying task outcomes.
pub trait ProcessHooks: Send + Sync {
    /// A single-task handler explicitly rejected a payload.
    fn single_task_failed(&self, queue: &str, task: TaskId, reason: Option<&str>) {
        tracing::warn!(queue, task, reason, "task rejected by handler");
    }

    /// A single-task handler raised a fault; only this task fails.
    fn single_task_faulted(&self, queue: &str, task: TaskId, fault: &HandlerFault) {
        tracing::error!(queue, task, fault = %fault, "handler fault while processing task");
    }

    /// A bulk handler returned fewer ids than it was given.
    fn bulk_partial_failure(&self, queue: &str, failed: &[TaskId]) {
        tracing::warn!(queue, failed = ?failed, "bulk handler left tasks unprocessed");
    }

    /// A bulk handler raised a fault; the whole batch is failed for this pass.
    fn bulk_batch_faulted(&self, queue: &str, batch_size: usize, fault: &HandlerFault) {
        tracing::error!(queue, batch_size, fault = %fault, "bulk handler fault, batch untouched");
    }

    /// A task ran out of retries and moved to the failed sibling queue.
    fn retry_exhausted(&self, queue: &str, task: TaskId) {
        tracing::warn!(queue, task, "retry limit reached, moving task to failed queue");
    }
}

/// Hook implementation that only logs, used when no external observer is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHooks;

impl ProcessHooks for TracingHooks {}
