//! Queue scheduler
//!
//! One decision pass over every queue the store knows about, executed per
//! external trigger cycle (end of a unit of work, a periodic tick). The
//! scheduler only reads counts and timestamps and writes the lock; all task
//! mutation belongs to the processor.

use std::sync::Arc;

use chrono::Utc;
use taskq_core::{DispatchBackend, QueueDef, Registry};
use taskq_store::{QueueRef, TaskStore};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::dispatch::{Dispatch, DispatchError, TriggerJob};
use crate::lock::LockManager;
use crate::{EngineError, LAST_RUN_KEY};

/// What one scheduling pass did, for the triggering caller.
#[derive(Debug, Default)]
pub struct PassReport {
    pub dispatched: Vec<String>,
    pub skipped: Vec<String>,
    pub errors: Vec<(String, DispatchError)>,
}

pub struct Scheduler {
    registry: Arc<Registry>,
    store: Arc<dyn TaskStore>,
    locks: LockManager,
    immediate: Arc<dyn Dispatch>,
    deferred: Arc<dyn Dispatch>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn TaskStore>,
        locks: LockManager,
        immediate: Arc<dyn Dispatch>,
        deferred: Arc<dyn Dispatch>,
    ) -> Self {
        Self {
            registry,
            store,
            locks,
            immediate,
            deferred,
        }
    }

    /// Evaluate every known queue once: lock it, check eligibility, and hand
    /// eligible ones to their dispatch backend. Queues another pass holds are
    /// skipped; ineligible ones are unlocked again.
    #[instrument(skip(self))]
    pub async fn run_pass(&self) -> Result<PassReport, EngineError> {
        let mut report = PassReport::default();

        for queue in self.store.list_queues().await? {
            let Some(def) = self.registry.lookup(&queue.name) else {
                continue;
            };

            let token = Uuid::new_v4().to_string();
            if !self.locks.try_acquire(&queue.name, &token).await? {
                debug!(queue = queue.name, "already being processed, skipping");
                report.skipped.push(queue.name);
                continue;
            }

            if !self.should_process(def, &queue).await? {
                self.locks.release(&queue.name).await?;
                report.skipped.push(queue.name);
                continue;
            }

            let job = TriggerJob {
                queue_name: queue.name.clone(),
                queue_id: queue.id,
                token,
            };
            let backend: &Arc<dyn Dispatch> = match def.dispatch {
                DispatchBackend::Immediate => &self.immediate,
                DispatchBackend::Deferred => &self.deferred,
            };

            match backend.dispatch(job).await {
                Ok(()) => report.dispatched.push(queue.name),
                Err(e) => {
                    // The lock is left to expire via its TTL; the processor
                    // never ran, so nothing else will release it.
                    error!(queue = queue.name, error = %e, "dispatch failed");
                    report.errors.push((queue.name, e));
                }
            }
        }

        Ok(report)
    }

    /// Eligibility: the count gate is inclusive, and a queue that has never
    /// run is always time-eligible regardless of its throttle.
    async fn should_process(&self, def: &QueueDef, queue: &QueueRef) -> Result<bool, EngineError> {
        if queue.count < def.minimum_count {
            return Ok(false);
        }

        if let Some(throttle) = def.throttle {
            let last_run = self
                .store
                .get_queue_meta(queue.id, LAST_RUN_KEY)
                .await?
                .and_then(|v| v.as_i64());
            if let Some(last_run) = last_run {
                let elapsed = Utc::now().timestamp() - last_run;
                if elapsed < throttle.as_secs() as i64 {
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }
}
