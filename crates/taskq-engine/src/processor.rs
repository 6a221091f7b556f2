//! Queue processor
//!
//! Executes one complete drain-and-process pass for a single queue: fetch a
//! bounded batch oldest-first, invoke the registered handler (singly or in
//! bulk), classify outcomes, apply the bounded-retry policy, mutate queue
//! memberships and update the queue's run-state. The lock issued by the
//! scheduler is verified on entry and released on every exit path.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use taskq_core::{Handler, ProcessHooks, QueueDef, QueueId, Registry, TaskId, TaskVerdict, TracingHooks};
use taskq_store::{TaskRecord, TaskStore};
use tracing::{debug, instrument};

use crate::lock::LockManager;
use crate::{failed_queue, EngineError, LAST_RUN_KEY, RETRY_META_KEY};

#[derive(Debug, Clone, Copy)]
pub struct ProcessorConfig {
    /// Upper bound on tasks drained per pass.
    pub max_batch_size: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self { max_batch_size: 100 }
    }
}

pub struct Processor {
    registry: Arc<Registry>,
    store: Arc<dyn TaskStore>,
    locks: LockManager,
    hooks: Arc<dyn ProcessHooks>,
    config: ProcessorConfig,
}

impl Processor {
    pub fn new(registry: Arc<Registry>, store: Arc<dyn TaskStore>, locks: LockManager) -> Self {
        Self {
            registry,
            store,
            locks,
            hooks: Arc::new(TracingHooks),
            config: ProcessorConfig::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ProcessHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    /// Run one processing pass for `queue_name`.
    ///
    /// Returns `Ok(false)` with no side effects when a precondition fails:
    /// empty name, non-positive id, unregistered queue, or a lock token the
    /// pass does not own. Returns `Ok(true)` once a pass has completed, even
    /// if some or all tasks failed.
    #[instrument(skip(self, token), fields(queue = queue_name))]
    pub async fn run(
        &self,
        queue_name: &str,
        queue_id: QueueId,
        token: &str,
    ) -> Result<bool, EngineError> {
        if queue_name.is_empty() || queue_id <= 0 {
            return Ok(false);
        }
        let Some(def) = self.registry.lookup(queue_name) else {
            debug!("no definition registered, skipping run");
            return Ok(false);
        };
        if !self.locks.owns(queue_name, token).await? {
            debug!("lock owned by another pass, skipping run");
            return Ok(false);
        }

        let outcome = self.process_batch(def, queue_id).await;
        let released = self.locks.release(queue_name).await;
        outcome?;
        released?;
        Ok(true)
    }

    async fn process_batch(&self, def: &QueueDef, queue_id: QueueId) -> Result<(), EngineError> {
        let batch = self
            .store
            .query_tasks(&def.name, self.config.max_batch_size)
            .await?;
        let fetched = batch.len();

        // An empty pass still counts as a run for throttling purposes.
        if batch.is_empty() {
            return self.update_run_state(def, queue_id, 0, 0).await;
        }

        let (succeeded, failed) = match &def.handler {
            Handler::Single(handler) => {
                let mut succeeded = Vec::new();
                let mut failed = Vec::new();
                for task in &batch {
                    match handler.handle(&task.payload, &def.name).await {
                        Ok(TaskVerdict::Done) => succeeded.push(task.id),
                        Ok(TaskVerdict::Rejected(reason)) => {
                            self.hooks
                                .single_task_failed(&def.name, task.id, reason.as_deref());
                            failed.push(task.id);
                        }
                        // A fault only fails this task, never the rest of the batch.
                        Err(fault) => {
                            self.hooks.single_task_faulted(&def.name, task.id, &fault);
                            failed.push(task.id);
                        }
                    }
                }
                (succeeded, failed)
            }
            Handler::Bulk(handler) => {
                let map: BTreeMap<TaskId, String> = batch
                    .iter()
                    .map(|TaskRecord { id, payload }| (*id, payload.clone()))
                    .collect();
                match handler.handle(&map, &def.name).await {
                    Ok(done) => {
                        let done: BTreeSet<TaskId> =
                            done.into_iter().filter(|id| map.contains_key(id)).collect();
                        let failed: Vec<TaskId> =
                            map.keys().filter(|id| !done.contains(id)).copied().collect();
                        if !failed.is_empty() {
                            self.hooks.bulk_partial_failure(&def.name, &failed);
                        }
                        (done.into_iter().collect(), failed)
                    }
                    Err(fault) => {
                        // No partial credit when the bulk call itself faults:
                        // tasks stay untouched and are retried next cycle.
                        self.hooks.bulk_batch_faulted(&def.name, map.len(), &fault);
                        self.update_run_state(def, queue_id, fetched, 0).await?;
                        return Ok(());
                    }
                }
            }
        };

        let success_count = succeeded.len();
        let (removals, exhausted) = self.apply_retry_policy(def, succeeded, &failed).await?;
        self.apply_removals(def, &removals, &exhausted).await?;
        self.update_run_state(def, queue_id, fetched, success_count)
            .await
    }

    /// Classify the failed set against the queue's retry limit. Returns the
    /// full removal set (successes plus exhausted/unretryable failures) and
    /// the subset that moves to the failed sibling queue.
    async fn apply_retry_policy(
        &self,
        def: &QueueDef,
        succeeded: Vec<TaskId>,
        failed: &[TaskId],
    ) -> Result<(Vec<TaskId>, BTreeSet<TaskId>), EngineError> {
        let mut removals = succeeded;
        let mut exhausted = BTreeSet::new();

        for &task in failed {
            if def.retry_limit == 0 {
                removals.push(task);
                continue;
            }

            let mut counters = self.retry_counters(task).await?;
            let attempts = counters.get(&def.name).copied().unwrap_or(0);

            if attempts >= u64::from(def.retry_limit) {
                self.hooks.retry_exhausted(&def.name, task);
                exhausted.insert(task);
                removals.push(task);
            } else {
                counters.insert(def.name.clone(), attempts + 1);
                self.store
                    .set_task_meta(task, RETRY_META_KEY, serde_json::to_value(&counters)?)
                    .await?;
            }
        }

        Ok((removals, exhausted))
    }

    /// Drop queue memberships for every removed task, moving exhausted ones
    /// into the failed sibling first, and delete tasks left with no
    /// memberships. Each task is mutated independently; a crash mid-batch
    /// leaves the remainder for the next pass.
    async fn apply_removals(
        &self,
        def: &QueueDef,
        removals: &[TaskId],
        exhausted: &BTreeSet<TaskId>,
    ) -> Result<(), EngineError> {
        for &task in removals {
            if exhausted.contains(&task) {
                self.store
                    .add_membership(task, &failed_queue(&def.name))
                    .await?;
            }

            self.clear_retry_entry(task, &def.name).await?;
            self.store.remove_membership(task, &def.name).await?;

            if self.store.memberships(task).await?.is_empty() {
                self.store.delete_task(task).await?;
            }
        }
        Ok(())
    }

    async fn retry_counters(&self, task: TaskId) -> Result<BTreeMap<String, u64>, EngineError> {
        match self.store.get_task_meta(task, RETRY_META_KEY).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(BTreeMap::new()),
        }
    }

    async fn clear_retry_entry(&self, task: TaskId, queue: &str) -> Result<(), EngineError> {
        let mut counters = self.retry_counters(task).await?;
        if counters.remove(queue).is_some() {
            self.store
                .set_task_meta(task, RETRY_META_KEY, serde_json::to_value(&counters)?)
                .await?;
        }
        Ok(())
    }

    /// A full batch means more work likely remains; a partial success on a
    /// throttled queue would otherwise strand the leftovers until the next
    /// throttle window. Both cases clear the last-run marker so the queue is
    /// immediately eligible again.
    async fn update_run_state(
        &self,
        def: &QueueDef,
        queue_id: QueueId,
        fetched: usize,
        successes: usize,
    ) -> Result<(), EngineError> {
        let backlog_remains = fetched == self.config.max_batch_size;
        let partial_on_throttled = successes < fetched && def.throttle.is_some();

        if backlog_remains || partial_on_throttled {
            self.store.clear_queue_meta(queue_id, LAST_RUN_KEY).await?;
        } else {
            self.store
                .set_queue_meta(queue_id, LAST_RUN_KEY, json!(Utc::now().timestamp()))
                .await?;
        }
        Ok(())
    }
}
