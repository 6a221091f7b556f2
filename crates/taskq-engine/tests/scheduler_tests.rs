//! Scheduler integration tests against the in-memory stores

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use taskq_core::{Handler, QueueOptions, Registry, TaskVerdict};
use taskq_engine::{
    Dispatch, DispatchError, LockManager, Processor, Scheduler, TimerDispatch, TimerWorker,
    TriggerJob, LAST_RUN_KEY,
};
use taskq_store::{MemoryLockStore, MemoryTaskStore, TaskStore};
use chrono::Utc;

/// Dispatch spy that records every job it accepts.
#[derive(Default)]
struct RecordingDispatch {
    jobs: Mutex<Vec<TriggerJob>>,
}

#[async_trait]
impl Dispatch for RecordingDispatch {
    async fn dispatch(&self, job: TriggerJob) -> Result<(), DispatchError> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}

/// Dispatch stub that always fails the hand-off.
struct FailingDispatch;

#[async_trait]
impl Dispatch for FailingDispatch {
    async fn dispatch(&self, _job: TriggerJob) -> Result<(), DispatchError> {
        Err(DispatchError::MissingSecret)
    }
}

fn ok_handler() -> Handler {
    Handler::single_fn(|_payload: String, _queue: String| async { Ok(TaskVerdict::Done) })
}

struct Env {
    store: Arc<MemoryTaskStore>,
    locks: LockManager,
    scheduler: Scheduler,
    immediate: Arc<RecordingDispatch>,
    deferred: Arc<RecordingDispatch>,
}

fn env(registry: Registry) -> Env {
    let store = Arc::new(MemoryTaskStore::new());
    let locks = LockManager::new(Arc::new(MemoryLockStore::new()));
    let immediate = Arc::new(RecordingDispatch::default());
    let deferred = Arc::new(RecordingDispatch::default());
    let scheduler = Scheduler::new(
        Arc::new(registry),
        store.clone(),
        locks.clone(),
        immediate.clone(),
        deferred.clone(),
    );
    Env {
        store,
        locks,
        scheduler,
        immediate,
        deferred,
    }
}

#[tokio::test]
async fn eligible_queue_is_locked_and_dispatched() {
    let mut registry = Registry::new();
    registry
        .register(QueueOptions::new("q").handler(ok_handler()))
        .unwrap();
    let env = env(registry);

    env.store.create_task(&["q"], "payload").await.unwrap();
    let qid = env.store.queue_id("q").await.unwrap().unwrap();

    let report = env.scheduler.run_pass().await.unwrap();

    assert_eq!(report.dispatched, vec!["q"]);
    assert!(report.skipped.is_empty());
    assert!(report.errors.is_empty());

    let jobs = env.immediate.jobs.lock().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].queue_name, "q");
    assert_eq!(jobs[0].queue_id, qid);
    assert!(!jobs[0].token.is_empty());

    // The lock stays held with the dispatched token; it is the processor's
    // job to release it.
    assert_eq!(
        env.locks.holder("q").await.unwrap(),
        Some(jobs[0].token.clone())
    );
}

#[tokio::test]
async fn below_minimum_count_skips_and_unlocks() {
    let mut registry = Registry::new();
    registry
        .register(
            QueueOptions::new("q3")
                .handler(ok_handler())
                .minimum_count(10),
        )
        .unwrap();
    let env = env(registry);

    env.store.create_task(&["q3"], "payload").await.unwrap();

    let report = env.scheduler.run_pass().await.unwrap();

    assert!(report.dispatched.is_empty());
    assert_eq!(report.skipped, vec!["q3"]);
    assert!(env.immediate.jobs.lock().unwrap().is_empty());
    assert_eq!(env.locks.holder("q3").await.unwrap(), None);
}

#[tokio::test]
async fn minimum_count_gate_is_inclusive() {
    let mut registry = Registry::new();
    registry
        .register(
            QueueOptions::new("q")
                .handler(ok_handler())
                .minimum_count(2),
        )
        .unwrap();
    let env = env(registry);

    env.store.create_task(&["q"], "a").await.unwrap();
    env.store.create_task(&["q"], "b").await.unwrap();

    let report = env.scheduler.run_pass().await.unwrap();
    assert_eq!(report.dispatched, vec!["q"]);
}

#[tokio::test]
async fn locked_queue_is_skipped_and_lock_untouched() {
    let mut registry = Registry::new();
    registry
        .register(QueueOptions::new("q").handler(ok_handler()))
        .unwrap();
    let env = env(registry);

    env.store.create_task(&["q"], "payload").await.unwrap();
    assert!(env.locks.try_acquire("q", "other-pass").await.unwrap());

    let report = env.scheduler.run_pass().await.unwrap();

    assert_eq!(report.skipped, vec!["q"]);
    assert!(env.immediate.jobs.lock().unwrap().is_empty());
    assert_eq!(
        env.locks.holder("q").await.unwrap(),
        Some("other-pass".to_string())
    );
}

#[tokio::test]
async fn throttle_respects_last_run() {
    let mut registry = Registry::new();
    registry
        .register(
            QueueOptions::new("q")
                .handler(ok_handler())
                .throttle(Duration::from_secs(3600)),
        )
        .unwrap();
    let env = env(registry);

    env.store.create_task(&["q"], "payload").await.unwrap();
    let qid = env.store.queue_id("q").await.unwrap().unwrap();

    // Never run: time-eligible despite the throttle.
    let report = env.scheduler.run_pass().await.unwrap();
    assert_eq!(report.dispatched, vec!["q"]);
    env.locks.release("q").await.unwrap();

    // Ran just now: inside the window, skipped.
    env.store
        .set_queue_meta(qid, LAST_RUN_KEY, json!(Utc::now().timestamp()))
        .await
        .unwrap();
    let report = env.scheduler.run_pass().await.unwrap();
    assert_eq!(report.skipped, vec!["q"]);
    assert_eq!(env.locks.holder("q").await.unwrap(), None);

    // Ran two hours ago: window elapsed, eligible again.
    env.store
        .set_queue_meta(qid, LAST_RUN_KEY, json!(Utc::now().timestamp() - 7200))
        .await
        .unwrap();
    let report = env.scheduler.run_pass().await.unwrap();
    assert_eq!(report.dispatched, vec!["q"]);
}

#[tokio::test]
async fn deferred_queue_routes_to_deferred_backend() {
    let mut registry = Registry::new();
    registry
        .register(
            QueueOptions::new("q")
                .handler(ok_handler())
                .dispatch("deferred"),
        )
        .unwrap();
    let env = env(registry);

    env.store.create_task(&["q"], "payload").await.unwrap();

    let report = env.scheduler.run_pass().await.unwrap();

    assert_eq!(report.dispatched, vec!["q"]);
    assert!(env.immediate.jobs.lock().unwrap().is_empty());
    assert_eq!(env.deferred.jobs.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unregistered_store_queue_is_ignored() {
    let env = env(Registry::new());

    env.store.create_task(&["ghost"], "payload").await.unwrap();

    let report = env.scheduler.run_pass().await.unwrap();

    assert!(report.dispatched.is_empty());
    assert!(report.skipped.is_empty());
    assert!(env.immediate.jobs.lock().unwrap().is_empty());
    assert_eq!(env.locks.holder("ghost").await.unwrap(), None);
}

#[tokio::test]
async fn dispatch_failure_is_reported_and_lock_left_to_expire() {
    let mut registry = Registry::new();
    registry
        .register(QueueOptions::new("q").handler(ok_handler()))
        .unwrap();

    let store = Arc::new(MemoryTaskStore::new());
    let locks = LockManager::new(Arc::new(MemoryLockStore::new()));
    let scheduler = Scheduler::new(
        Arc::new(registry),
        store.clone(),
        locks.clone(),
        Arc::new(FailingDispatch),
        Arc::new(RecordingDispatch::default()),
    );

    store.create_task(&["q"], "payload").await.unwrap();

    let report = scheduler.run_pass().await.unwrap();

    assert!(report.dispatched.is_empty());
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].0, "q");
    // The pass never ran, so only the TTL will free the queue.
    assert!(locks.holder("q").await.unwrap().is_some());
}

#[tokio::test]
async fn deferred_pass_drains_queue_end_to_end() {
    let mut registry = Registry::new();
    registry
        .register(
            QueueOptions::new("q")
                .handler(ok_handler())
                .dispatch("deferred"),
        )
        .unwrap();
    let registry = Arc::new(registry);

    let store = Arc::new(MemoryTaskStore::new());
    let locks = LockManager::new(Arc::new(MemoryLockStore::new()));
    let processor = Arc::new(Processor::new(
        registry.clone(),
        store.clone(),
        locks.clone(),
    ));

    let (timer, rx) = TimerDispatch::channel();
    tokio::spawn(TimerWorker::new(rx, processor).run());

    let scheduler = Scheduler::new(
        registry,
        store.clone(),
        locks.clone(),
        Arc::new(RecordingDispatch::default()),
        Arc::new(timer),
    );

    store.create_task(&["q"], "payload").await.unwrap();

    let report = scheduler.run_pass().await.unwrap();
    assert_eq!(report.dispatched, vec!["q"]);

    // Wait for the worker to drain the queue and release the lock.
    for _ in 0..50 {
        if store.count_tasks("q").await.unwrap() == 0
            && locks.holder("q").await.unwrap().is_none()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("deferred pass did not complete");
}
