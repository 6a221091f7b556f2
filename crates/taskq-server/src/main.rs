//! taskq server - standalone entry point
//!
//! Wires the storage backends, queue registrations, timer worker and
//! scheduler tick together and serves the HTTP API. Configuration is
//! env-driven:
//!
//! - `TASKQ_PORT`           listen port (default 8080)
//! - `TASKQ_SECRET`         shared secret for trigger/management requests
//! - `DATABASE_URL`         sqlite database, in-memory stores when unset
//! - `TASKQ_SCHEDULE_SECS`  scheduler tick interval (default 60)
//! - `TASKQ_BATCH_SIZE`     max tasks drained per pass (default 100)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use taskq_api::{ApiServer, AppState, ServerConfig};
use taskq_core::{Handler, QueueOptions, Registry, TaskVerdict};
use taskq_engine::{
    HttpDispatch, LockManager, Processor, ProcessorConfig, Scheduler, TimerDispatch, TimerWorker,
};
use taskq_store::{LockStore, MemoryLockStore, MemoryTaskStore, SqliteStore, TaskStore};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    taskq_api::server::init_tracing();

    info!("starting taskq server");

    let config = ServerConfig::from_env();
    let secret = std::env::var("TASKQ_SECRET").ok();
    if secret.is_none() {
        warn!("TASKQ_SECRET not set; all trigger and management requests will be rejected");
    }

    let batch_size: usize = std::env::var("TASKQ_BATCH_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(100);
    let schedule_secs: u64 = std::env::var("TASKQ_SCHEDULE_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(60);

    let (task_store, lock_store): (Arc<dyn TaskStore>, Arc<dyn LockStore>) =
        match std::env::var("DATABASE_URL") {
            Ok(url) => {
                info!(url, "using sqlite storage");
                let store = Arc::new(
                    SqliteStore::connect(&url)
                        .await
                        .context("database init failed")?,
                );
                (store.clone(), store)
            }
            Err(_) => {
                warn!("DATABASE_URL not set, using in-memory storage");
                (
                    Arc::new(MemoryTaskStore::new()),
                    Arc::new(MemoryLockStore::new()),
                )
            }
        };

    let registry = Arc::new(build_registry()?);
    let locks = LockManager::new(lock_store);
    let processor = Arc::new(
        Processor::new(registry.clone(), task_store.clone(), locks.clone()).with_config(
            ProcessorConfig {
                max_batch_size: batch_size,
            },
        ),
    );

    // Deferred dispatch runs in-process via the timer worker.
    let (timer, rx) = TimerDispatch::channel();
    tokio::spawn(TimerWorker::new(rx, processor.clone()).run());

    // Immediate dispatch loops back into this server's own trigger endpoint.
    let base_url = format!("http://127.0.0.1:{}", config.addr.port());
    let immediate = Arc::new(HttpDispatch::new(base_url, secret.clone()));

    let scheduler = Arc::new(Scheduler::new(
        registry.clone(),
        task_store.clone(),
        locks.clone(),
        immediate,
        Arc::new(timer),
    ));
    tokio::spawn(schedule_loop(scheduler, schedule_secs));

    let state = AppState::new(registry, task_store, locks, processor, secret);
    ApiServer::new(config, state).run().await?;

    Ok(())
}

/// Stock queue registrations. Deployments embed the engine crates directly
/// and register their own; these give the standalone binary something to
/// serve out of the box.
fn build_registry() -> Result<Registry> {
    let mut registry = Registry::new();

    registry.register(
        QueueOptions::new("emails").handler(Handler::single_fn(
            |payload: String, queue: String| async move {
                info!(queue, payload, "sending email");
                Ok(TaskVerdict::Done)
            },
        )),
    )?;

    registry.register(
        QueueOptions::new("webhooks")
            .handler(Handler::bulk_fn(|batch, queue: String| async move {
                info!(queue, tasks = batch.len(), "delivering webhook batch");
                Ok(batch.keys().copied().collect())
            }))
            .dispatch("deferred")
            .minimum_count(1),
    )?;

    Ok(registry)
}

async fn schedule_loop(scheduler: Arc<Scheduler>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        match scheduler.run_pass().await {
            Ok(report) => debug!(
                dispatched = report.dispatched.len(),
                skipped = report.skipped.len(),
                errors = report.errors.len(),
                "scheduling pass finished"
            ),
            Err(e) => error!(error = %e, "scheduling pass failed"),
        }
    }
}
