//! Dispatch backends
//!
//! Once the scheduler locks an eligible queue it hands the work off instead
//! of processing inline: either a fire-and-forget HTTP call to the trigger
//! endpoint (a fresh execution context, no timeout inherited from the
//! scheduling pass) or a one-shot job for the in-process timer worker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use taskq_core::QueueId;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::processor::Processor;

/// Work order produced by the scheduler and consumed by the processor.
#[derive(Debug, Clone)]
pub struct TriggerJob {
    pub queue_name: String,
    pub queue_id: QueueId,
    pub token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("processor secret is not configured")]
    MissingSecret,

    #[error("timer worker is not running")]
    TimerClosed,
}

/// Hand-off seam between scheduler and processor.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, job: TriggerJob) -> Result<(), DispatchError>;
}

#[derive(Serialize)]
struct TriggerBody<'a> {
    #[serde(rename = "termId")]
    term_id: QueueId,
    lock: &'a str,
    secret: &'a str,
}

/// Immediate backend: authenticated PUT to the trigger endpoint.
///
/// The call is spawned and its response ignored; a very short timeout keeps a
/// slow endpoint from ever stalling the scheduling pass.
pub struct HttpDispatch {
    client: reqwest::Client,
    base_url: String,
    secret: Option<String>,
    timeout: Duration,
}

impl HttpDispatch {
    pub fn new(base_url: impl Into<String>, secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            secret,
            timeout: Duration::from_secs(1),
        }
    }
}

#[async_trait]
impl Dispatch for HttpDispatch {
    async fn dispatch(&self, job: TriggerJob) -> Result<(), DispatchError> {
        let Some(secret) = self.secret.clone() else {
            return Err(DispatchError::MissingSecret);
        };

        let url = format!(
            "{}/taskq/v1/queue/{}",
            self.base_url.trim_end_matches('/'),
            job.queue_name
        );
        let body = TriggerBody {
            term_id: job.queue_id,
            lock: &job.token,
            secret: &secret,
        };

        let request = self.client.put(url).timeout(self.timeout).json(&body);
        let queue = job.queue_name;
        tokio::spawn(async move {
            // Response intentionally ignored; the processor owns the outcome.
            if let Err(e) = request.send().await {
                debug!(queue, error = %e, "trigger call did not complete in time");
            }
        });

        Ok(())
    }
}

/// Deferred backend: push the job onto the timer worker's channel.
#[derive(Clone)]
pub struct TimerDispatch {
    tx: mpsc::UnboundedSender<TriggerJob>,
}

impl TimerDispatch {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TriggerJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Dispatch for TimerDispatch {
    async fn dispatch(&self, job: TriggerJob) -> Result<(), DispatchError> {
        self.tx.send(job).map_err(|_| DispatchError::TimerClosed)
    }
}

/// Background loop executing deferred trigger jobs near-immediately.
pub struct TimerWorker {
    rx: mpsc::UnboundedReceiver<TriggerJob>,
    processor: Arc<Processor>,
}

impl TimerWorker {
    pub fn new(rx: mpsc::UnboundedReceiver<TriggerJob>, processor: Arc<Processor>) -> Self {
        Self { rx, processor }
    }

    /// Runs until every `TimerDispatch` handle is dropped.
    pub async fn run(mut self) {
        info!("timer worker started");
        while let Some(job) = self.rx.recv().await {
            match self
                .processor
                .run(&job.queue_name, job.queue_id, &job.token)
                .await
            {
                Ok(ran) => debug!(queue = job.queue_name, ran, "deferred pass finished"),
                Err(e) => error!(queue = job.queue_name, error = %e, "deferred pass failed"),
            }
        }
        info!("timer worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn http_dispatch_requires_a_secret() {
        let dispatch = HttpDispatch::new("http://127.0.0.1:9", None);
        let err = dispatch
            .dispatch(TriggerJob {
                queue_name: "q".to_string(),
                queue_id: 1,
                token: "t".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::MissingSecret));
    }

    #[tokio::test]
    async fn timer_dispatch_fails_once_receiver_is_gone() {
        let (dispatch, rx) = TimerDispatch::channel();
        drop(rx);

        let err = dispatch
            .dispatch(TriggerJob {
                queue_name: "q".to_string(),
                queue_id: 1,
                token: "t".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::TimerClosed));
    }
}
