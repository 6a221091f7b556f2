//! Handler abstraction
//!
//! A queue's callback is held as a first-class `Handler` value. Single-task
//! handlers are invoked once per task; bulk handlers receive the whole batch
//! and report back the subset they managed to process.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

/// Task identifier, assigned by the task store on creation.
pub type TaskId = i64;

/// Queue identifier, assigned by the task store when the queue is first seen.
pub type QueueId = i64;

/// Verdict returned by a single-task handler.
///
/// A `Rejected` verdict is an expected per-item failure signal and feeds the
/// retry policy. A raised [`HandlerFault`] also counts as a failure but is
/// reported through a separate observability channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskVerdict {
    /// The payload was processed; the task can leave the queue.
    Done,
    /// The handler declined the payload, optionally saying why.
    Rejected(Option<String>),
}

/// A fault raised by a handler, as opposed to an explicit rejection.
#[derive(Debug, thiserror::Error)]
#[error("handler fault: {0}")]
pub struct HandlerFault(pub String);

impl HandlerFault {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Callback invoked once per task.
#[async_trait]
pub trait SingleHandler: Send + Sync {
    async fn handle(&self, payload: &str, queue: &str) -> Result<TaskVerdict, HandlerFault>;
}

/// Callback invoked once with the entire batch, keyed by task id.
///
/// Returns the ids it successfully processed; any id present in the input but
/// absent from the return value is classified as failed.
#[async_trait]
pub trait BulkHandler: Send + Sync {
    async fn handle(
        &self,
        batch: &BTreeMap<TaskId, String>,
        queue: &str,
    ) -> Result<Vec<TaskId>, HandlerFault>;
}

/// A queue's registered callback, variant-dispatched on bulk mode.
#[derive(Clone)]
pub enum Handler {
    Single(Arc<dyn SingleHandler>),
    Bulk(Arc<dyn BulkHandler>),
}

impl Handler {
    /// Whether the handler consumes batches rather than individual tasks.
    pub fn is_bulk(&self) -> bool {
        matches!(self, Handler::Bulk(_))
    }

    /// Adapt an async closure into a single-task handler.
    pub fn single_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TaskVerdict, HandlerFault>> + Send + 'static,
    {
        Handler::Single(Arc::new(FnSingle(Box::new(move |payload, queue| {
            Box::pin(f(payload, queue))
        }))))
    }

    /// Adapt an async closure into a bulk handler.
    pub fn bulk_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(BTreeMap<TaskId, String>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<TaskId>, HandlerFault>> + Send + 'static,
    {
        Handler::Bulk(Arc::new(FnBulk(Box::new(move |batch, queue| {
            Box::pin(f(batch, queue))
        }))))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Single(_) => f.write_str("Handler::Single"),
            Handler::Bulk(_) => f.write_str("Handler::Bulk"),
        }
    }
}

type BoxedSingleFn = Box<
    dyn Fn(String, String) -> Pin<Box<dyn Future<Output = Result<TaskVerdict, HandlerFault>> + Send>>
        + Send
        + Sync,
>;

struct FnSingle(BoxedSingleFn);

#[async_trait]
impl SingleHandler for FnSingle {
    async fn handle(&self, payload: &str, queue: &str) -> Result<TaskVerdict, HandlerFault> {
        (self.0)(payload.to_string(), queue.to_string()).await
    }
}

type BoxedBulkFn = Box<
    dyn Fn(
            BTreeMap<TaskId, String>,
            String,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<TaskId>, HandlerFault>> + Send>>
        + Send
        + Sync,
>;

struct FnBulk(BoxedBulkFn);

#[async_trait]
impl BulkHandler for FnBulk {
    async fn handle(
        &self,
        batch: &BTreeMap<TaskId, String>,
        queue: &str,
    ) -> Result<Vec<TaskId>, HandlerFault> {
        (self.0)(batch.clone(), queue.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_fn_adapter_round_trips_verdict() {
        let handler = Handler::single_fn(|payload: String, _queue: String| async move {
            if payload == "fail" {
                Ok(TaskVerdict::Rejected(Some("nope".to_string())))
            } else {
                Ok(TaskVerdict::Done)
            }
        });
        assert!(!handler.is_bulk());

        let Handler::Single(inner) = handler else {
            panic!("expected single handler");
        };
        assert_eq!(inner.handle("ok", "q").await.unwrap(), TaskVerdict::Done);
        assert_eq!(
            inner.handle("fail", "q").await.unwrap(),
            TaskVerdict::Rejected(Some("nope".to_string()))
        );
    }

    #[tokio::test]
    async fn bulk_fn_adapter_returns_processed_subset() {
        let handler = Handler::bulk_fn(|batch: BTreeMap<TaskId, String>, _queue: String| async move {
            Ok(batch
                .iter()
                .filter(|(_, payload)| payload.as_str() != "bad")
                .map(|(id, _)| *id)
                .collect())
        });
        assert!(handler.is_bulk());

        let Handler::Bulk(inner) = handler else {
            panic!("expected bulk handler");
        };
        let mut batch = BTreeMap::new();
        batch.insert(1, "good".to_string());
        batch.insert(2, "bad".to_string());
        assert_eq!(inner.handle(&batch, "q").await.unwrap(), vec![1]);
    }
}
