//! Queue registry
//!
//! Maps queue names to immutable definitions. Populated by registration calls
//! during process startup and shared read-only (via `Arc`) with the scheduler
//! and processor afterwards; there is deliberately no concurrent-write
//! protection.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::handler::Handler;

/// How processing work is handed off once the scheduler picks a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchBackend {
    /// Fire-and-forget HTTP call to the trigger endpoint.
    #[default]
    Immediate,
    /// One-shot timer job executed by the in-process timer worker.
    Deferred,
}

impl DispatchBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchBackend::Immediate => "immediate",
            DispatchBackend::Deferred => "deferred",
        }
    }
}

impl FromStr for DispatchBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(DispatchBackend::Immediate),
            "deferred" => Ok(DispatchBackend::Deferred),
            other => Err(format!(
                "unsupported dispatch backend '{other}', expected 'immediate' or 'deferred'"
            )),
        }
    }
}

impl std::fmt::Display for DispatchBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid definition for queue '{queue}': {reason}")]
    InvalidDefinition { queue: String, reason: String },
}

/// Registration arguments for a queue, with the original defaults: bulk
/// handling is up to the handler variant, retry limit 3, no throttle,
/// minimum count 0, immediate dispatch.
#[derive(Debug)]
pub struct QueueOptions {
    pub name: String,
    pub handler: Option<Handler>,
    pub throttle: Option<Duration>,
    pub minimum_count: u64,
    pub retry_limit: u32,
    pub dispatch: String,
}

impl QueueOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handler: None,
            throttle: None,
            minimum_count: 0,
            retry_limit: 3,
            dispatch: DispatchBackend::Immediate.as_str().to_string(),
        }
    }

    pub fn handler(mut self, handler: Handler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn throttle(mut self, interval: Duration) -> Self {
        self.throttle = Some(interval);
        self
    }

    pub fn minimum_count(mut self, count: u64) -> Self {
        self.minimum_count = count;
        self
    }

    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    pub fn dispatch(mut self, backend: impl Into<String>) -> Self {
        self.dispatch = backend.into();
        self
    }
}

/// Immutable processing definition for one named queue.
#[derive(Debug, Clone)]
pub struct QueueDef {
    pub name: String,
    pub handler: Handler,
    pub throttle: Option<Duration>,
    pub minimum_count: u64,
    pub retry_limit: u32,
    pub dispatch: DispatchBackend,
}

impl QueueDef {
    pub fn is_bulk(&self) -> bool {
        self.handler.is_bulk()
    }
}

/// Process-wide queue name -> definition mapping.
#[derive(Debug, Default)]
pub struct Registry {
    queues: HashMap<String, QueueDef>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or overwrite the definition for a queue name. Last registration
    /// wins, which lets downstream code replace a stock queue wholesale.
    pub fn register(&mut self, opts: QueueOptions) -> Result<(), RegistryError> {
        let handler = opts.handler.ok_or_else(|| RegistryError::InvalidDefinition {
            queue: opts.name.clone(),
            reason: "a handler must be supplied when registering a queue".to_string(),
        })?;

        let dispatch =
            DispatchBackend::from_str(&opts.dispatch).map_err(|reason| {
                RegistryError::InvalidDefinition {
                    queue: opts.name.clone(),
                    reason,
                }
            })?;

        self.queues.insert(
            opts.name.clone(),
            QueueDef {
                name: opts.name,
                handler,
                throttle: opts.throttle,
                minimum_count: opts.minimum_count,
                retry_limit: opts.retry_limit,
                dispatch,
            },
        );

        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&QueueDef> {
        self.queues.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    pub fn defs(&self) -> impl Iterator<Item = &QueueDef> {
        self.queues.values()
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::TaskVerdict;

    fn noop_handler() -> Handler {
        Handler::single_fn(|_payload: String, _queue: String| async { Ok(TaskVerdict::Done) })
    }

    #[test]
    fn register_rejects_missing_handler() {
        let mut registry = Registry::new();
        let err = registry.register(QueueOptions::new("emails")).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidDefinition { .. }));
        assert!(!registry.contains("emails"));
    }

    #[test]
    fn register_rejects_unknown_dispatch_backend() {
        let mut registry = Registry::new();
        let err = registry
            .register(
                QueueOptions::new("emails")
                    .handler(noop_handler())
                    .dispatch("sidecar"),
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidDefinition { .. }));
    }

    #[test]
    fn register_applies_defaults() {
        let mut registry = Registry::new();
        registry
            .register(QueueOptions::new("emails").handler(noop_handler()))
            .unwrap();

        let def = registry.lookup("emails").unwrap();
        assert_eq!(def.retry_limit, 3);
        assert_eq!(def.minimum_count, 0);
        assert!(def.throttle.is_none());
        assert_eq!(def.dispatch, DispatchBackend::Immediate);
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = Registry::new();
        registry
            .register(QueueOptions::new("emails").handler(noop_handler()))
            .unwrap();
        registry
            .register(
                QueueOptions::new("emails")
                    .handler(noop_handler())
                    .retry_limit(7)
                    .dispatch("deferred"),
            )
            .unwrap();

        let def = registry.lookup("emails").unwrap();
        assert_eq!(def.retry_limit, 7);
        assert_eq!(def.dispatch, DispatchBackend::Deferred);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn dispatch_backend_parses_both_values() {
        assert_eq!(
            "immediate".parse::<DispatchBackend>().unwrap(),
            DispatchBackend::Immediate
        );
        assert_eq!(
            "deferred".parse::<DispatchBackend>().unwrap(),
            DispatchBackend::Deferred
        );
        assert!("cron".parse::<DispatchBackend>().is_err());
    }
}
