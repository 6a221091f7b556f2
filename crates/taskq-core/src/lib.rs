//! # taskq-core
//!
//! Queue definitions and the process-wide registry for the taskq engine.
//!
//! Features:
//! - `Registry` of immutable `QueueDef`s, populated once at startup
//! - `Handler` as a first-class value, variant-dispatched on bulk mode
//! - `ProcessHooks` observability seam for processing outcomes

pub mod handler;
pub mod hooks;
pub mod registry;

pub use handler::{BulkHandler, Handler, HandlerFault, QueueId, SingleHandler, TaskId, TaskVerdict};
pub use hooks::{ProcessHooks, TracingHooks};
pub use registry::{DispatchBackend, QueueDef, QueueOptions, Registry, RegistryError};
