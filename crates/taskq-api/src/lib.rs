//! # taskq-api
//!
//! HTTP surface of the deferred task queue: the authenticated processing
//! trigger targeted by immediate dispatch, plus thin management endpoints
//! consumed by the CLI.

pub mod error;
pub mod routes;
pub mod server;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::{api_router, SECRET_HEADER};
pub use server::{ApiServer, ServerConfig};
pub use state::AppState;
