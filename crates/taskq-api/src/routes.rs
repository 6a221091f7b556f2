//! HTTP routes: the processing trigger plus thin management endpoints

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use taskq_engine::failed_queue;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Header carrying the shared secret on management requests. The trigger
/// endpoint carries it in the body instead, which is part of the wire
/// contract and cannot change.
pub const SECRET_HEADER: &str = "x-taskq-secret";

/// Trigger request body.
///
/// `termId` is the storage id of the queue being processed; the casing is
/// part of the wire contract.
#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    #[serde(rename = "termId")]
    pub term_id: i64,
    pub lock: String,
    pub secret: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Processing trigger, the target of immediate dispatch.
pub async fn trigger_queue(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    Json(req): Json<TriggerRequest>,
) -> ApiResult<Json<MessageResponse>> {
    if !state.verify_secret(&req.secret) {
        return Err(ApiError::Unauthorized("invalid secret".to_string()));
    }

    if queue.is_empty() || req.term_id <= 0 {
        return Err(ApiError::Validation(
            "queue name and a positive termId are required".to_string(),
        ));
    }

    let ran = state.processor().run(&queue, req.term_id, &req.lock).await?;
    if !ran {
        return Err(ApiError::Validation(format!(
            "queue '{queue}' is not processable"
        )));
    }

    Ok(Json(MessageResponse {
        message: format!("{queue} queue processed"),
    }))
}

/// One registered queue definition, with its live task count.
#[derive(Debug, Serialize)]
pub struct QueueInfo {
    pub name: String,
    pub throttle_secs: Option<u64>,
    pub minimum_count: u64,
    pub retry_limit: u32,
    pub bulk: bool,
    pub dispatch: String,
    pub count: u64,
}

pub async fn list_queues(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<QueueInfo>>> {
    authorize(&state, &headers)?;

    let store = state.store();
    let mut queues = Vec::new();
    for def in state.registry().defs() {
        let count = store.count_tasks(&def.name).await?;
        queues.push(QueueInfo {
            name: def.name.clone(),
            throttle_secs: def.throttle.map(|d| d.as_secs()),
            minimum_count: def.minimum_count,
            retry_limit: def.retry_limit,
            bulk: def.is_bulk(),
            dispatch: def.dispatch.to_string(),
            count,
        });
    }
    queues.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Json(queues))
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub queue: String,
    pub count: u64,
}

pub async fn queue_count(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(queue): Path<String>,
) -> ApiResult<Json<CountResponse>> {
    authorize(&state, &headers)?;
    known_queue(&state, &queue)?;

    let count = state.store().count_tasks(&queue).await?;
    Ok(Json(CountResponse { queue, count }))
}

#[derive(Debug, Serialize)]
pub struct LockResponse {
    pub queue: String,
    pub locked: bool,
}

pub async fn queue_lock(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(queue): Path<String>,
) -> ApiResult<Json<LockResponse>> {
    authorize(&state, &headers)?;
    known_queue(&state, &queue)?;

    let locked = state.locks().holder(&queue).await?.is_some();
    Ok(Json(LockResponse { queue, locked }))
}

pub async fn release_lock(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(queue): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    authorize(&state, &headers)?;
    known_queue(&state, &queue)?;

    state.locks().release(&queue).await?;
    Ok(Json(MessageResponse {
        message: format!("{queue} lock released"),
    }))
}

/// Lock and run one processing pass inside the request, bypassing the
/// scheduler's eligibility gates.
pub async fn process_queue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(queue): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    authorize(&state, &headers)?;
    known_queue(&state, &queue)?;

    let queue_id = state
        .store()
        .queue_id(&queue)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("queue '{queue}' has no tasks yet")))?;

    let token = Uuid::new_v4().to_string();
    if !state.locks().try_acquire(&queue, &token).await? {
        return Err(ApiError::Conflict(format!(
            "queue '{queue}' is already being processed"
        )));
    }

    let ran = state.processor().run(&queue, queue_id, &token).await?;
    if !ran {
        return Err(ApiError::Validation(format!(
            "queue '{queue}' is not processable"
        )));
    }

    Ok(Json(MessageResponse {
        message: format!("{queue} queue processed"),
    }))
}

#[derive(Debug, Serialize)]
pub struct RetryFailedResponse {
    pub queue: String,
    pub moved: u64,
}

/// Move every task from the failed sibling back into the live queue.
pub async fn retry_failed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(queue): Path<String>,
) -> ApiResult<Json<RetryFailedResponse>> {
    authorize(&state, &headers)?;
    known_queue(&state, &queue)?;

    let store = state.store();
    let failed = failed_queue(&queue);
    let mut moved = 0u64;

    loop {
        let batch = store.query_tasks(&failed, 100).await?;
        if batch.is_empty() {
            break;
        }
        for task in batch {
            store.add_membership(task.id, &queue).await?;
            store.remove_membership(task.id, &failed).await?;
            moved += 1;
        }
    }

    Ok(Json(RetryFailedResponse { queue, moved }))
}

#[derive(Debug, Deserialize)]
pub struct DeleteFailedParams {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct DeleteFailedResponse {
    pub queue: String,
    pub deleted: u64,
}

/// Drop the failed sibling's contents. Without `force`, a task still living
/// in other queues only loses the failed membership; with it, the task is
/// deleted outright.
pub async fn delete_failed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(queue): Path<String>,
    Query(params): Query<DeleteFailedParams>,
) -> ApiResult<Json<DeleteFailedResponse>> {
    authorize(&state, &headers)?;
    known_queue(&state, &queue)?;

    let store = state.store();
    let failed = failed_queue(&queue);
    let mut deleted = 0u64;

    loop {
        let batch = store.query_tasks(&failed, 100).await?;
        if batch.is_empty() {
            break;
        }
        for task in batch {
            store.remove_membership(task.id, &failed).await?;
            if params.force || store.memberships(task.id).await?.is_empty() {
                store.delete_task(task.id).await?;
                deleted += 1;
            }
        }
    }

    Ok(Json(DeleteFailedResponse { queue, deleted }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

fn authorize(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let provided = headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !state.verify_secret(provided) {
        return Err(ApiError::Unauthorized("invalid secret".to_string()));
    }
    Ok(())
}

/// Management endpoints only make sense for registered queues; the trigger
/// endpoint does its own precondition handling instead.
fn known_queue(state: &AppState, queue: &str) -> ApiResult<()> {
    if !state.registry().contains(queue) {
        return Err(ApiError::NotFound(format!(
            "queue '{queue}' is not registered"
        )));
    }
    Ok(())
}

/// Build the API router.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Trigger endpoint (wire contract)
        .route("/taskq/v1/queue/{queue}", put(trigger_queue))
        // Management endpoints
        .route("/taskq/v1/queues", get(list_queues))
        .route("/taskq/v1/queue/{queue}/count", get(queue_count))
        .route(
            "/taskq/v1/queue/{queue}/lock",
            get(queue_lock).delete(release_lock),
        )
        .route("/taskq/v1/queue/{queue}/process", post(process_queue))
        .route("/taskq/v1/queue/{queue}/retry-failed", post(retry_failed))
        .route("/taskq/v1/queue/{queue}/failed", delete(delete_failed))
        .with_state(state)
}
