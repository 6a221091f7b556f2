//! End-to-end route tests over an in-memory stack

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use taskq_api::{api_router, AppState, SECRET_HEADER};
use taskq_core::{Handler, QueueOptions, Registry, TaskVerdict};
use taskq_engine::{LockManager, Processor};
use taskq_store::{MemoryLockStore, MemoryTaskStore, TaskStore};
use tower::ServiceExt;

const SECRET: &str = "trigger-secret";

struct TestApp {
    router: Router,
    store: Arc<MemoryTaskStore>,
    locks: LockManager,
}

fn test_app() -> TestApp {
    let mut registry = Registry::new();
    registry
        .register(QueueOptions::new("emails").handler(Handler::single_fn(
            |payload: String, _queue: String| async move {
                if payload == "fail" {
                    Ok(TaskVerdict::Rejected(None))
                } else {
                    Ok(TaskVerdict::Done)
                }
            },
        )))
        .unwrap();
    let registry = Arc::new(registry);

    let store = Arc::new(MemoryTaskStore::new());
    let locks = LockManager::new(Arc::new(MemoryLockStore::new()));
    let processor = Arc::new(Processor::new(
        registry.clone(),
        store.clone(),
        locks.clone(),
    ));
    let state = AppState::new(
        registry,
        store.clone(),
        locks.clone(),
        processor,
        Some(SECRET.to_string()),
    );

    TestApp {
        router: api_router(state),
        store,
        locks,
    }
}

fn put_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn authed(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(SECRET_HEADER, SECRET)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let app = test_app();
    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn trigger_rejects_bad_secret() {
    let app = test_app();
    let request = put_json(
        "/taskq/v1/queue/emails",
        json!({"termId": 1, "lock": "t", "secret": "wrong"}),
    );

    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn trigger_validates_term_id() {
    let app = test_app();
    let request = put_json(
        "/taskq/v1/queue/emails",
        json!({"termId": 0, "lock": "t", "secret": SECRET}),
    );

    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn trigger_processes_a_locked_queue() {
    let app = test_app();

    app.store.create_task(&["emails"], "hello").await.unwrap();
    let qid = app.store.queue_id("emails").await.unwrap().unwrap();
    assert!(app.locks.try_acquire("emails", "tok").await.unwrap());

    let request = put_json(
        "/taskq/v1/queue/emails",
        json!({"termId": qid, "lock": "tok", "secret": SECRET}),
    );
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["message"], "emails queue processed");
    assert_eq!(app.store.count_tasks("emails").await.unwrap(), 0);
    assert_eq!(app.locks.holder("emails").await.unwrap(), None);
}

#[tokio::test]
async fn trigger_reports_unprocessable_queue() {
    let app = test_app();
    let request = put_json(
        "/taskq/v1/queue/unregistered",
        json!({"termId": 1, "lock": "t", "secret": SECRET}),
    );

    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn management_requires_the_secret_header() {
    let app = test_app();
    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/taskq/v1/queue/emails/count")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn count_reports_live_tasks() {
    let app = test_app();
    app.store.create_task(&["emails"], "a").await.unwrap();
    app.store.create_task(&["emails"], "b").await.unwrap();

    let response = app
        .router
        .oneshot(authed("GET", "/taskq/v1/queue/emails/count"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["count"], 2);
}

#[tokio::test]
async fn list_queues_exposes_definitions() {
    let app = test_app();
    app.store.create_task(&["emails"], "a").await.unwrap();

    let response = app
        .router
        .oneshot(authed("GET", "/taskq/v1/queues"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json[0]["name"], "emails");
    assert_eq!(json[0]["retry_limit"], 3);
    assert_eq!(json[0]["dispatch"], "immediate");
    assert_eq!(json[0]["count"], 1);
}

#[tokio::test]
async fn lock_status_and_release() {
    let app = test_app();

    let response = app
        .router
        .clone()
        .oneshot(authed("GET", "/taskq/v1/queue/emails/lock"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["locked"], false);

    app.locks.try_acquire("emails", "tok").await.unwrap();
    let response = app
        .router
        .clone()
        .oneshot(authed("GET", "/taskq/v1/queue/emails/lock"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["locked"], true);

    let response = app
        .router
        .oneshot(authed("DELETE", "/taskq/v1/queue/emails/lock"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.locks.holder("emails").await.unwrap(), None);
}

#[tokio::test]
async fn process_runs_a_pass_in_request() {
    let app = test_app();
    app.store.create_task(&["emails"], "a").await.unwrap();

    let response = app
        .router
        .oneshot(authed("POST", "/taskq/v1/queue/emails/process"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.store.count_tasks("emails").await.unwrap(), 0);
    assert_eq!(app.locks.holder("emails").await.unwrap(), None);
}

#[tokio::test]
async fn process_conflicts_while_locked() {
    let app = test_app();
    app.store.create_task(&["emails"], "a").await.unwrap();
    app.locks.try_acquire("emails", "other").await.unwrap();

    let response = app
        .router
        .oneshot(authed("POST", "/taskq/v1/queue/emails/process"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(app.store.count_tasks("emails").await.unwrap(), 1);
}

#[tokio::test]
async fn retry_failed_moves_tasks_back() {
    let app = test_app();
    let t = app
        .store
        .create_task(&["emails_failed"], "a")
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(authed("POST", "/taskq/v1/queue/emails/retry-failed"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["moved"], 1);
    assert_eq!(app.store.memberships(t).await.unwrap(), vec!["emails"]);
}

#[tokio::test]
async fn delete_failed_spares_other_memberships_without_force() {
    let app = test_app();
    let t = app
        .store
        .create_task(&["emails_failed", "audit"], "a")
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(authed("DELETE", "/taskq/v1/queue/emails/failed"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["deleted"], 0);
    assert_eq!(app.store.memberships(t).await.unwrap(), vec!["audit"]);
}

#[tokio::test]
async fn delete_failed_with_force_removes_tasks() {
    let app = test_app();
    let t = app
        .store
        .create_task(&["emails_failed", "audit"], "a")
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(authed("DELETE", "/taskq/v1/queue/emails/failed?force=true"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["deleted"], 1);
    assert!(app.store.memberships(t).await.is_err());
}
