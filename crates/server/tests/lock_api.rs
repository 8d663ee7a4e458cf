//! Lock and holder status API integration tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use common::TestFixture;
use spawnpool_core::backoff::{
    BackoffConfig, ConflictBackoff, HttpHolderStatus, NeverCancelled, RemoteAcquire,
    RemoteLockClient,
};
use spawnpool_core::{
    CreateTicketRequest, EventKind, TicketKind, TicketStatus, TicketStore,
};

#[tokio::test]
async fn test_acquire_busy_release() {
    let fixture = TestFixture::new();

    let response = fixture
        .post(
            "/api/v1/locks/video/acquire",
            json!({ "task_id": "render-a", "pid": std::process::id() }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["outcome"], "acquired");
    assert_eq!(response.body["resource"], "video");

    let response = fixture
        .post(
            "/api/v1/locks/video/acquire",
            json!({ "task_id": "render-b", "pid": std::process::id() }),
        )
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(response.body["holder_task_id"], "render-a");
    assert!(response.body["held_for_secs"].is_number());

    let response = fixture
        .post(
            "/api/v1/locks/video/release",
            json!({ "task_id": "render-a" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["released"], true);
    assert_eq!(fixture.notifier.published_of(EventKind::LockReleased).len(), 1);

    let response = fixture
        .post(
            "/api/v1/locks/video/acquire",
            json!({ "task_id": "render-b", "pid": std::process::id() }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        fixture.locks.slot("video").unwrap().holder_task_id.as_deref(),
        Some("render-b")
    );
}

#[tokio::test]
async fn test_unknown_resource() {
    let fixture = TestFixture::new();

    let response = fixture
        .post(
            "/api/v1/locks/gpu/acquire",
            json!({ "task_id": "t", "pid": 1 }),
        )
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let response = fixture
        .post("/api/v1/locks/gpu/release", json!({ "task_id": "t" }))
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_acquire_requires_task_id() {
    let fixture = TestFixture::new();
    let response = fixture
        .post(
            "/api/v1/locks/script/acquire",
            json!({ "task_id": " ", "pid": 1 }),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_locks() {
    let fixture = TestFixture::new();
    fixture.locks.acquire_as("image", "thumbs-1", 31337).unwrap();

    let response = fixture.get("/api/v1/locks").await;
    assert_eq!(response.status, StatusCode::OK);

    let slots = response.body.as_array().unwrap();
    assert_eq!(slots.len(), 4);
    let image = slots.iter().find(|s| s["resource"] == "image").unwrap();
    assert_eq!(image["holder_task_id"], "thumbs-1");
    assert_eq!(image["holder_pid"], 31337);
    let script = slots.iter().find(|s| s["resource"] == "script").unwrap();
    assert!(script["holder_task_id"].is_null());
    assert!(script["held_for_secs"].is_null());
}

#[tokio::test]
async fn test_holder_status() {
    let fixture = TestFixture::new();
    fixture.locks.acquire("upload", "push-1").unwrap();

    let response = fixture.get("/api/v1/holders/push-1").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["task_id"], "push-1");
    assert_eq!(response.body["status"], "running");

    let response = fixture.get("/api/v1/holders/someone-else").await;
    assert_eq!(response.body["status"], "released");

    // A ticket id as task id reports the ticket's outcome
    let ticket = fixture
        .tickets
        .create(CreateTicketRequest::new(TicketKind::Defect, "crash", ""))
        .unwrap();
    fixture.tickets.claim("w1", 1, None).unwrap();
    fixture
        .tickets
        .set_status(ticket.id, "w1", TicketStatus::Resolved, None)
        .unwrap();

    let response = fixture
        .get(&format!("/api/v1/holders/{}", ticket.id))
        .await;
    assert_eq!(response.body["status"], "completed");
}

async fn serve(fixture: &TestFixture) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = fixture.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_remote_client_waits_for_holder() {
    let fixture = TestFixture::new();
    let base_url = serve(&fixture).await;
    let pid = std::process::id();

    let holder = Arc::new(RemoteLockClient::new(&base_url, Duration::from_secs(5)).unwrap());
    let waiter = RemoteLockClient::new(&base_url, Duration::from_secs(5)).unwrap();

    let grant = match tokio_test::assert_ok!(holder.acquire("video", "render-a", pid).await) {
        RemoteAcquire::Granted(grant) => grant,
        RemoteAcquire::Busy(busy) => panic!("unexpectedly busy: {}", busy),
    };
    assert_eq!(grant.outcome, "acquired");

    let busy = match waiter.acquire("video", "render-b", pid).await.unwrap() {
        RemoteAcquire::Busy(busy) => busy,
        RemoteAcquire::Granted(_) => panic!("lock should be held"),
    };
    assert_eq!(busy.holder_task_id, "render-a");

    let releaser = Arc::clone(&holder);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        releaser.release("video", "render-a").await.unwrap();
    });

    let backoff = ConflictBackoff::new(
        BackoffConfig {
            poll_interval_ms: 20,
            max_wait_ms: 5_000,
            http_timeout_secs: 5,
        },
        Arc::new(HttpHolderStatus::new(&base_url, Duration::from_secs(5)).unwrap()),
    );

    let retried = backoff
        .wait_then_retry(busy, &NeverCancelled, || {
            waiter.acquire("video", "render-b", pid)
        })
        .await
        .unwrap();

    assert!(matches!(retried, RemoteAcquire::Granted(_)));
    assert_eq!(
        fixture.locks.slot("video").unwrap().holder_task_id.as_deref(),
        Some("render-b")
    );
}
