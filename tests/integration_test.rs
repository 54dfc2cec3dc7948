//! Integration tests for the API.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tower::ServiceExt;

use transfer_engine::api::{API_KEY_HEADER, CleanupScheduledResponse, create_router};
use transfer_engine::app::{AppState, ProcessingConfig};
use transfer_engine::domain::{
    AuditLogEntry, CLEANUP_QUEUE, ErrorResponse, HealthResponse, HealthStatus, PaginatedResponse,
    QueueStats, TRANSFER_PROCESSING_QUEUE, Transfer, TransferStatus,
};
use transfer_engine::test_utils::{
    FixedClock, InMemoryAuditLogStore, InMemoryTransferRepository, RecordingJobQueue,
    ScriptedRandom, test_epoch,
};

const KEY: &str = "test-api-key";

struct TestApp {
    state: Arc<AppState>,
    repo: Arc<InMemoryTransferRepository>,
    queue: Arc<RecordingJobQueue>,
}

impl TestApp {
    fn new() -> Self {
        Self::build(Some(KEY))
    }

    fn build(api_key: Option<&str>) -> Self {
        let repo = Arc::new(InMemoryTransferRepository::new());
        let queue = Arc::new(RecordingJobQueue::new());
        let state = AppState::with_runtime(
            repo.clone(),
            Arc::new(InMemoryAuditLogStore::new()),
            queue.clone(),
            Arc::new(FixedClock::new(test_epoch())),
            Arc::new(ScriptedRandom::always_succeed()),
            ProcessingConfig {
                min_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                ..ProcessingConfig::default()
            },
        );
        let state = match api_key {
            Some(key) => state.with_api_key(key),
            None => state,
        };
        Self {
            state: Arc::new(state),
            repo,
            queue,
        }
    }

    fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(API_KEY_HEADER, KEY);
        let body = match body {
            Some(value) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .router()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    async fn create(&self, amount: i64) -> Transfer {
        let (status, body) = self.send("POST", "/transfers", Some(create_body(amount))).await;
        assert_eq!(status, StatusCode::CREATED, "{}", String::from_utf8_lossy(&body));
        serde_json::from_slice(&body).unwrap()
    }
}

fn create_body(amount: i64) -> Value {
    json!({
        "amount": amount,
        "currency": "USD",
        "channel": "mobile",
        "recipient": { "phone": "+1234567890", "name": "John Doe" },
        "metadata": { "source": "web" }
    })
}

#[tokio::test]
async fn test_create_transfer_computes_fees_and_queues_job() {
    let app = TestApp::new();
    let transfer = app.create(10000).await;

    assert_eq!(transfer.status(), TransferStatus::Pending);
    assert_eq!(transfer.fees(), Decimal::from(100));
    assert_eq!(transfer.total(), Decimal::from(10100));
    assert!(transfer.reference().starts_with("TRF-20250314-"));
    assert_eq!(transfer.metadata().get("source"), Some(&json!("web")));

    let jobs = app.queue.enqueued(TRANSFER_PROCESSING_QUEUE);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].payload, json!({ "transfer_id": transfer.id() }));
}

#[tokio::test]
async fn test_transfer_responses_carry_display_fields() {
    let app = TestApp::new();
    let (status, bytes) = app.send("POST", "/transfers", Some(create_body(10000))).await;
    assert_eq!(status, StatusCode::CREATED);
    let created: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(created["formatted_amount"], "$10,000.00");
    assert_eq!(created["status_label"], "Pending");
    assert!(created.get("processing_time_minutes").is_none());

    let id = created["id"].as_str().unwrap().to_string();
    let (status, _) = app.send("POST", &format!("/transfers/{}/process", id), None).await;
    assert_eq!(status, StatusCode::OK);
    app.state.service.executor().wait_idle().await;

    let (_, bytes) = app.send("GET", &format!("/transfers/{}", id), None).await;
    let done: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(done["status_label"], "Completed");
    assert_eq!(done["processing_time_minutes"], 1);

    let (_, bytes) = app.send("GET", "/transfers", None).await;
    let page: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(page["data"][0]["formatted_amount"], "$10,000.00");
}

#[tokio::test]
async fn test_create_transfer_validation_error() {
    let app = TestApp::new();
    let mut body = create_body(10000);
    body["currency"] = json!("DOLLARS");

    let (status, bytes) = app.send("POST", "/transfers", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(error.error.r#type, "validation_error");
    assert!(app.repo.get_all_items().is_empty());
}

#[tokio::test]
async fn test_duplicate_reference_is_conflict() {
    let app = TestApp::new();
    let mut body = create_body(5000);
    body["reference"] = json!("INV-42");

    let (first, _) = app.send("POST", "/transfers", Some(body.clone())).await;
    assert_eq!(first, StatusCode::CREATED);
    let (second, _) = app.send("POST", "/transfers", Some(body)).await;
    assert_eq!(second, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_get_transfer_and_not_found() {
    let app = TestApp::new();
    let created = app.create(2000).await;

    let (status, bytes) = app.send("GET", &format!("/transfers/{}", created.id()), None).await;
    assert_eq!(status, StatusCode::OK);
    let fetched: Transfer = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(fetched.id(), created.id());

    let (status, bytes) = app.send("GET", "/transfers/does-not-exist", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(error.error.r#type, "not_found");
}

#[tokio::test]
async fn test_list_transfers_with_filters_and_pagination() {
    let app = TestApp::new();
    for amount in [1000, 2000, 3000, 4000, 5000] {
        app.create(amount).await;
    }

    let (status, bytes) = app.send("GET", "/transfers?limit=2&min_amount=2000", None).await;
    assert_eq!(status, StatusCode::OK);
    let page: PaginatedResponse<Transfer> = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(page.data.len(), 2);
    assert!(page.has_next_page);
    assert_eq!(page.data[0].amount(), Decimal::from(2000));

    let cursor = page.next_cursor.unwrap();
    let (_, bytes) = app
        .send("GET", &format!("/transfers?limit=2&min_amount=2000&cursor={}", cursor), None)
        .await;
    let page: PaginatedResponse<Transfer> = serde_json::from_slice(&bytes).unwrap();
    let amounts: Vec<Decimal> = page.data.iter().map(|t| t.amount()).collect();
    assert_eq!(amounts, vec![Decimal::from(4000), Decimal::from(5000)]);
    assert!(!page.has_next_page);
    assert!(page.next_cursor.is_none());
}

#[tokio::test]
async fn test_list_transfers_rejects_bad_date() {
    let app = TestApp::new();
    let (status, bytes) = app.send("GET", "/transfers?created_after=not-a-date", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
    assert!(error.error.message.contains("created_after"));
}

#[tokio::test]
async fn test_patch_transfer_amount_and_status() {
    let app = TestApp::new();
    let created = app.create(10000).await;
    let uri = format!("/transfers/{}", created.id());

    let (status, bytes) = app.send("PATCH", &uri, Some(json!({ "amount": 300000 }))).await;
    assert_eq!(status, StatusCode::OK);
    let updated: Transfer = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(updated.fees(), Decimal::from(1500));
    assert_eq!(updated.total(), Decimal::from(301500));
    assert_eq!(updated.status(), TransferStatus::Pending);

    let (status, bytes) = app.send("PATCH", &uri, Some(json!({ "status": "COMPLETED" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let error: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(error.error.r#type, "invalid_transition");
}

#[tokio::test]
async fn test_process_then_audit_trail() {
    let app = TestApp::new();
    let created = app.create(10000).await;

    let (status, bytes) = app
        .send("POST", &format!("/transfers/{}/process", created.id()), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let processing: Transfer = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(processing.status(), TransferStatus::Processing);

    app.state.service.executor().wait_idle().await;
    assert_eq!(app.repo.get(created.id()).unwrap().status(), TransferStatus::Completed);

    let (status, bytes) = app
        .send("GET", &format!("/transfers/{}/audit", created.id()), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let logs: Vec<AuditLogEntry> = serde_json::from_slice(&bytes).unwrap();
    let actions: Vec<&str> = logs.iter().map(|l| l.action.as_str()).collect();
    assert_eq!(actions, vec!["TRANSFER_CREATED", "TRANSFER_PROCESSING", "TRANSFER_SUCCESS"]);

    // Processing again is a conflict
    let (status, _) = app
        .send("POST", &format!("/transfers/{}/process", created.id()), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_cancel_transfer() {
    let app = TestApp::new();
    let created = app.create(10000).await;
    let uri = format!("/transfers/{}/cancel", created.id());

    let (status, bytes) = app.send("POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let cancelled: Transfer = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(cancelled.status(), TransferStatus::Cancelled);

    let (status, _) = app.send("POST", &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_admin_cleanup_and_queue_stats() {
    let app = TestApp::new();
    let (status, bytes) = app
        .send(
            "POST",
            "/admin/cleanup",
            Some(json!({ "keep_last_n": 3, "filters": { "status": "COMPLETED" } })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let scheduled: CleanupScheduledResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(scheduled.keep_last_n, 3);
    assert_eq!(app.queue.enqueued(CLEANUP_QUEUE).len(), 1);

    let (status, bytes) = app.send("GET", "/admin/queues/cleanup", None).await;
    assert_eq!(status, StatusCode::OK);
    let stats: QueueStats = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(stats.waiting, 1);
}

#[tokio::test]
async fn test_missing_api_key_is_unauthorized() {
    let app = TestApp::new();
    let request = Request::builder()
        .method("GET")
        .uri("/transfers")
        .body(Body::empty())
        .unwrap();
    let response = app.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_api_key_is_forbidden() {
    let app = TestApp::new();
    let request = Request::builder()
        .method("GET")
        .uri("/transfers")
        .header(API_KEY_HEADER, "nope")
        .body(Body::empty())
        .unwrap();
    let response = app.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unconfigured_api_key_is_forbidden() {
    let app = TestApp::build(None);
    let (status, _) = app.send("GET", "/transfers", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_health_is_public() {
    let app = TestApp::new();
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let health: HealthResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(health.database, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_readiness_reflects_database() {
    let app = TestApp::new();
    app.repo.set_healthy(false);
    let request = Request::builder()
        .uri("/health/ready")
        .body(Body::empty())
        .unwrap();
    let response = app.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let live = Request::builder()
        .uri("/health/live")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.router().oneshot(live).await.unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn test_database_errors_are_masked() {
    let app = TestApp::new();
    app.repo.set_failing(true);
    let (status, bytes) = app.send("GET", "/transfers", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let error: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(error.error.message, "Internal server error");
}
