use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION, header::CONTENT_TYPE};
use axum::routing::{get, post};
use axum::{Json, Router};
use client_core::config::ClientConfig;
use client_core::credentials::{MemoryCredentialStore, USER_TOKEN_KEY};
use client_core::models::{ManualScanCompletion, ScanJobStatus};
use client_core::scan::{PollOptions, ScanClient, ScanError, ScanJobPoller, ScanUpload};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct TestServerState {
    submit_status: StatusCode,
    statuses: Arc<Mutex<VecDeque<&'static str>>>,
    fetches: Arc<Mutex<Vec<String>>>,
    uploads: Arc<Mutex<Vec<SeenUpload>>>,
    manual_queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    seen_auth_headers: Arc<Mutex<Vec<Option<String>>>>,
}

#[derive(Debug, Clone)]
struct SeenUpload {
    content_type: String,
    body: String,
}

impl TestServerState {
    fn with_statuses(statuses: Vec<&'static str>) -> Self {
        Self {
            submit_status: StatusCode::OK,
            statuses: Arc::new(Mutex::new(VecDeque::from(statuses))),
            fetches: Arc::new(Mutex::new(Vec::new())),
            uploads: Arc::new(Mutex::new(Vec::new())),
            manual_queries: Arc::new(Mutex::new(Vec::new())),
            seen_auth_headers: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[tokio::test]
async fn uploads_image_and_polls_until_completed() {
    let state = TestServerState::with_statuses(vec!["pending", "processing", "completed"]);
    let base_url = spawn_test_server(state.clone()).await;
    let poller = poller_for(&base_url, Some("token-7"));
    let mut seen = Vec::new();
    let mut record = |status: ScanJobStatus| seen.push(status);

    let job = poller
        .start(ScanUpload::from_bytes(b"png-bytes".to_vec(), Some("label.png")))
        .await
        .expect("upload should succeed");
    assert_eq!(job.job_id, "job-123");
    assert_eq!(job.status, ScanJobStatus::Pending);
    assert_eq!(job.user_product_id, Some(55));

    let result = poller
        .poll(
            &job.job_id,
            PollOptions::new(30, Duration::from_millis(10)),
            Some(&mut record),
        )
        .await
        .expect("poll should resolve");

    assert_eq!(result.status, ScanJobStatus::Completed);
    let extraction = result.extraction.expect("completed job carries extraction");
    assert_eq!(extraction.brand.as_deref(), Some("CeraVe"));
    assert_eq!(extraction.ingredients_parsed, vec!["Ceramide NP", "Hyaluronic Acid"]);
    assert!(!result.needs_manual_review);
    assert_eq!(
        seen,
        vec![
            ScanJobStatus::Pending,
            ScanJobStatus::Processing,
            ScanJobStatus::Completed
        ]
    );
    assert_eq!(state.fetches.lock().await.len(), 3);

    let uploads = state.uploads.lock().await.clone();
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].content_type.starts_with("multipart/form-data"));
    assert!(uploads[0].body.contains("name=\"file\""));
    assert!(uploads[0].body.contains("filename=\"label.png\""));
    assert!(uploads[0].body.contains("image/png"));
    assert!(uploads[0].body.contains("png-bytes"));

    let auth_headers = state.seen_auth_headers.lock().await.clone();
    assert_eq!(auth_headers.len(), 4);
    assert!(
        auth_headers
            .iter()
            .all(|header| header.as_deref() == Some("Bearer token-7"))
    );
}

#[tokio::test]
async fn poll_times_out_when_job_never_settles() {
    let state = TestServerState::with_statuses(vec!["processing"]);
    let base_url = spawn_test_server(state.clone()).await;
    let poller = poller_for(&base_url, None);

    let err = poller
        .poll("job-123", PollOptions::new(3, Duration::from_millis(10)), None)
        .await
        .expect_err("polling should time out");

    assert!(
        matches!(err, ScanError::PollTimedOut { attempts: 3, .. }),
        "unexpected error {err:?}"
    );
    assert_eq!(state.fetches.lock().await.len(), 3);
    assert_eq!(state.seen_auth_headers.lock().await[0], None);
}

#[tokio::test]
async fn failed_job_is_returned_with_reason() {
    let state = TestServerState::with_statuses(vec!["processing", "failed"]);
    let base_url = spawn_test_server(state.clone()).await;
    let poller = poller_for(&base_url, None);

    let result = poller
        .scan_and_wait(
            ScanUpload::from_bytes(b"jpeg".to_vec(), None),
            PollOptions::new(5, Duration::from_millis(10)),
            None,
        )
        .await
        .expect("failed job is a valid outcome");

    assert_eq!(result.status, ScanJobStatus::Failed);
    assert_eq!(result.error_message.as_deref(), Some("Could not read label"));
    assert!(result.needs_manual_review);
    assert!(result.extraction.is_none());
}

#[tokio::test]
async fn upload_rejection_propagates_as_error() {
    let mut state = TestServerState::with_statuses(vec!["pending"]);
    state.submit_status = StatusCode::SERVICE_UNAVAILABLE;
    let base_url = spawn_test_server(state.clone()).await;
    let poller = poller_for(&base_url, None);

    let err = poller
        .start(ScanUpload::from_bytes(b"jpeg".to_vec(), Some("photo.jpg")))
        .await
        .expect_err("upload failure should surface");

    assert!(
        matches!(err, ScanError::Status { status: 503, .. }),
        "unexpected error {err:?}"
    );
    assert!(state.fetches.lock().await.is_empty());
}

#[tokio::test]
async fn manual_completion_sends_fields_as_query() {
    let state = TestServerState::with_statuses(vec!["failed"]);
    let base_url = spawn_test_server(state.clone()).await;
    let poller = poller_for(&base_url, Some("token-7"));

    let response = poller
        .complete_manually(
            "job-123",
            &ManualScanCompletion {
                brand: Some("Paula's Choice".to_string()),
                product_name: Some("2% BHA Liquid".to_string()),
                category: None,
                ingredients: Some("Water, Salicylic Acid".to_string()),
            },
        )
        .await
        .expect("manual completion should succeed");

    assert_eq!(response.product_id, 99);
    let queries = state.manual_queries.lock().await.clone();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0]["brand"], "Paula's Choice");
    assert_eq!(queries[0]["product_name"], "2% BHA Liquid");
    assert_eq!(queries[0]["ingredients"], "Water, Salicylic Acid");
    assert!(!queries[0].contains_key("category"));
}

fn poller_for(base_url: &str, token: Option<&str>) -> ScanJobPoller<ScanClient> {
    let store = match token {
        Some(token) => MemoryCredentialStore::with_entries([(USER_TOKEN_KEY, token)]),
        None => MemoryCredentialStore::new(),
    };
    let config = ClientConfig::for_base_url(base_url).expect("config");
    let client = ScanClient::new(&config, Arc::new(store)).expect("client should build");
    ScanJobPoller::new(client)
}

async fn spawn_test_server(state: TestServerState) -> String {
    let app = Router::new()
        .route("/vision/scan", post(test_submit_handler))
        .route("/vision/scan/{job_id}", get(test_status_handler))
        .route(
            "/vision/scan/{job_id}/manual-complete",
            post(test_manual_complete_handler),
        )
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let local_addr = listener
        .local_addr()
        .expect("listener address should resolve");

    tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("test server should run");
    });

    format!("http://{local_addr}")
}

async fn record_auth(state: &TestServerState, headers: &HeaderMap) {
    state.seen_auth_headers.lock().await.push(
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string),
    );
}

async fn test_submit_handler(
    State(state): State<TestServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    record_auth(&state, &headers).await;
    state.uploads.lock().await.push(SeenUpload {
        content_type: headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    if state.submit_status != StatusCode::OK {
        return (state.submit_status, Json(json!({"detail": "vision service down"})));
    }

    (
        StatusCode::OK,
        Json(json!({
            "job_id": "job-123",
            "status": "pending",
            "message": "Scan queued",
            "user_product_id": 55
        })),
    )
}

async fn test_status_handler(
    State(state): State<TestServerState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> Json<Value> {
    record_auth(&state, &headers).await;
    state.fetches.lock().await.push(job_id.clone());

    let status = {
        let mut statuses = state.statuses.lock().await;
        if statuses.len() > 1 {
            statuses.pop_front().unwrap_or("processing")
        } else {
            statuses.front().copied().unwrap_or("processing")
        }
    };

    let body = match status {
        "completed" => json!({
            "job_id": job_id,
            "status": status,
            "user_product_id": 55,
            "extraction": {
                "brand": "CeraVe",
                "product_name": "Moisturizing Cream",
                "category": "moisturizer",
                "ingredients_raw": "Ceramide NP, Hyaluronic Acid",
                "ingredients_parsed": ["Ceramide NP", "Hyaluronic Acid"],
                "confidence_score": 0.88
            },
            "needs_manual_review": false
        }),
        "failed" => json!({
            "job_id": job_id,
            "status": status,
            "error_message": "Could not read label",
            "needs_manual_review": true
        }),
        _ => json!({
            "job_id": job_id,
            "status": status,
            "needs_manual_review": false
        }),
    };

    Json(body)
}

async fn test_manual_complete_handler(
    State(state): State<TestServerState>,
    Path(_job_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Json<Value> {
    record_auth(&state, &headers).await;
    state.manual_queries.lock().await.push(query);

    Json(json!({"message": "Product saved", "product_id": 99}))
}
