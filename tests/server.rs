//! End-to-end tests for the HTTP API.
//!
//! Each test starts a mock Iliad vendor and a bridge server on ephemeral
//! ports, then drives the bridge over real HTTP.

use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use iliad_bridge::config::{parse_config, Config};
use iliad_bridge::credentials::{encrypt_api_key, generate_key, Credentials};
use iliad_bridge::iliad::IliadClient;
use iliad_bridge::server::run_server;
use iliad_bridge::throttle::CallThrottle;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const API_KEY: &str = "vendor-secret";

// ─── Mock vendor ────────────────────────────────────────────────────

#[derive(Default)]
struct Vendor {
    uploads: Mutex<Vec<(String, String)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

type Shared = Arc<Vendor>;

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("x-api-key").and_then(|v| v.to_str().ok()) == Some(API_KEY)
}

async fn vendor_sources(headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"detail": "no"})));
    }
    (
        StatusCode::OK,
        Json(json!({
            "global_sources": ["oad-public", "partner-shared"],
            "private_sources": ["oad-team"],
        })),
    )
}

async fn vendor_source_details(Path(source): Path<String>) -> Json<Value> {
    Json(json!({
        "name": source,
        "embedding_model": "text-embedding-ada-002",
        "created": "2024-01-02T03:04:05.000Z",
        "edited": "2024-02-03T04:05:06.000Z",
    }))
}

async fn vendor_create_source(Json(body): Json<Value>) -> impl IntoResponse {
    (StatusCode::CREATED, Json(json!({ "name": body["source"] })))
}

async fn vendor_delete_source(Path(source): Path<String>) -> StatusCode {
    match source.as_str() {
        "oad-locked" => StatusCode::FORBIDDEN,
        "oad-teapot" => StatusCode::IM_A_TEAPOT,
        _ => StatusCode::NO_CONTENT,
    }
}

async fn vendor_documents(Path(source): Path<String>) -> Json<Value> {
    Json(json!({ "documents": [{ "id": 1, "filename": format!("{}.pdf", source) }] }))
}

async fn vendor_delete_document(Path((_source, id)): Path<(String, String)>) -> impl IntoResponse {
    if id == "404" {
        return (StatusCode::NOT_FOUND, "no such document").into_response();
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn vendor_upload(
    State(vendor): State<Shared>,
    Path(source): Path<String>,
    mut multipart: Multipart,
) -> Json<Value> {
    let now = vendor.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    vendor.peak.fetch_max(now, Ordering::SeqCst);

    let mut name = String::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        if field.name() == Some("file") {
            name = field.file_name().unwrap_or_default().to_string();
            let _ = field.bytes().await.unwrap();
        }
    }
    tokio::time::sleep(Duration::from_millis(40)).await;
    vendor.uploads.lock().unwrap().push((source, name.clone()));

    vendor.in_flight.fetch_sub(1, Ordering::SeqCst);
    Json(json!({ "task_id": format!("t-{}", name) }))
}

async fn vendor_task(Path((_source, task_id)): Path<(String, String)>) -> Json<Value> {
    Json(json!({ "status": "SUCCESS", "task_id": task_id }))
}

async fn vendor_rag(Path(source): Path<String>, Json(body): Json<Value>) -> impl IntoResponse {
    if source == "oad-empty" {
        return (StatusCode::NOT_FOUND, Json(json!({"detail": "none"})));
    }
    let question = body["messages"]
        .as_array()
        .and_then(|m| m.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default()
        .to_string();
    (
        StatusCode::OK,
        Json(json!({
            "content": format!("{} answered from {}", question, source),
            "references": [{ "filename": "a.pdf" }],
        })),
    )
}

async fn start_vendor() -> (u16, Shared) {
    let vendor: Shared = Arc::default();
    let app = Router::new()
        .route(
            "/api/v1/sources/",
            get(vendor_sources).post(vendor_create_source),
        )
        .route(
            "/api/v1/sources/{source}",
            get(vendor_source_details).delete(vendor_delete_source),
        )
        .route(
            "/api/v1/sources/{source}/documents",
            get(vendor_documents).post(vendor_upload),
        )
        .route(
            "/api/v1/sources/{source}/documents/{id}",
            delete(vendor_delete_document),
        )
        .route("/api/v1/sources/{source}/rag", post(vendor_rag))
        .route("/api/v1/sources/{source}/{task_id}", get(vendor_task))
        .with_state(vendor.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    (port, vendor)
}

// ─── Bridge harness ─────────────────────────────────────────────────

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn bridge_config(tmp: &TempDir, vendor_port: u16, port: u16, extra: &str) -> Config {
    let key = generate_key();
    let encrypted = encrypt_api_key(&key, API_KEY).unwrap();
    let root = tmp.path().display();
    let content = format!(
        r#"[db]
path = "{root}/data/bridge.sqlite"

[iliad]
base_url = "http://127.0.0.1:{vendor_port}"
encryption_key = "{key}"
encrypted_api_key = "{encrypted}"
auth_token = "user-token"

[media]
root = "{root}/media"
preview_base_url = "https://intranet.example"

[auto_upload]
min_call_spacing_ms = 0
request_poll_delay_secs = 0
poll_attempts = 2

[server]
bind = "127.0.0.1:{port}"
{extra}
"#
    );
    parse_config(&content).unwrap()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if client
            .get(format!("http://127.0.0.1:{}/health", port))
            .send()
            .await
            .is_ok()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("bridge did not start on port {}", port);
}

struct Bridge {
    tmp: TempDir,
    base: String,
    vendor: Shared,
    http: reqwest::Client,
}

impl Bridge {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

async fn start_bridge(extra: &str) -> Bridge {
    start_bridge_with(extra, |_| {}).await
}

async fn start_bridge_with(extra: &str, adjust: impl FnOnce(&mut Config)) -> Bridge {
    let (vendor_port, vendor) = start_vendor().await;
    let tmp = TempDir::new().unwrap();
    let port = free_port();
    let mut cfg = bridge_config(&tmp, vendor_port, port, extra);
    adjust(&mut cfg);
    tokio::spawn(async move {
        run_server(&cfg, false).await.ok();
    });
    wait_for_server(port).await;
    Bridge {
        tmp,
        base: format!("http://127.0.0.1:{}", port),
        vendor,
        http: reqwest::Client::new(),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let bridge = start_bridge("").await;
    let resp = bridge.http.get(bridge.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_list_sources_filters_prefix_and_merges_local() {
    let bridge = start_bridge("").await;

    let resp = bridge
        .http
        .post(bridge.url("/create-source/"))
        .json(&json!({"source": "oad-new", "description": "fresh", "visibility": "global"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let body: Value = bridge
        .http
        .get(bridge.url("/list-sources/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let external_global = body["external_sources"]["global"].as_array().unwrap();
    assert_eq!(external_global.len(), 1, "partner-shared is filtered out");
    assert_eq!(external_global[0]["name"], "oad-public");
    assert_eq!(external_global[0]["created_at"], "2024-01-02 03:04:05");
    assert_eq!(external_global[0]["updated_at"], "2024-02-03 04:05:06");
    assert_eq!(body["external_sources"]["private"][0]["name"], "oad-team");

    let local_global = body["global_sources"].as_array().unwrap();
    assert_eq!(local_global.len(), 1);
    assert_eq!(local_global[0]["name"], "oad-new");
}

#[tokio::test]
async fn test_delete_source_maps_vendor_codes() {
    let bridge = start_bridge("").await;

    let ok = bridge
        .http
        .delete(bridge.url("/delete-source/oad-old/"))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 204);

    let locked = bridge
        .http
        .delete(bridge.url("/delete-source/oad-locked/"))
        .send()
        .await
        .unwrap();
    assert_eq!(locked.status(), 403);
    let body: Value = locked.json().await.unwrap();
    assert_eq!(body["error"], "Forbidden");

    let teapot = bridge
        .http
        .delete(bridge.url("/delete-source/oad-teapot/"))
        .send()
        .await
        .unwrap();
    assert_eq!(teapot.status(), 418);
    let body: Value = teapot.json().await.unwrap();
    assert_eq!(body["error"], "Unexpected status code: 418");
}

#[tokio::test]
async fn test_documents_list_and_delete() {
    let bridge = start_bridge("").await;

    let body: Value = bridge
        .http
        .get(bridge.url("/list-documents/oad-public/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["documents"][0]["filename"], "oad-public.pdf");

    let resp = bridge
        .http
        .delete(bridge.url("/delete-document/oad-public/1/"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let missing = bridge
        .http
        .delete(bridge.url("/delete-document/oad-public/404/"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["error"], "no such document");
}

#[tokio::test]
async fn test_manual_upload_then_status_check_updates_history() {
    let bridge = start_bridge("").await;

    let part = reqwest::multipart::Part::bytes(b"%PDF-1.4".to_vec()).file_name("guide.pdf");
    let form = reqwest::multipart::Form::new().part("file", part);
    let resp = bridge
        .http
        .post(bridge.url("/upload-document/oad-public/"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["upload_status"], "PENDING");
    assert_eq!(body["task_id"], "t-guide.pdf");
    assert_eq!(
        body["preview_url"],
        "https://intranet.example/media/previews/oad-public%23guide.pdf"
    );

    let status: Value = bridge
        .http
        .get(bridge.url("/check-upload-status/oad-public/t-guide.pdf/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "SUCCESS");
    assert_eq!(status["full_response"]["task_id"], "t-guide.pdf");

    let history: Value = bridge
        .http
        .get(bridge.url("/get-upload-status/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history["scheduler_status"], "Not running");
    let details = history["upload_details"].as_array().unwrap();
    assert_eq!(details.len(), 1, "preview is matched to its record");
    assert_eq!(details[0]["file_name"], "guide.pdf");
    assert_eq!(details[0]["status"], "COMPLETED");
}

async fn upload_file(bridge: &Bridge, file_name: &str) -> reqwest::Response {
    let part = reqwest::multipart::Part::bytes(b"%PDF-1.4".to_vec()).file_name(file_name.to_string());
    let form = reqwest::multipart::Form::new().part("file", part);
    bridge
        .http
        .post(bridge.url("/upload-document/oad-public/"))
        .multipart(form)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_manual_upload_accepts_routed_file_names() {
    let bridge = start_bridge("").await;

    let resp = upload_file(&bridge, "oad#public#guide.pdf").await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body["preview_url"],
        "https://intranet.example/media/previews/oad-public%23oad%23public%23guide.pdf"
    );
    assert!(bridge
        .tmp
        .path()
        .join("media/previews/oad-public#oad#public#guide.pdf")
        .exists());
    assert_eq!(
        *bridge.vendor.uploads.lock().unwrap(),
        vec![("oad-public".to_string(), "oad#public#guide.pdf".to_string())]
    );

    let escaping = upload_file(&bridge, "../guide.pdf").await;
    assert_eq!(escaping.status(), 400);
    let body: Value = escaping.json().await.unwrap();
    assert_eq!(body["error"], "Invalid file name");
}

#[tokio::test]
async fn test_previews_older_than_the_history_window_count_as_uploaded() {
    let bridge = start_bridge_with("", |cfg| cfg.auto_upload.history_limit = 2).await;
    for name in ["a.pdf", "b.pdf", "c.pdf"] {
        assert_eq!(upload_file(&bridge, name).await.status(), 200);
    }

    let history: Value = bridge
        .http
        .get(bridge.url("/get-upload-status/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let details = history["upload_details"].as_array().unwrap();
    let names: Vec<&str> = details
        .iter()
        .map(|d| d["file_name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["c.pdf", "b.pdf"]);
    assert!(details.iter().all(|d| d["status"] != "NOT UPLOADED"));
}

#[tokio::test]
async fn test_orphan_previews_are_listed_as_not_uploaded() {
    let bridge = start_bridge("").await;
    let previews = bridge.tmp.path().join("media/previews");
    std::fs::create_dir_all(&previews).unwrap();
    std::fs::write(previews.join("oad-public#orphan.pdf"), b"x").unwrap();

    let history: Value = bridge
        .http
        .get(bridge.url("/get-upload-status/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let details = history["upload_details"].as_array().unwrap();
    assert_eq!(details.len(), 1);
    assert_eq!(details[0]["status"], "NOT UPLOADED");
    assert_eq!(
        details[0]["preview_url"],
        "https://intranet.example/media/previews/oad-public%23orphan.pdf"
    );
}

#[tokio::test]
async fn test_auto_upload_endpoint_runs_a_pass() {
    let bridge = start_bridge("").await;
    let inbox = bridge.tmp.path().join("media/auto_upload");
    std::fs::create_dir_all(&inbox).unwrap();
    std::fs::write(inbox.join("oad#public#policy.pdf"), b"x").unwrap();
    std::fs::write(inbox.join("oad#public#legacy.doc"), b"x").unwrap();

    let body: Value = bridge
        .http
        .post(bridge.url("/auto-upload/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "success");
    let processed = body["data"]["processed_files"].as_array().unwrap();
    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0]["file_name"], "oad#public#policy.pdf");
    assert_eq!(processed[0]["status"], "COMPLETED");
    let unprocessed = body["data"]["unprocessed_files"].as_array().unwrap();
    assert_eq!(unprocessed[0]["reason"], "Unsupported file type");

    assert!(!inbox.join("oad#public#policy.pdf").exists());
    assert!(bridge
        .tmp
        .path()
        .join("media/manual_check/oad#public#legacy.doc")
        .exists());
    assert_eq!(
        *bridge.vendor.uploads.lock().unwrap(),
        vec![("oad-public".to_string(), "oad#public#policy.pdf".to_string())]
    );
}

#[tokio::test]
async fn test_chat_and_search() {
    let bridge = start_bridge("").await;

    let chat: Value = bridge
        .http
        .post(bridge.url("/chat/oad-team/"))
        .json(&json!({
            "question": "Who approves leave?",
            "history": [{"role": "user", "content": "hi"}, {"role": "assistant", "content": "hello"}],
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        chat["response"]["content"],
        "Who approves leave? answered from oad-team"
    );
    assert_eq!(chat["history"].as_array().unwrap().len(), 3);

    let empty: Value = bridge
        .http
        .post(bridge.url("/chat/oad-empty/"))
        .json(&json!({"question": "anything"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(empty["response"]["content"]
        .as_str()
        .unwrap()
        .starts_with("Sorry, no documents"));

    let search: Value = bridge
        .http
        .post(bridge.url("/search/"))
        .json(&json!({"question": "holidays", "mysource": "internal"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        search["response"]["content"],
        "holidays answered from oad-internal"
    );

    let invalid = bridge
        .http
        .post(bridge.url("/search/"))
        .json(&json!({"question": "x", "mysource": "secret"}))
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), 400);
    let body: Value = invalid.json().await.unwrap();
    assert_eq!(body["error"], "Invalid source");

    let malformed = bridge
        .http
        .post(bridge.url("/chat/oad-team/"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), 400);
    let body: Value = malformed.json().await.unwrap();
    assert_eq!(body["error"], "Invalid JSON in request body");
}

#[tokio::test]
async fn test_start_scheduler_is_idempotent() {
    let bridge = start_bridge("").await;

    let first: Value = bridge
        .http
        .post(bridge.url("/start-scheduler/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["message"], "Scheduler started");
    assert_eq!(first["scheduler"]["running"], true);

    let second: Value = bridge
        .http
        .post(bridge.url("/start-scheduler/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["message"], "Scheduler already running");
}

#[tokio::test]
async fn test_user_header_required_when_configured() {
    let bridge = start_bridge("require_user = true").await;

    let anonymous = bridge
        .http
        .get(bridge.url("/user-info/"))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), 401);

    let resp = bridge
        .http
        .get(bridge.url("/user-info/"))
        .header("x-remote-user", "jdoe")
        .header("x-remote-email", "jdoe@example.org")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["username"], "jdoe");
    assert_eq!(body["email"], "jdoe@example.org");

    let health = bridge.http.get(bridge.url("/health")).send().await.unwrap();
    assert_eq!(health.status(), 200);
}

#[tokio::test]
async fn test_undecryptable_key_is_reported() {
    let (vendor_port, _vendor) = start_vendor().await;
    let tmp = TempDir::new().unwrap();
    let port = free_port();
    let mut cfg = bridge_config(&tmp, vendor_port, port, "");
    cfg.iliad.encrypted_api_key = Some("not-a-fernet-token".to_string());
    tokio::spawn(async move {
        run_server(&cfg, false).await.ok();
    });
    wait_for_server(port).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{}/list-sources/", port))
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Failed to decrypt API key");
}

#[tokio::test]
async fn test_client_never_exceeds_five_concurrent_uploads() {
    let (vendor_port, vendor) = start_vendor().await;
    let throttle = Arc::new(CallThrottle::new(5, Duration::ZERO));
    let client = Arc::new(
        IliadClient::with_credentials(
            &format!("http://127.0.0.1:{}", vendor_port),
            Credentials::new(API_KEY, "user-token"),
            throttle.clone(),
            Duration::from_secs(10),
        )
        .unwrap(),
    );

    let mut handles = Vec::new();
    for i in 0..20 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client
                .upload_document("oad-public", &format!("f{}.pdf", i), vec![0u8; 16])
                .await
        }));
    }
    for handle in handles {
        let receipt = handle.await.unwrap().unwrap();
        assert!(receipt.task_id.is_some());
    }

    assert_eq!(vendor.uploads.lock().unwrap().len(), 20);
    assert!(vendor.peak.load(Ordering::SeqCst) <= 5);
    assert!(throttle.peak_uploads() <= 5);
}
