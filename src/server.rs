//! Intranet HTTP API.
//!
//! A thin axum layer over the Iliad client, the local ledger, and the
//! auto-upload pipeline. User authentication happens in the SSO front end;
//! this server only reads the identity header it forwards.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Health check (returns version) |
//! | `GET` | `/list-sources/` | Vendor sources merged with the local mirror |
//! | `POST` | `/create-source/` | Create a vendor source |
//! | `DELETE` | `/delete-source/{source}/` | Delete a vendor source |
//! | `GET` | `/list-documents/{source}/` | Documents under a source |
//! | `DELETE` | `/delete-document/{source}/{document_id}/` | Delete one document |
//! | `POST` | `/upload-document/{source}/` | Manual multipart upload |
//! | `GET` | `/check-upload-status/{source}/{task_id}/` | Vendor task status |
//! | `POST` | `/chat/{source}/` | RAG chat with history |
//! | `POST` | `/search/` | One-shot RAG question against public/internal |
//! | `POST` | `/auto-upload/` | Run one auto-upload pass now |
//! | `GET` | `/get-upload-status/` | Ledger history and preview files |
//! | `POST` | `/start-scheduler/` | Start the background scheduler |
//! | `GET` | `/user-info/` | Identity forwarded by the SSO front end |
//!
//! # Error Contract
//!
//! ```json
//! { "error": "Failed to decrypt API key" }
//! ```

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::catalog;
use crate::config::Config;
use crate::db;
use crate::error::IliadError;
use crate::iliad::IliadClient;
use crate::ledger;
use crate::migrate;
use crate::models::{ChatMessage, RagAnswer, RagRequest, TaskState, UploadStatus, Visibility};
use crate::pipeline::{PollPolicy, UploadPipeline};
use crate::previews::PreviewStore;
use crate::scheduler::Scheduler;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
    client: Arc<IliadClient>,
    pipeline: UploadPipeline,
    scheduler: Arc<Scheduler>,
}

impl AppState {
    pub fn new(config: Config, pool: SqlitePool, client: Arc<IliadClient>) -> anyhow::Result<Self> {
        let pipeline = UploadPipeline::from_config(&config, client.clone(), pool.clone())?;
        let scheduler = Arc::new(Scheduler::from_config(
            pipeline.clone(),
            &config.auto_upload,
        ));
        Ok(Self {
            config: Arc::new(config),
            pool,
            client,
            pipeline,
            scheduler,
        })
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }
}

/// Connects the database, applies migrations, and serves until ctrl-c.
///
/// With `start_scheduler` (or `auto_upload.start_on_boot`), the background
/// auto-upload scheduler runs alongside the HTTP API.
pub async fn run_server(config: &Config, start_scheduler: bool) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let client = Arc::new(IliadClient::new(config)?);
    let state = AppState::new(config.clone(), pool, client)?;

    if start_scheduler || config.auto_upload.start_on_boot {
        state.scheduler.start();
    }

    let scheduler = state.scheduler.clone();
    let app = router(state);

    tracing::info!(bind = %bind_addr, "server listening");
    println!("iliad-bridge listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    scheduler.stop().await;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);
    let body_limit = state.config.server.max_upload_mb * 1024 * 1024;

    let api = Router::new()
        .route("/list-sources/", get(handle_list_sources))
        .route("/create-source/", post(handle_create_source))
        .route("/delete-source/{source}/", delete(handle_delete_source))
        .route("/list-documents/{source}/", get(handle_list_documents))
        .route(
            "/delete-document/{source}/{document_id}/",
            delete(handle_delete_document),
        )
        .route("/upload-document/{source}/", post(handle_upload_document))
        .route(
            "/check-upload-status/{source}/{task_id}/",
            get(handle_check_upload_status),
        )
        .route("/chat/{source}/", post(handle_chat))
        .route("/search/", post(handle_search))
        .route("/auto-upload/", post(handle_auto_upload))
        .route("/get-upload-status/", get(handle_get_upload_status))
        .route("/start-scheduler/", post(handle_start_scheduler))
        .route("/user-info/", get(handle_user_info))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_user));

    Router::new()
        .route("/health", get(handle_health))
        .merge(api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

// ============ Error response ============

/// Error that converts into a `{"error": "..."}` response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Relay a vendor status code, falling back to 502 for codes axum rejects.
    fn relayed(status: u16, message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            message,
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, message)
}

fn internal(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, message)
}

fn unexpected(err: impl std::fmt::Display) -> AppError {
    tracing::error!(error = %err, "unexpected error");
    internal("An unexpected error occurred")
}

/// Default mapping of vendor failures.
fn vendor_error(err: IliadError) -> AppError {
    match err {
        IliadError::Credentials(ref msg) => {
            tracing::error!(error = %msg, "decryption failed");
            internal("Failed to decrypt API key")
        }
        IliadError::Status { status, .. } => {
            tracing::warn!(status, body = err.body().unwrap_or_default(), "vendor request failed");
            AppError::relayed(
                status,
                format!("API request failed with status code: {}", status),
            )
        }
        other => unexpected(other),
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| {
            tracing::warn!(error = %e, "invalid JSON body");
            bad_request("Invalid JSON in request body")
        })
}

/// Reject path segments that would escape the vendor URL they are spliced into.
fn check_segment(value: &str, what: &str) -> Result<(), AppError> {
    if value.is_empty() || value.contains(['/', '?', '#', '\\']) || value == ".." {
        return Err(bad_request(format!("Invalid {}", what)));
    }
    Ok(())
}

/// Uploaded file names only become a multipart filename and a preview file,
/// so `#` and `?` are allowed. Anything that could leave the preview
/// directory is not.
fn check_file_name(value: &str) -> Result<(), AppError> {
    if value.is_empty() || value.contains(['/', '\\']) || value == ".." || value == "." {
        return Err(bad_request("Invalid file name"));
    }
    Ok(())
}

// ============ Authentication ============

/// Enforces the SSO identity header when `server.require_user` is set.
async fn require_user(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if state.config.server.require_user
        && header_str(request.headers(), &state.config.server.user_header).is_none()
    {
        return AppError::new(StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    next.run(request).await
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /user-info/ ============

async fn handle_user_info(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let server = &state.config.server;
    match header_str(&headers, &server.user_header) {
        Some(username) => Json(json!({
            "username": username,
            "email": header_str(&headers, &server.email_header).unwrap_or(""),
        }))
        .into_response(),
        None => Json(json!({ "is_authenticated": false })).into_response(),
    }
}

// ============ GET /list-sources/ ============

/// One row of the source listing, shared by vendor and local entries.
#[derive(Debug, Serialize, PartialEq, Eq)]
struct SourceView {
    name: String,
    visibility: String,
    model: String,
    created_at: String,
    updated_at: String,
}

const NOT_AVAILABLE: &str = "N/A";

/// Vendor timestamps arrive as `2024-09-11T11:37:00.123Z`; anything else is
/// shown verbatim.
fn format_vendor_date(value: Option<&str>) -> String {
    match value {
        None | Some(NOT_AVAILABLE) => NOT_AVAILABLE.to_string(),
        Some(raw) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.fZ")
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|_| raw.to_string()),
    }
}

fn external_view(name: &str, visibility: Visibility, details: Option<&Value>) -> SourceView {
    let field = |key: &str| details.and_then(|d| d.get(key)).and_then(Value::as_str);
    SourceView {
        name: name.to_string(),
        visibility: visibility.as_str().to_string(),
        model: field("embedding_model")
            .unwrap_or(NOT_AVAILABLE)
            .to_string(),
        created_at: format_vendor_date(field("created")),
        updated_at: format_vendor_date(field("edited")),
    }
}

fn local_view(source: &crate::models::Source) -> SourceView {
    let fmt = |dt: &DateTime<Utc>| dt.format("%Y-%m-%d %H:%M:%S").to_string();
    SourceView {
        name: source.name.clone(),
        visibility: source.visibility.as_str().to_string(),
        model: if source.model.is_empty() {
            NOT_AVAILABLE.to_string()
        } else {
            source.model.clone()
        },
        created_at: fmt(&source.created_at),
        updated_at: fmt(&source.updated_at),
    }
}

async fn external_views(
    client: &IliadClient,
    names: &[String],
    visibility: Visibility,
) -> Vec<SourceView> {
    let details = futures::future::join_all(names.iter().map(|name| async move {
        match client.source_details(name).await {
            Ok(details) => Some(details),
            Err(e) => {
                tracing::warn!(source = %name, error = %e, "no details for source");
                None
            }
        }
    }))
    .await;

    names
        .iter()
        .zip(details.iter())
        .map(|(name, d)| external_view(name, visibility, d.as_ref()))
        .collect()
}

async fn handle_list_sources(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let listing = state.client.list_sources().await.map_err(vendor_error)?;
    let prefix = state.config.iliad.source_prefix.as_str();
    let keep = |names: Vec<String>| -> Vec<String> {
        names.into_iter().filter(|n| n.starts_with(prefix)).collect()
    };
    let global = keep(listing.global_sources);
    let private = keep(listing.private_sources);

    let (external_global, external_private) = tokio::join!(
        external_views(&state.client, &global, Visibility::Global),
        external_views(&state.client, &private, Visibility::Private),
    );

    let local_global = catalog::list(&state.pool, Visibility::Global)
        .await
        .map_err(unexpected)?;
    let local_private = catalog::list(&state.pool, Visibility::Private)
        .await
        .map_err(unexpected)?;

    Ok(Json(json!({
        "external_sources": {
            "global": external_global,
            "private": external_private,
        },
        "global_sources": local_global.iter().map(local_view).collect::<Vec<_>>(),
        "private_sources": local_private.iter().map(local_view).collect::<Vec<_>>(),
    })))
}

// ============ POST /create-source/ ============

#[derive(Deserialize)]
struct CreateSourceRequest {
    source: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    visibility: Option<Visibility>,
    #[serde(default)]
    embedding_model: Option<String>,
}

async fn handle_create_source(
    State(state): State<AppState>,
    payload: Result<Json<CreateSourceRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let req = json_body(payload)?;
    let name = req.source.trim().to_string();
    check_segment(&name, "source")?;

    let model = req
        .embedding_model
        .unwrap_or_else(|| state.config.iliad.default_embedding_model.clone());
    let created = state
        .client
        .create_source(&name, req.description.as_deref(), &model)
        .await
        .map_err(vendor_error)?;

    catalog::upsert(
        &state.pool,
        &name,
        req.visibility.unwrap_or(Visibility::Private),
        &model,
        req.description.as_deref(),
    )
    .await
    .map_err(unexpected)?;

    tracing::info!(source = %name, "source created");
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

// ============ DELETE /delete-source/{source}/ ============

async fn handle_delete_source(
    State(state): State<AppState>,
    Path(source): Path<String>,
) -> Result<StatusCode, AppError> {
    check_segment(&source, "source")?;
    match state.client.delete_source(&source).await {
        Ok(()) => {
            catalog::remove(&state.pool, &source)
                .await
                .map_err(unexpected)?;
            tracing::info!(source = %source, "source deleted");
            Ok(StatusCode::NO_CONTENT)
        }
        Err(IliadError::Status { status, .. }) => {
            let message = match status {
                401 => "Unauthorized".to_string(),
                403 => "Forbidden".to_string(),
                404 => "Not Found".to_string(),
                422 => "Unprocessable Entity".to_string(),
                other => format!("Unexpected status code: {}", other),
            };
            Err(AppError::relayed(status, message))
        }
        Err(e) => Err(vendor_error(e)),
    }
}

// ============ GET /list-documents/{source}/ ============

async fn handle_list_documents(
    State(state): State<AppState>,
    Path(source): Path<String>,
) -> Result<Json<Value>, AppError> {
    check_segment(&source, "source")?;
    match state.client.list_documents(&source).await {
        Ok(documents) => Ok(Json(json!({ "documents": documents }))),
        Err(e) if e.is_credentials() => Err(vendor_error(e)),
        Err(e) => {
            tracing::error!(source = %source, error = %e, "failed to fetch documents");
            Err(internal("Failed to fetch documents"))
        }
    }
}

// ============ DELETE /delete-document/{source}/{document_id}/ ============

async fn handle_delete_document(
    State(state): State<AppState>,
    Path((source, document_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    check_segment(&source, "source")?;
    check_segment(&document_id, "document id")?;
    match state.client.delete_document(&source, &document_id).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(IliadError::Status { status, body, .. }) => Err(AppError::relayed(status, body)),
        Err(e @ IliadError::Credentials(_)) => Err(vendor_error(e)),
        Err(e) => Err(internal(e.to_string())),
    }
}

// ============ POST /upload-document/{source}/ ============

async fn handle_upload_document(
    State(state): State<AppState>,
    Path(source): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    check_segment(&source, "source")?;

    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| bad_request("file field has no filename"))?;
        check_file_name(&file_name)?;
        let bytes = field.bytes().await.map_err(|e| bad_request(e.body_text()))?;
        upload = Some((file_name, bytes.to_vec()));
        break;
    }
    let (file_name, bytes) = upload.ok_or_else(|| bad_request("Invalid request"))?;

    let result = state
        .pipeline
        .upload_manual(&source, &file_name, bytes)
        .await
        .map_err(|e| match e.downcast::<IliadError>() {
            Ok(vendor) => vendor_error(vendor),
            Err(other) => unexpected(format!("{:#}", other)),
        })?;

    tracing::info!(source = %source, file = %file_name, status = %result.status, "manual upload");
    Ok(Json(json!({
        "status": "success",
        "message": "Document uploaded successfully.",
        "upload_status": result.status,
        "task_id": result.task_id,
        "document_id": result.document_id,
        "preview_url": result.preview_url,
    })))
}

// ============ GET /check-upload-status/{source}/{task_id}/ ============

async fn handle_check_upload_status(
    State(state): State<AppState>,
    Path((source, task_id)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    check_segment(&source, "source")?;
    check_segment(&task_id, "task id")?;

    let status = match state.client.task_status(&source, &task_id).await {
        Ok(status) => status,
        Err(e) if e.is_credentials() => return Err(vendor_error(e)),
        Err(e) => {
            let message = e.to_string();
            return Ok(Json(json!({
                "status": "ERROR",
                "message": message,
                "full_response": { "error": message },
            })));
        }
    };

    let ledger_status = match status.state() {
        TaskState::Completed => Some(UploadStatus::Completed),
        TaskState::Failed => Some(UploadStatus::Failed),
        TaskState::Pending => None,
    };
    if let Some(s) = ledger_status {
        if let Err(e) = ledger::set_status_by_task(&state.pool, &task_id, s).await {
            tracing::warn!(task_id = %task_id, error = %e, "could not update upload record");
        }
    }

    let message = status
        .message
        .clone()
        .unwrap_or_else(|| format!("Upload status: {}", status.status));
    Ok(Json(json!({
        "status": status.status,
        "message": message,
        "full_response": status.full_response,
    })))
}

// ============ POST /chat/{source}/ ============

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    question: String,
    #[serde(default)]
    filters: Option<Value>,
    #[serde(default)]
    history: Vec<ChatMessage>,
}

/// The vendor takes filters as a JSON-encoded string.
fn encode_filters(filters: Option<Value>) -> String {
    match filters {
        None | Some(Value::Null) => "{}".to_string(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}

fn chat_reply(result: Result<RagAnswer, IliadError>) -> Result<RagAnswer, AppError> {
    let content = match result {
        Ok(answer) => return Ok(answer),
        Err(IliadError::Status { status: 404, .. }) => {
            "Sorry, no documents were found that match your query.".to_string()
        }
        Err(IliadError::Status { status: 422, body, .. }) => {
            tracing::error!(body = %body, "unprocessable chat request");
            "The request was poorly formatted and could not be processed.".to_string()
        }
        Err(IliadError::Status { status, .. }) => {
            format!("API request failed with status code: {}", status)
        }
        Err(e @ IliadError::Credentials(_)) => return Err(vendor_error(e)),
        Err(e) => {
            tracing::error!(error = %e, "chat request failed");
            return Err(internal(e.to_string()));
        }
    };
    Ok(RagAnswer {
        content,
        references: Vec::new(),
    })
}

async fn handle_chat(
    State(state): State<AppState>,
    Path(source): Path<String>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    check_segment(&source, "source")?;
    let req = json_body(payload)?;

    let mut messages = req.history;
    if !req.question.is_empty() {
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: req.question.clone(),
        });
    }
    let rag = RagRequest {
        messages,
        filters: encode_filters(req.filters),
        stream: Some(false),
    };

    let answer = chat_reply(state.client.rag(&source, &rag).await)?;
    Ok(Json(json!({
        "question": req.question,
        "response": answer,
        "history": rag.messages,
    })))
}

// ============ POST /search/ ============

#[derive(Deserialize)]
struct SearchRequest {
    #[serde(default)]
    question: String,
    #[serde(default)]
    mysource: String,
    #[serde(default)]
    filters: Option<Value>,
}

fn search_source(mysource: &str) -> Option<&'static str> {
    match mysource {
        "public" => Some("oad-public"),
        "internal" => Some("oad-internal"),
        _ => None,
    }
}

async fn handle_search(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let req = json_body(payload)?;
    let source = search_source(&req.mysource).ok_or_else(|| {
        tracing::warn!(mysource = %req.mysource, "invalid source");
        bad_request("Invalid source")
    })?;

    let rag = RagRequest {
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: req.question.clone(),
        }],
        filters: encode_filters(req.filters),
        stream: None,
    };

    let answer = match state.client.rag(source, &rag).await {
        Ok(answer) => answer,
        Err(IliadError::Status { status, .. }) => {
            return Err(internal(format!(
                "API request failed with status code: {}",
                status
            )))
        }
        Err(e @ IliadError::Credentials(_)) => return Err(vendor_error(e)),
        Err(e) => return Err(internal(e.to_string())),
    };

    Ok(Json(json!({ "question": req.question, "response": answer })))
}

// ============ POST /auto-upload/ ============

async fn handle_auto_upload(State(state): State<AppState>) -> Json<Value> {
    let poll = PollPolicy::on_request(&state.config.auto_upload);
    let report = state.pipeline.run_batch(poll).await;
    Json(json!({ "status": "success", "data": report }))
}

// ============ GET /get-upload-status/ ============

#[derive(Debug, Serialize)]
struct UploadDetail {
    file_name: String,
    source: Option<String>,
    status: String,
    task_id: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    preview_url: Option<String>,
}

async fn handle_get_upload_status(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let records = ledger::latest(&state.pool, state.config.auto_upload.history_limit)
        .await
        .map_err(unexpected)?;
    let previews = state.pipeline.previews();
    let preview_files = previews.list().map_err(unexpected)?;

    // Previews are matched against the whole ledger, not the listed window
    let mut known: HashSet<String> = HashSet::new();
    for (file_name, source) in ledger::uploaded_files(&state.pool)
        .await
        .map_err(unexpected)?
    {
        known.insert(PreviewStore::preview_name(&source, &file_name));
        known.insert(file_name);
    }

    let mut details: Vec<UploadDetail> = Vec::with_capacity(records.len());
    for r in records {
        details.push(UploadDetail {
            file_name: r.file_name,
            source: Some(r.source),
            status: r.status.to_string(),
            task_id: r.task_id,
            timestamp: Some(r.timestamp),
            preview_url: r.preview_url,
        });
    }

    for name in preview_files {
        if known.contains(&name) {
            continue;
        }
        details.push(UploadDetail {
            preview_url: Some(previews.url_for(&name)),
            file_name: name,
            source: None,
            status: "NOT UPLOADED".to_string(),
            task_id: None,
            timestamp: None,
        });
    }

    let scheduler = state.scheduler.status();
    Ok(Json(json!({
        "status": "success",
        "scheduler_status": scheduler.label(),
        "scheduler": scheduler,
        "upload_details": details,
    })))
}

// ============ POST /start-scheduler/ ============

async fn handle_start_scheduler(State(state): State<AppState>) -> Json<Value> {
    let message = if state.scheduler.start() {
        "Scheduler started"
    } else {
        "Scheduler already running"
    };
    Json(json!({
        "status": "success",
        "message": message,
        "scheduler": state.scheduler.status(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_dates_are_reformatted() {
        assert_eq!(
            format_vendor_date(Some("2024-09-11T11:37:05.123456Z")),
            "2024-09-11 11:37:05"
        );
        assert_eq!(format_vendor_date(Some("yesterday")), "yesterday");
        assert_eq!(format_vendor_date(None), "N/A");
    }

    #[test]
    fn missing_details_render_as_not_available() {
        let view = external_view("oad-x", Visibility::Global, None);
        assert_eq!(view.model, "N/A");
        assert_eq!(view.created_at, "N/A");
        assert_eq!(view.visibility, "global");

        let details = json!({"embedding_model": "ada", "created": "2024-01-02T03:04:05.000Z"});
        let view = external_view("oad-x", Visibility::Private, Some(&details));
        assert_eq!(view.model, "ada");
        assert_eq!(view.created_at, "2024-01-02 03:04:05");
        assert_eq!(view.updated_at, "N/A");
    }

    #[test]
    fn filters_are_sent_as_strings() {
        assert_eq!(encode_filters(None), "{}");
        assert_eq!(encode_filters(Some(json!("{\"a\":1}"))), "{\"a\":1}");
        assert_eq!(encode_filters(Some(json!({"a": 1}))), "{\"a\":1}");
    }

    #[test]
    fn search_maps_public_and_internal() {
        assert_eq!(search_source("public"), Some("oad-public"));
        assert_eq!(search_source("internal"), Some("oad-internal"));
        assert_eq!(search_source("secret"), None);
    }

    #[test]
    fn chat_reply_explains_vendor_failures() {
        let not_found = chat_reply(Err(IliadError::Status {
            url: "u".into(),
            status: 404,
            body: String::new(),
        }))
        .unwrap();
        assert!(not_found.content.starts_with("Sorry, no documents"));

        let other = chat_reply(Err(IliadError::Status {
            url: "u".into(),
            status: 503,
            body: String::new(),
        }))
        .unwrap();
        assert_eq!(other.content, "API request failed with status code: 503");

        let creds = chat_reply(Err(IliadError::Credentials("bad".into()))).unwrap_err();
        assert_eq!(creds.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(creds.message, "Failed to decrypt API key");
    }

    #[test]
    fn path_segments_are_checked() {
        assert!(check_segment("oad-public", "source").is_ok());
        assert!(check_segment("a/b", "source").is_err());
        assert!(check_segment("..", "source").is_err());
        assert!(check_segment("", "source").is_err());
        assert!(check_segment("oad#public", "source").is_err());
    }

    #[test]
    fn file_names_may_carry_routing_separators() {
        assert!(check_file_name("oad#public#guide.pdf").is_ok());
        assert!(check_file_name("what?.pdf").is_ok());
        assert!(check_file_name("../etc/passwd").is_err());
        assert!(check_file_name("a\\b.pdf").is_err());
        assert!(check_file_name("..").is_err());
        assert!(check_file_name("").is_err());
    }
}
