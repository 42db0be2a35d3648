//! HTTP API server.
//!
//! Exposes the upload, document management, and chat endpoints over JSON.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/docs/upload` | Multipart upload → `202` + `processing` document |
//! | `GET`  | `/api/docs` | Caller's documents, newest first |
//! | `GET`  | `/api/docs/{id}` | Single document |
//! | `DELETE` | `/api/docs/{id}` | Delete document and all its chunks |
//! | `POST` | `/api/chat` | Answer a query from the caller's documents |
//!
//! Identity arrives as the `x-owner-id` header (session issuance lives in a
//! separate service); a per-request model credential arrives as `x-api-key`
//! and takes precedence over the configured server key.
//!
//! # Error Contract
//!
//! All error responses have the shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "no file uploaded" } }
//! ```
//!
//! Codes: `bad_request` (400), `missing_credential` (401), `not_found` (404),
//! `search_failed` (502), `internal` (500).
//!
//! Upload responses are accepted before the ingestion pipeline completes;
//! processing failures surface later through the document's `error` status,
//! never as a failed upload request.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::chat::{ChatParams, ChatPipeline};
use crate::completion::HttpCompletionProvider;
use crate::config::Config;
use crate::db;
use crate::error::{ChatError, IngestError};
use crate::extraction::HttpExtractor;
use crate::ingest::{IngestPipeline, UploadRequest};
use crate::models::{DocStatus, Document, SourceType};
use crate::store::sqlite::SqliteStore;
use crate::store::DocumentStore;
use crate::vector_index::HttpVectorIndex;

/// Uploads larger than this are rejected by the extractor anyway.
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Owner attributed to requests without an `x-owner-id` header.
const DEFAULT_OWNER: &str = "local";

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    docs: Arc<dyn DocumentStore>,
    ingest: Arc<IngestPipeline>,
    chat: Arc<ChatPipeline>,
}

/// Starts the HTTP API server.
///
/// Binds to `[server].bind` and serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(&config.db).await?;
    let store = Arc::new(SqliteStore::new(pool));

    let extractor = Arc::new(HttpExtractor::new(&config.services)?);
    let index = Arc::new(HttpVectorIndex::new(&config.services)?);
    let completion = Arc::new(HttpCompletionProvider::new(&config.services)?);

    let ingest = Arc::new(IngestPipeline::new(
        store.clone(),
        store.clone(),
        extractor,
        index.clone(),
    ));
    let chat = Arc::new(ChatPipeline::new(
        store.clone(),
        index,
        completion,
        ChatParams::from_config(config),
    ));

    let state = AppState {
        docs: store,
        ingest,
        chat,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/api/docs/upload", post(handle_upload))
        .route("/api/docs", get(handle_list_docs))
        .route("/api/docs/{id}", get(handle_get_doc).delete(handle_delete_doc))
        .route("/api/chat", post(handle_chat))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state);

    tracing::info!(bind = %config.server.bind, "API server starting");
    println!("docchat API listening on http://{}", config.server.bind);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn owner_id(headers: &HeaderMap) -> String {
    headers
        .get("x-owner-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_OWNER)
        .to_string()
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn missing_credential(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "missing_credential".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn search_failed(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "search_failed".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

fn ingest_error(err: IngestError) -> AppError {
    match err {
        IngestError::EmptyFile | IngestError::UnknownSourceType(_) => bad_request(err.to_string()),
        IngestError::Store(e) => {
            tracing::error!(error = %e, "upload storage failure");
            internal("failed to store document")
        }
    }
}

fn chat_error(err: ChatError) -> AppError {
    match err {
        ChatError::EmptyQuery => bad_request(err.to_string()),
        ChatError::MissingCredential => missing_credential(err.to_string()),
        ChatError::Search(e) => {
            tracing::warn!(error = %e, "chat search failure");
            search_failed(e.to_string())
        }
        ChatError::Store(e) => {
            tracing::error!(error = %e, "chat storage failure");
            internal("failed to load retrieved chunks")
        }
    }
}

// ============ Document body ============

/// JSON shape of a document in API responses.
#[derive(Serialize)]
struct DocumentBody {
    id: String,
    title: String,
    original_filename: String,
    source_type: SourceType,
    page_count: i64,
    metadata: std::collections::BTreeMap<String, String>,
    tags: Vec<String>,
    uploaded_at: String,
    status: DocStatus,
}

impl From<&Document> for DocumentBody {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            title: doc.title.clone(),
            original_filename: doc.original_filename.clone(),
            source_type: doc.source_type,
            page_count: doc.page_count,
            metadata: doc.metadata.clone(),
            tags: doc.tags.clone(),
            uploaded_at: format_ts_iso(doc.uploaded_at),
            status: doc.status,
        }
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
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

// ============ POST /api/docs/upload ============

/// Accepts a multipart upload (`file`, optional `title` and `source_type`),
/// creates the `processing` record, and spawns the rest of the pipeline.
/// The response never waits for extraction or indexing; a disconnecting
/// client cannot strand the document short of a terminal status.
async fn handle_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<DocumentBody>), AppError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut title: Option<String> = None;
    let mut source_type: Option<SourceType> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("failed to read file field: {}", e)))?;
                file = Some((filename, data.to_vec()));
            }
            "title" => {
                title = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| bad_request(format!("invalid title field: {}", e)))?,
                );
            }
            "source_type" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("invalid source_type field: {}", e)))?;
                source_type = Some(
                    SourceType::parse(&raw)
                        .ok_or_else(|| bad_request(format!("unknown source_type: {}", raw)))?,
                );
            }
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or_else(|| bad_request("no file uploaded"))?;

    let req = UploadRequest {
        owner_id: owner_id(&headers),
        file: bytes,
        filename,
        title,
        source_type,
    };

    let doc = state.ingest.accept(&req).await.map_err(ingest_error)?;
    let body = DocumentBody::from(&doc);

    let pipeline = state.ingest.clone();
    tokio::spawn(async move {
        pipeline.process(&doc, req.file).await;
    });

    Ok((StatusCode::ACCEPTED, Json(body)))
}

// ============ GET /api/docs ============

async fn handle_list_docs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<DocumentBody>>, AppError> {
    let docs = state
        .docs
        .list(&owner_id(&headers))
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(docs.iter().map(DocumentBody::from).collect()))
}

// ============ GET /api/docs/{id} ============

async fn handle_get_doc(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<DocumentBody>, AppError> {
    let doc = fetch_owned_doc(&state, &headers, &id).await?;
    Ok(Json(DocumentBody::from(&doc)))
}

// ============ DELETE /api/docs/{id} ============

async fn handle_delete_doc(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    fetch_owned_doc(&state, &headers, &id).await?;

    state
        .ingest
        .delete_document(&id)
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(serde_json::json!({ "message": "Document removed" })))
}

/// Look up a document and verify ownership; unowned ids read as absent.
async fn fetch_owned_doc(
    state: &AppState,
    headers: &HeaderMap,
    id: &str,
) -> Result<Document, AppError> {
    let doc = state
        .docs
        .get(id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .filter(|d| d.owner_id == owner_id(headers))
        .ok_or_else(|| not_found("Document not found"))?;

    Ok(doc)
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
struct ChatRequest {
    query: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Json<crate::models::ChatAnswer>, AppError> {
    let user_key = headers.get("x-api-key").and_then(|v| v.to_str().ok());

    let answer = state
        .chat
        .answer(&req.query, user_key)
        .await
        .map_err(chat_error)?;

    Ok(Json(answer))
}
