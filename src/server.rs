//! JSON HTTP API over the retrieval pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `GET`    | `/stats` | Index statistics |
//! | `POST`   | `/search` | Hybrid retrieval, full score breakdown |
//! | `POST`   | `/context` | Budgeted context with citations |
//! | `POST`   | `/index` | Index inline documents or the configured source |
//! | `POST`   | `/reindex` | Rebuild every document's chunks and embeddings |
//! | `POST`   | `/approve` | Feed approved output (or a reply) back into the index |
//! | `POST`   | `/approve/backfill` | Index recorded approvals not indexed yet |
//! | `DELETE` | `/documents/{id}` | Remove a document and its chunks |
//! | `GET`    | `/log` | Recent retrieval log entries |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "text must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use hybrid_rag_core::context::ContextResponse;
use hybrid_rag_core::error::{IndexError, RetrievalError};
use hybrid_rag_core::feedback::{ApprovedItem, REPLY_TAG};
use hybrid_rag_core::indexer::{BulkReport, IndexOutcome};
use hybrid_rag_core::models::{Document, IndexStats, RetrievalLogEntry, SourceKind};
use hybrid_rag_core::retriever::RetrievalResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::ingest::index_source;
use crate::pipeline::Pipeline;
use crate::sources::FilesystemSource;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pipeline: Pipeline,
}

/// Build the router. Exposed so tests can serve it on an ephemeral port.
pub fn router(config: &Config, pipeline: Pipeline) -> Router {
    let state = AppState {
        config: Arc::new(config.clone()),
        pipeline,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .route("/search", post(handle_search))
        .route("/context", post(handle_context))
        .route("/index", post(handle_index))
        .route("/reindex", post(handle_reindex))
        .route("/approve", post(handle_approve))
        .route("/approve/backfill", post(handle_backfill))
        .route("/documents/{id}", delete(handle_delete))
        .route("/log", get(handle_log))
        .layer(cors)
        .with_state(state)
}

/// Binds to `[server].bind` and serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let app = router(config, pipeline);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "server listening");
    println!("Listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
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

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    let message = message.into();
    tracing::error!(%message, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message,
    }
}

impl From<IndexError> for AppError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::InvalidDocument(msg) => bad_request(msg),
            other => internal(other.to_string()),
        }
    }
}

impl From<RetrievalError> for AppError {
    fn from(err: RetrievalError) -> Self {
        internal(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        internal(format!("{:#}", err))
    }
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

// ============ GET /stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<IndexStats>, AppError> {
    Ok(Json(state.pipeline.indexes.stats().await?))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    score_threshold: Option<f64>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<RetrievalResult>, AppError> {
    let settings = state.pipeline.retriever.settings();
    let top_k = req.top_k.unwrap_or(settings.top_k);
    if top_k == 0 {
        return Err(bad_request("top_k must be > 0"));
    }
    let threshold = req.score_threshold.unwrap_or(settings.score_threshold);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(bad_request("score_threshold must be within [0, 1]"));
    }

    let result = state
        .pipeline
        .retriever
        .search_with(&req.query, top_k, threshold)
        .await?;
    Ok(Json(result))
}

// ============ POST /context ============

#[derive(Deserialize)]
struct ContextRequest {
    query: String,
    /// Head each span with `[Relevance: x.xx]`.
    #[serde(default)]
    show_scores: bool,
}

async fn handle_context(
    State(state): State<AppState>,
    Json(req): Json<ContextRequest>,
) -> Result<Json<ContextResponse>, AppError> {
    let result = state.pipeline.retriever.search(&req.query).await?;
    let context = &state.pipeline.context;
    Ok(Json(if req.show_scores {
        context.respond_with_scores(&result)
    } else {
        context.respond(&result)
    }))
}

// ============ POST /index ============

#[derive(Deserialize)]
struct DocumentInput {
    id: String,
    text: String,
    #[serde(default)]
    origin_ref: Option<String>,
    #[serde(default)]
    updated_at: Option<i64>,
}

/// Either inline `documents`, or `"source": true` for `[sources.filesystem]`.
#[derive(Deserialize)]
struct IndexRequest {
    #[serde(default)]
    documents: Vec<DocumentInput>,
    #[serde(default)]
    source: bool,
}

#[derive(Serialize)]
struct IndexResponse {
    indexed: usize,
    unchanged: usize,
    failed: usize,
    #[serde(flatten)]
    report: BulkReport,
}

async fn handle_index(
    State(state): State<AppState>,
    Json(req): Json<IndexRequest>,
) -> Result<Json<IndexResponse>, AppError> {
    let report = if req.source {
        let Some(fs) = &state.config.sources.filesystem else {
            return Err(bad_request("no [sources.filesystem] configured"));
        };
        index_source(&state.pipeline, &FilesystemSource::new(fs.clone())).await?
    } else {
        if req.documents.is_empty() {
            return Err(bad_request("documents must not be empty"));
        }
        let now = chrono::Utc::now().timestamp();
        let docs: Vec<Document> = req
            .documents
            .into_iter()
            .map(|d| Document {
                origin_ref: d.origin_ref.unwrap_or_else(|| d.id.clone()),
                id: d.id,
                source_kind: SourceKind::Source,
                text: d.text,
                updated_at: d.updated_at.unwrap_or(now),
                provenance: None,
            })
            .collect();
        state.pipeline.indexer.index_bulk(&docs).await
    };

    Ok(Json(IndexResponse::from(report)))
}

impl From<BulkReport> for IndexResponse {
    fn from(report: BulkReport) -> Self {
        Self {
            indexed: report.indexed(),
            unchanged: report.unchanged(),
            failed: report.failures.len(),
            report,
        }
    }
}

// ============ POST /reindex ============

async fn handle_reindex(State(state): State<AppState>) -> Result<Json<IndexResponse>, AppError> {
    let report = state.pipeline.indexer.reindex_all().await?;
    Ok(Json(IndexResponse::from(report)))
}

// ============ POST /approve ============

/// Plain approval, or a reply when `reply` is set or `parent_text` given.
#[derive(Deserialize)]
struct ApproveRequest {
    text: String,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    reply: bool,
    #[serde(default)]
    parent_text: Option<String>,
}

#[derive(Serialize)]
struct ApproveResponse {
    document_id: String,
    outcome: IndexOutcome,
}

async fn handle_approve(
    State(state): State<AppState>,
    Json(req): Json<ApproveRequest>,
) -> Result<Json<ApproveResponse>, AppError> {
    let feedback = &state.pipeline.feedback;
    let approved = if req.reply || req.parent_text.is_some() {
        let tag = req.tag.as_deref().unwrap_or(REPLY_TAG);
        feedback
            .on_approved_reply(&req.text, req.parent_text.as_deref(), tag)
            .await?
    } else {
        feedback
            .on_approved(&req.text, req.tag.as_deref().unwrap_or_default())
            .await?
    };
    Ok(Json(ApproveResponse {
        document_id: approved.document_id,
        outcome: approved.outcome,
    }))
}

// ============ POST /approve/backfill ============

#[derive(Deserialize)]
struct BackfillRequest {
    items: Vec<ApprovedItem>,
}

async fn handle_backfill(
    State(state): State<AppState>,
    Json(req): Json<BackfillRequest>,
) -> Result<Json<IndexResponse>, AppError> {
    let report = state.pipeline.feedback.backfill(&req.items).await?;
    Ok(Json(IndexResponse::from(report)))
}

// ============ DELETE /documents/{id} ============

async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if state.pipeline.indexer.remove_document(&id).await? {
        Ok(Json(serde_json::json!({ "removed": id })))
    } else {
        Err(not_found(format!("document not found: {}", id)))
    }
}

// ============ GET /log ============

#[derive(Deserialize)]
struct LogParams {
    #[serde(default = "default_log_limit")]
    limit: usize,
}

fn default_log_limit() -> usize {
    20
}

async fn handle_log(
    State(state): State<AppState>,
    Query(params): Query<LogParams>,
) -> Result<Json<Vec<RetrievalLogEntry>>, AppError> {
    Ok(Json(state.pipeline.log.recent(params.limit.min(1000)).await?))
}
