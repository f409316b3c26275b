//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Form fields | Response |
//! |--------|------|-------------|----------|
//! | `GET`  | `/health` | | `{status, service, version}` |
//! | `POST` | `/analyze` | `file` | metadata object |
//! | `POST` | `/compare` | `reference`, `actual` | `{rows, session_id}` |
//! | `POST` | `/chat/index` | `files`…, `session_id`, `use_session_dirs`, `chunk_size`, `chunk_overlap`, `k` | `{session_id, k, use_session_dirs}` |
//! | `POST` | `/chat/query` | `query` (alias `question`), `session_id`, `use_session_dirs`, `k` | `{answer, session_id, k, engine}` |
//!
//! All `POST` routes take `multipart/form-data`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "FAISS index not found at: faiss_index/abc" } }
//! ```
//!
//! Invalid input and ingestion failures are 400, a missing session index is
//! 404, everything else is 500. The message is the full error chain.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::analyzer::{DocumentAnalyzer, DocumentHandler};
use crate::compare::DocumentComparator;
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{ErrorKind, PortalError};
use crate::ingest::{DocumentIngestor, IngestOptions};
use crate::llm::ChatModel;
use crate::models::{ComparisonRow, Metadata, UploadedFile};
use crate::rag::ConversationalRag;
use crate::session::validate_session_id;

/// Upper bound on a multipart request body.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

const ENGINE: &str = "conversational-rag";

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub llm: Arc<dyn ChatModel>,
    pub embedder: Arc<dyn EmbeddingProvider>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        llm: Arc<dyn ChatModel>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            config,
            llm,
            embedder,
        }
    }
}

/// Builds the router with CORS and request tracing applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/analyze", post(handle_analyze))
        .route("/compare", post(handle_compare))
        .route("/chat/index", post(handle_chat_index))
        .route("/chat/query", post(handle_chat_query))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds to `server.bind` and serves until the process is stopped.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "Document portal listening");
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

impl From<PortalError> for AppError {
    fn from(err: PortalError) -> Self {
        let (status, code) = match err.kind() {
            ErrorKind::InvalidInput => (StatusCode::BAD_REQUEST, "bad_request"),
            ErrorKind::Ingestion => (StatusCode::BAD_REQUEST, "ingestion_error"),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ErrorKind::Parse => (StatusCode::INTERNAL_SERVER_ERROR, "parse_error"),
            ErrorKind::Model => (StatusCode::INTERNAL_SERVER_ERROR, "model_error"),
            ErrorKind::Config => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
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

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ Multipart form ============

/// A fully buffered multipart form: file parts by field name plus text fields.
#[derive(Default)]
struct Form {
    files: Vec<(String, UploadedFile)>,
    fields: HashMap<String, String>,
}

impl Form {
    async fn read(mut multipart: Multipart) -> Result<Form, AppError> {
        let mut form = Form::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| bad_request(format!("failed to read '{}': {}", name, e)))?;
                    form.files.push((name, UploadedFile::new(file_name, bytes.to_vec())));
                }
                None => {
                    let value = field
                        .text()
                        .await
                        .map_err(|e| bad_request(format!("failed to read '{}': {}", name, e)))?;
                    form.fields.insert(name, value);
                }
            }
        }
        Ok(form)
    }

    fn take_file(&mut self, name: &str) -> Result<UploadedFile, AppError> {
        let pos = self
            .files
            .iter()
            .position(|(field, _)| field == name)
            .ok_or_else(|| bad_request(format!("missing file field '{}'", name)))?;
        Ok(self.files.remove(pos).1)
    }

    fn take_files(&mut self, name: &str) -> Vec<UploadedFile> {
        let (matching, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.files)
            .into_iter()
            .partition(|(field, _)| field == name);
        self.files = rest;
        matching.into_iter().map(|(_, file)| file).collect()
    }

    fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn usize_or(&self, name: &str, default: usize) -> Result<usize, AppError> {
        match self.text(name) {
            Some(v) => v
                .parse()
                .map_err(|_| bad_request(format!("'{}' must be a non-negative integer", name))),
            None => Ok(default),
        }
    }

    fn bool_or(&self, name: &str, default: bool) -> Result<bool, AppError> {
        match self.text(name).map(str::to_ascii_lowercase).as_deref() {
            None => Ok(default),
            Some("true" | "1" | "yes" | "on") => Ok(true),
            Some("false" | "0" | "no" | "off") => Ok(false),
            Some(_) => Err(bad_request(format!("'{}' must be a boolean", name))),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    tracing::info!("Health check passed");
    Json(HealthResponse {
        status: "ok",
        service: "document-portal",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ POST /analyze ============

async fn handle_analyze(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Metadata>, AppError> {
    let mut form = Form::read(multipart).await?;
    let file = form.take_file("file")?;

    let analysis_dir = state.config.storage.analysis_dir.clone();
    let text = tokio::task::spawn_blocking(move || {
        let handler = DocumentHandler::new(&analysis_dir, None)?;
        let path = handler.save_pdf(&file)?;
        handler.read_pdf(&path)
    })
    .await
    .map_err(|e| internal(format!("analysis task failed: {}", e)))?
    .map_err(|e| e.context("Analysis failed"))?;

    let metadata = DocumentAnalyzer::new(state.llm.clone())
        .analyze(&text)
        .await
        .map_err(|e| e.context("Analysis failed"))?;
    Ok(Json(metadata))
}

// ============ POST /compare ============

#[derive(Serialize)]
struct CompareResponse {
    rows: Vec<ComparisonRow>,
    session_id: String,
}

async fn handle_compare(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<CompareResponse>, AppError> {
    let mut form = Form::read(multipart).await?;
    let reference = form.take_file("reference")?;
    let actual = form.take_file("actual")?;

    let storage = &state.config.storage;
    let comparator = DocumentComparator::new(
        state.llm.clone(),
        storage.compare_dir.clone(),
        storage.compare_keep_latest,
    );
    let (rows, session_id) = comparator
        .compare(&reference, &actual)
        .await
        .map_err(|e| e.context("Comparison failed"))?;
    Ok(Json(CompareResponse { rows, session_id }))
}

// ============ POST /chat/index ============

#[derive(Serialize)]
struct IndexResponse {
    session_id: String,
    k: usize,
    use_session_dirs: bool,
}

async fn handle_chat_index(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<IndexResponse>, AppError> {
    let mut form = Form::read(multipart).await?;
    let files = form.take_files("files");
    if files.is_empty() {
        return Err(bad_request("at least one file is required in 'files'"));
    }

    let defaults = IngestOptions::from_config(&state.config);
    let options = IngestOptions {
        chunk_size: form.usize_or("chunk_size", defaults.chunk_size)?,
        chunk_overlap: form.usize_or("chunk_overlap", defaults.chunk_overlap)?,
        k: form.usize_or("k", defaults.k)?,
        use_session_dirs: form.bool_or("use_session_dirs", true)?,
    };

    let ingestor = DocumentIngestor::new(
        &state.config.storage,
        state.embedder.clone(),
        form.text("session_id"),
        options.clone(),
    )?;
    ingestor
        .ingest(&files)
        .await
        .map_err(|e| e.context("Indexing failed"))?;

    Ok(Json(IndexResponse {
        session_id: ingestor.session_id().to_string(),
        k: options.k,
        use_session_dirs: options.use_session_dirs,
    }))
}

// ============ POST /chat/query ============

#[derive(Serialize)]
struct QueryResponse {
    answer: String,
    session_id: Option<String>,
    k: usize,
    engine: &'static str,
}

async fn handle_chat_query(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<QueryResponse>, AppError> {
    let form = Form::read(multipart).await?;
    let question = form
        .text("query")
        .or_else(|| form.text("question"))
        .ok_or_else(|| bad_request("'query' must not be empty"))?
        .to_string();
    let session_id = form.text("session_id").map(str::to_string);
    let use_session_dirs = form.bool_or("use_session_dirs", true)?;
    let k = form.usize_or("k", state.config.retriever.top_k)?;

    let storage = &state.config.storage;
    let index_dir: PathBuf = if use_session_dirs {
        let id = session_id
            .as_deref()
            .ok_or_else(|| bad_request("session_id is required when use_session_dirs=true"))?;
        validate_session_id(id)?;
        storage.index_base.join(id)
    } else {
        storage.index_base.clone()
    };
    if !index_dir.is_dir() {
        return Err(not_found(format!(
            "FAISS index not found at: {}",
            index_dir.display()
        )));
    }

    let (search_type, search_kwargs) = state.config.retriever.search(k)?;

    let mut rag = ConversationalRag::new(session_id.clone(), state.llm.clone(), state.embedder.clone());
    rag.load_retriever_from_index(&index_dir, k, &storage.index_name, search_type, Some(search_kwargs))
        .await
        .map_err(|e| e.context("Query failed"))?;
    let answer = rag
        .invoke(&question, &[])
        .await
        .map_err(|e| e.context("Query failed"))?;

    Ok(Json(QueryResponse {
        answer,
        session_id,
        k,
        engine: ENGINE,
    }))
}
