//! HTTP surface for the web UI.
//!
//! JSON endpoints over the shared [`App`] context, plus the streaming
//! query endpoint which emits newline-delimited `data: {...}` events:
//! one metadata event, then text chunks, then one `done` or `error` event.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/status` | Document count and engine reachability |
//! | `GET`  | `/models` | List models with running/trained classification |
//! | `POST` | `/models/select` | Select the process-wide default model |
//! | `POST` | `/models/{name}/start` | Load a model |
//! | `POST` | `/models/{name}/stop` | Unload a model |
//! | `DELETE` | `/models/{name}/delete` | Delete a model |
//! | `POST` | `/models/pull` | Download a model |
//! | `GET`  | `/models/stats` | Aggregate model statistics |
//! | `POST` | `/models/cleanup-orphaned-files` | Remove stale training artifacts |
//! | `POST` | `/train-ollama` | Build a fine-tuning package and register it |
//! | `POST` | `/query-with-model-stream` | Streaming query (`data:` events) |
//! | `POST` | `/query-with-model` | Collected (non-streaming) query |
//! | `POST` | `/tools/*` | Standalone file tools (find-latest-file, list-files, search-files, grep-content, get-file-content, get-file-info) |
//! | `GET`  | `/document/{*filename}` | Full document content |
//! | `GET`  | `/behaviors` | List behavior profiles |
//! | `POST` | `/behaviors/select` | Select a behavior profile |
//! | `GET`  | `/personality` | Current behavior prompt |
//! | `POST` | `/personality/reload` | Re-read the selected profile |
//! | `POST` | `/knowledge-base/reload` | Rescan the document tree |
//!
//! # Error contract
//!
//! ```json
//! { "error": { "code": "start_timeout", "message": "model 'x' did not start within 60s" } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support the
//! browser-based UI.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::app::App;
use crate::error::Error;
use crate::orchestrator::QueryRequest;
use crate::trainer::TrainRequest;

type AppState = Arc<App>;

/// Start the HTTP server on the configured bind address. Runs until the
/// process is terminated.
pub async fn run_server(app: Arc<App>) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();

    if app.config.engine.preload_model {
        app.preload_default_model();
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/models", get(handle_list_models))
        .route("/models/select", post(handle_select_model))
        .route("/models/{name}/start", post(handle_start_model))
        .route("/models/{name}/stop", post(handle_stop_model))
        .route("/models/{name}/delete", delete(handle_delete_model))
        .route("/models/pull", post(handle_pull_model))
        .route("/models/stats", get(handle_model_stats))
        .route(
            "/models/cleanup-orphaned-files",
            post(handle_cleanup_orphaned_files),
        )
        .route("/train-ollama", post(handle_train))
        .route("/query-with-model-stream", post(handle_query_stream))
        .route("/query-with-model", post(handle_query))
        .route("/tools/find-latest-file", post(handle_tool_find_latest))
        .route("/tools/list-files", post(handle_tool_list_files))
        .route("/tools/search-files", post(handle_tool_search_files))
        .route("/tools/grep-content", post(handle_tool_grep_content))
        .route("/tools/get-file-content", post(handle_tool_get_content))
        .route("/tools/get-file-info", post(handle_tool_get_info))
        .route("/document/{*filename}", get(handle_get_document))
        .route("/behaviors", get(handle_list_behaviors))
        .route("/behaviors/select", post(handle_select_behavior))
        .route("/personality", get(handle_get_personality))
        .route("/personality/reload", post(handle_reload_personality))
        .route("/knowledge-base/reload", post(handle_reload_knowledge_base))
        .layer(cors)
        .with_state(app);

    info!(addr = %bind_addr, "server listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

// ============ Error response ============

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::InvalidSelection { .. } | Error::NoTrainableContent { .. } => {
                StatusCode::BAD_REQUEST
            }
            Error::EngineUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::StartTimeout { .. } | Error::StopTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::Engine { .. } | Error::TrainingEngineFailure { .. } => StatusCode::BAD_GATEWAY,
            Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal".to_string(),
            message: e.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = json!({ "error": { "code": self.code, "message": self.message } });
        (self.status, Json(body)).into_response()
    }
}

// ============ Health and status ============

async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn handle_status(State(app): State<AppState>) -> Json<serde_json::Value> {
    let engine_reachable = app.registry.list_models().await.map(|l| !l.stale).unwrap_or(false);
    Json(json!({
        "status": "running",
        "documents_loaded": app.store.snapshot().len(),
        "files_loaded": app.store.file_count(),
        "engine_reachable": engine_reachable,
        "selected_model": app.lifecycle.selected_model(),
    }))
}

// ============ Models ============

async fn handle_list_models(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let listing = app.registry.list_models().await?;
    Ok(Json(json!({
        "success": true,
        "models": listing.models,
        "stale": listing.stale,
    })))
}

#[derive(Deserialize)]
struct SelectModelBody {
    model_name: String,
}

async fn handle_select_model(
    State(app): State<AppState>,
    Json(body): Json<SelectModelBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    app.lifecycle.select(&body.model_name).await?;
    Ok(Json(json!({ "success": true, "selected_model": body.model_name })))
}

async fn handle_start_model(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    app.lifecycle.start(&name).await?;
    Ok(Json(json!({
        "success": true,
        "model": name,
        "state": app.lifecycle.state_of(&name),
    })))
}

async fn handle_stop_model(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    app.lifecycle.stop(&name).await?;
    Ok(Json(json!({
        "success": true,
        "model": name,
        "state": app.lifecycle.state_of(&name),
    })))
}

async fn handle_delete_model(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    app.lifecycle.delete(&name).await?;
    Ok(Json(json!({ "success": true, "model": name })))
}

#[derive(Deserialize)]
struct PullModelBody {
    model_name: String,
}

async fn handle_pull_model(
    State(app): State<AppState>,
    Json(body): Json<PullModelBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    app.engine.pull(&body.model_name).await?;
    app.registry.invalidate();
    Ok(Json(json!({ "success": true, "model": body.model_name })))
}

async fn handle_model_stats(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let listing = app.registry.list_models().await?;
    let total_size: u64 = listing.models.iter().map(|m| m.size_bytes).sum();
    let models: Vec<serde_json::Value> = listing
        .models
        .iter()
        .map(|m| {
            json!({
                "name": m.name,
                "size_mb": (m.size_bytes as f64 / (1024.0 * 1024.0) * 10.0).round() / 10.0,
                "is_running": m.is_running,
                "is_trained": m.is_trained,
                "description": m.description,
            })
        })
        .collect();

    Ok(Json(json!({
        "total_models": listing.models.len(),
        "running_models": listing.models.iter().filter(|m| m.is_running).count(),
        "trained_models": listing.models.iter().filter(|m| m.is_trained).count(),
        "total_size_bytes": total_size,
        "total_size_gb": (total_size as f64 / (1024.0_f64.powi(3)) * 100.0).round() / 100.0,
        "selected_model": app.lifecycle.selected_model(),
        "available_models": models,
    })))
}

async fn handle_cleanup_orphaned_files(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let removed = app.trainer.cleanup_orphaned_files().await?;
    Ok(Json(json!({ "success": true, "removed_files": removed })))
}

// ============ Training ============

#[derive(Deserialize)]
struct TrainBody {
    #[serde(alias = "selected_model")]
    base_model: String,
    #[serde(default)]
    selected_files: Vec<String>,
    #[serde(default)]
    custom_name: Option<String>,
    #[serde(default)]
    behavior_filename: Option<String>,
}

async fn handle_train(
    State(app): State<AppState>,
    Json(body): Json<TrainBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let report = app
        .train(TrainRequest {
            base_model: body.base_model,
            selected_paths: body.selected_files,
            custom_suffix: body.custom_name,
            behavior_filename: body.behavior_filename,
        })
        .await?;

    Ok(Json(json!({
        "success": true,
        "trained_model": report.artifact.trained_model_name,
        "training_examples": report.training_examples,
        "model_exists": report.model_existed,
        "outcome": report.outcome,
        "used_fallback_profile": report.used_fallback_profile,
    })))
}

// ============ Queries ============

#[derive(Deserialize)]
struct QueryBody {
    question: String,
    #[serde(default = "default_include_files")]
    include_files: bool,
    #[serde(default)]
    model_name: Option<String>,
}

fn default_include_files() -> bool {
    true
}

async fn handle_query_stream(
    State(app): State<AppState>,
    Json(body): Json<QueryBody>,
) -> Response {
    let events = app.orchestrator.clone().stream(QueryRequest {
        question: body.question,
        model_name: body.model_name,
        include_files: body.include_files,
    });

    // Dropping the response body drops this stream, which cancels the
    // generation at the engine boundary.
    let lines = events.map(|event| {
        let json = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok::<_, std::convert::Infallible>(format!("data: {json}\n\n"))
    });

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(lines),
    )
        .into_response()
}

async fn handle_query(
    State(app): State<AppState>,
    Json(body): Json<QueryBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let answer = app
        .orchestrator
        .answer(QueryRequest {
            question: body.question,
            model_name: body.model_name,
            include_files: body.include_files,
        })
        .await?;

    Ok(Json(json!({
        "success": true,
        "answer": answer.answer,
        "sources": answer.sources,
        "model_used": answer.model_used,
    })))
}

// ============ File tools ============

#[derive(Deserialize)]
struct FindLatestBody {
    #[serde(default)]
    directory: Option<String>,
    #[serde(default = "default_pattern")]
    pattern: String,
}

fn default_pattern() -> String {
    "*.md".to_string()
}

async fn handle_tool_find_latest(
    State(app): State<AppState>,
    Json(body): Json<FindLatestBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let latest = app
        .tools
        .find_latest(body.directory.as_deref(), &body.pattern)?;
    Ok(Json(json!({ "success": true, "latest_file": latest })))
}

#[derive(Deserialize)]
struct ListFilesBody {
    #[serde(default)]
    directory: Option<String>,
    #[serde(default = "default_sort_by")]
    sort_by: String,
    #[serde(default = "default_reverse")]
    reverse: bool,
}

fn default_sort_by() -> String {
    "modified".to_string()
}

fn default_reverse() -> bool {
    true
}

async fn handle_tool_list_files(
    State(app): State<AppState>,
    Json(body): Json<ListFilesBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let sort_by: crate::tools::SortBy = body.sort_by.parse()?;
    let files = app
        .tools
        .list_files(body.directory.as_deref(), sort_by, body.reverse)?;
    Ok(Json(json!({ "success": true, "files": files })))
}

#[derive(Deserialize)]
struct SearchFilesBody {
    query: String,
    #[serde(default)]
    directory: Option<String>,
    #[serde(default)]
    case_sensitive: bool,
}

async fn handle_tool_search_files(
    State(app): State<AppState>,
    Json(body): Json<SearchFilesBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let files =
        app.tools
            .search_by_name(&body.query, body.directory.as_deref(), body.case_sensitive)?;
    Ok(Json(json!({ "success": true, "files": files })))
}

#[derive(Deserialize)]
struct GrepContentBody {
    search_term: String,
    #[serde(default)]
    directory: Option<String>,
    #[serde(default)]
    case_sensitive: bool,
    #[serde(default = "default_max_results")]
    max_results: usize,
}

fn default_max_results() -> usize {
    10
}

async fn handle_tool_grep_content(
    State(app): State<AppState>,
    Json(body): Json<GrepContentBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let matches = app.tools.grep_content(
        &body.search_term,
        body.directory.as_deref(),
        body.case_sensitive,
        body.max_results,
    )?;
    Ok(Json(json!({ "success": true, "matches": matches })))
}

#[derive(Deserialize)]
struct FileRefBody {
    filename: String,
    #[serde(default)]
    directory: Option<String>,
}

async fn handle_tool_get_content(
    State(app): State<AppState>,
    Json(body): Json<FileRefBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let content = app
        .tools
        .get_content(&body.filename, body.directory.as_deref())?;
    Ok(Json(json!({
        "success": true,
        "filename": body.filename,
        "content": content,
    })))
}

async fn handle_tool_get_info(
    State(app): State<AppState>,
    Json(body): Json<FileRefBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let info = app
        .tools
        .get_info(&body.filename, body.directory.as_deref())?;
    Ok(Json(json!({ "success": true, "info": info })))
}

// ============ Documents and behaviors ============

async fn handle_get_document(
    State(app): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let content = app.tools.get_content(&filename, None)?;
    Ok(Json(json!({ "filename": filename, "content": content })))
}

async fn handle_list_behaviors(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "behaviors": app.behaviors.list(),
        "selected": app.behaviors.current().filename,
    }))
}

#[derive(Deserialize)]
struct SelectBehaviorBody {
    filename: String,
}

async fn handle_select_behavior(
    State(app): State<AppState>,
    Json(body): Json<SelectBehaviorBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let profile = app.behaviors.select(&body.filename)?;
    Ok(Json(json!({ "success": true, "selected": profile.filename })))
}

async fn handle_get_personality(State(app): State<AppState>) -> Json<serde_json::Value> {
    let current = app.behaviors.current();
    Json(json!({
        "personality_prompt": current.raw_text,
        "behavior_file": current.filename,
    }))
}

async fn handle_reload_personality(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let profile = app.behaviors.reload()?;
    Ok(Json(json!({
        "success": true,
        "behavior_file": profile.filename,
        "personality_prompt": profile.raw_text,
    })))
}

async fn handle_reload_knowledge_base(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let count = app.store.reload().map_err(AppError::from)?;
    Ok(Json(json!({ "success": true, "documents_loaded": count })))
}
