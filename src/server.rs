//! HTTP API.
//!
//! Thin handlers over the pipeline and query service:
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/repositories` | Register a repository and start indexing |
//! | `GET`  | `/repositories` | List repositories with their statuses |
//! | `DELETE` | `/repositories/{id}` | Delete a repository and its chunks |
//! | `POST` | `/chat` | Answer a conversation against one repository |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Error responses are JSON:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "URL is required" } }
//! ```
//!
//! Codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! Indexing itself is fire-and-forget: `POST /repositories` returns as soon
//! as the repository row is `LOADING`; completion is observed by polling
//! `GET /repositories`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::chat::OpenAiChat;
use crate::config::Config;
use crate::embedding::OpenAiEmbedder;
use crate::indexer;
use crate::models::{ChatMessage, Repository};
use crate::query;
use crate::store;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
}

/// Start the HTTP server on the configured bind address. Runs until the
/// process is terminated.
pub async fn run_server(config: &Config, pool: SqlitePool) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState {
        config: Arc::new(config.clone()),
        pool,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/repositories", post(handle_create_repository))
        .route("/repositories", get(handle_list_repositories))
        .route("/repositories/{id}", delete(handle_delete_repository))
        .route("/chat", post(handle_chat))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    info!("listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
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

/// Map service errors onto HTTP statuses: bad input → 400, unknown ids →
/// 404, everything else → 500.
fn classify_error(err: anyhow::Error) -> AppError {
    let message = err.to_string();
    if message.contains("not found") {
        not_found(message)
    } else if message.contains("required")
        || message.contains("No messages")
        || message.contains("not configured")
    {
        bad_request(message)
    } else {
        internal(message)
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

// ============ POST /repositories ============

#[derive(Deserialize)]
struct CreateRepositoryRequest {
    url: String,
    branch: Option<String>,
}

#[derive(Serialize)]
struct CreateRepositoryResponse {
    success: bool,
    repository: Repository,
}

/// Register a repository and trigger its first indexing run. The response
/// carries the record already flipped to `LOADING`; the caller polls for
/// the terminal status.
async fn handle_create_repository(
    State(state): State<AppState>,
    Json(request): Json<CreateRepositoryRequest>,
) -> Result<Json<CreateRepositoryResponse>, AppError> {
    let repository = store::create_repository(&state.pool, &request.url)
        .await
        .map_err(classify_error)?;

    indexer::start_indexing(&state.pool, &state.config, &repository.id, request.branch)
        .await
        .map_err(classify_error)?;

    let repository = store::get_repository(&state.pool, &repository.id)
        .await
        .map_err(classify_error)?
        .ok_or_else(|| not_found(format!("Repository {} not found", repository.id)))?;

    Ok(Json(CreateRepositoryResponse {
        success: true,
        repository,
    }))
}

// ============ GET /repositories ============

#[derive(Serialize)]
struct ListRepositoriesResponse {
    repositories: Vec<Repository>,
}

async fn handle_list_repositories(
    State(state): State<AppState>,
) -> Result<Json<ListRepositoriesResponse>, AppError> {
    let repositories = store::list_repositories(&state.pool)
        .await
        .map_err(classify_error)?;
    Ok(Json(ListRepositoriesResponse { repositories }))
}

// ============ DELETE /repositories/{id} ============

async fn handle_delete_repository(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    store::delete_repository(&state.pool, &id)
        .await
        .map_err(classify_error)?;
    Ok(Json(serde_json::json!({ "success": true })))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    repository_id: String,
    messages: Vec<ChatMessage>,
}

/// Answer a conversation against one repository's index. Synchronous: the
/// response is the plain-text answer.
async fn handle_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<String, AppError> {
    if request.messages.is_empty() {
        return Err(bad_request("No messages provided"));
    }

    let settings = store::latest_settings(&state.pool)
        .await
        .map_err(classify_error)?
        .ok_or_else(|| bad_request("Store settings are not configured"))?;

    let embedder =
        OpenAiEmbedder::new(&state.config.embedding, &settings.api_key).map_err(classify_error)?;
    let chat_model =
        OpenAiChat::new(&state.config.chat, &settings.api_key).map_err(classify_error)?;

    let answer = query::answer(
        &state.pool,
        &embedder,
        &chat_model,
        &request.repository_id,
        &request.messages,
        state.config.retrieval.top_k,
    )
    .await
    .map_err(classify_error)?;

    Ok(answer)
}
