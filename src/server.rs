//! HTTP server.
//!
//! Exposes ingestion, conversations, and the agent protocol as a JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/acp` | Resolve one agent envelope |
//! | `GET`    | `/tools/list` | Registered protocol methods with schemas |
//! | `POST`   | `/documents` | Upload a document (raw body, `Content-Type` selects extraction) |
//! | `GET`    | `/documents/{id}` | Status and chunk counts |
//! | `DELETE` | `/documents/{id}` | Delete with chunks and links |
//! | `POST`   | `/documents/{id}/retry` | Re-run a failed document |
//! | `POST`   | `/documents/{id}/cancel` | Cancel ingestion |
//! | `POST`   | `/conversations/{id}/documents/{doc}` | Link a document |
//! | `GET`    | `/conversations/{id}/messages` | Turn history |
//! | `POST`   | `/conversations/{id}/messages` | Send a message, get an answer |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `context_budget_exceeded` (400),
//! `not_found` (404), `timeout` (408), `unavailable` (503), `internal` (500).
//!
//! `/acp` always answers 200 with a resolved envelope; protocol errors
//! travel inside the envelope.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};

use docent_core::protocol::{AgentEnvelope, MethodInfo};
use docent_core::Error;

use crate::app::App;
use crate::extract::{extract_text, MIME_TEXT};

/// Starts the HTTP server on `[server].bind` and runs until the process
/// is terminated.
pub async fn run_server(app: App) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "HTTP server listening");
    serve(listener, app).await
}

/// Serve on an already-bound listener.
pub async fn serve(listener: tokio::net::TcpListener, app: App) -> anyhow::Result<()> {
    axum::serve(listener, router(app)).await?;
    Ok(())
}

pub fn router(app: App) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/acp", post(handle_acp))
        .route("/tools/list", get(handle_list_tools))
        .route("/documents", post(handle_upload))
        .route(
            "/documents/{id}",
            get(handle_document_status).delete(handle_delete_document),
        )
        .route("/documents/{id}/retry", post(handle_retry))
        .route("/documents/{id}/cancel", post(handle_cancel))
        .route(
            "/conversations/{id}/documents/{doc}",
            post(handle_link_document),
        )
        .route(
            "/conversations/{id}/messages",
            get(handle_history).post(handle_message),
        )
        .layer(cors)
        .with_state(app)
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

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::InvalidInput(_) | Error::InvalidParams(_) => {
                (StatusCode::BAD_REQUEST, "bad_request")
            }
            Error::ContextBudgetExceeded { .. } => {
                (StatusCode::BAD_REQUEST, "context_budget_exceeded")
            }
            Error::NotFound(_) | Error::MethodNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::Timeout { .. } => (StatusCode::REQUEST_TIMEOUT, "timeout"),
            Error::EmbeddingUnavailable(_) | Error::GenerationUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

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

// ============ POST /acp ============

async fn handle_acp(State(app): State<App>, Json(envelope): Json<AgentEnvelope>) -> Json<AgentEnvelope> {
    Json(app.responder.respond(envelope).await)
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<MethodInfo>,
}

async fn handle_list_tools(State(app): State<App>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: app.responder.registry().list(),
    })
}

// ============ Documents ============

#[derive(Deserialize)]
struct UploadQuery {
    origin: Option<String>,
    conversation_id: Option<String>,
}

#[derive(Serialize)]
struct UploadResponse {
    document_id: String,
    status: String,
}

async fn handle_upload(
    State(app): State<App>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(MIME_TEXT);
    let text = extract_text(&body, content_type).map_err(Error::from)?;
    let origin = query.origin.as_deref().unwrap_or("upload");
    let document_id = app
        .ingest
        .submit_document(&text, origin, query.conversation_id.as_deref())
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            document_id,
            status: "pending".to_string(),
        }),
    ))
}

async fn handle_document_status(
    State(app): State<App>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let progress = app.ingest.get_document_status(&id).await?;
    let total = app.ingest.total_chunks().await?;
    let mut body = serde_json::to_value(progress).map_err(|e| Error::Storage(e.to_string()))?;
    body["total_chunks"] = Value::from(total);
    Ok(Json(body))
}

async fn handle_delete_document(
    State(app): State<App>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    app.ingest.delete_document(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_retry(State(app): State<App>, Path(id): Path<String>) -> ApiResult<Value> {
    let progress = app.ingest.retry_document(&id).await?;
    Ok(Json(serde_json::to_value(progress).map_err(|e| Error::Storage(e.to_string()))?))
}

async fn handle_cancel(State(app): State<App>, Path(id): Path<String>) -> ApiResult<Value> {
    let progress = app.ingest.cancel_document(&id).await?;
    Ok(Json(serde_json::to_value(progress).map_err(|e| Error::Storage(e.to_string()))?))
}

// ============ Conversations ============

async fn handle_link_document(
    State(app): State<App>,
    Path((conversation_id, document_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    app.conversations
        .link_document(&conversation_id, &document_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_history(State(app): State<App>, Path(id): Path<String>) -> ApiResult<Value> {
    let turns = app.conversations.history(&id).await?;
    Ok(Json(serde_json::json!({ "conversation_id": id, "turns": turns })))
}

#[derive(Deserialize)]
struct MessageRequest {
    text: String,
}

async fn handle_message(
    State(app): State<App>,
    Path(id): Path<String>,
    Json(req): Json<MessageRequest>,
) -> ApiResult<crate::conversation::Reply> {
    Ok(Json(app.conversations.handle_message(&id, &req.text).await?))
}
