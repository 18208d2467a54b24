//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Chat landing page (`index.html` from the static directory) |
//! | `GET`  | `/static/*` | Static assets of the landing page |
//! | `POST` | `/chat` | Answer a question from the policy documents |
//! | `POST` | `/reset` | Forget server-held conversation history |
//! | `GET`  | `/health` | Liveness, startup state and model name |
//!
//! # Error Contract
//!
//! Errors are JSON objects with a single `detail` string:
//!
//! ```json
//! { "detail": "System is initializing, try again later" }
//! ```
//!
//! `503` while the index is still being checked or rebuilt, `400` for an
//! empty or malformed request, `500` when answering fails.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the page can be served
//! from elsewhere.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::history::{self, SessionStore};
use crate::models::QueryResponse;
use crate::pipeline::RagPipeline;

pub const INITIALIZING_DETAIL: &str = "System is initializing, try again later";
pub const RESET_MESSAGE: &str = "Chat history has been reset.";

const FALLBACK_PAGE: &str = r#"<!doctype html>
<html lang="en">
<head><meta charset="utf-8"><title>CorpGuide</title></head>
<body>
<h1>CorpGuide</h1>
<p>The chat interface is not installed. Send questions to <code>POST /chat</code>.</p>
</body>
</html>
"#;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<RagPipeline>,
    sessions: Arc<SessionStore>,
    static_dir: PathBuf,
}

impl AppState {
    pub fn new(pipeline: Arc<RagPipeline>, sessions: Arc<SessionStore>, static_dir: PathBuf) -> Self {
        Self {
            pipeline,
            sessions,
            static_dir,
        }
    }
}

/// Build the router. Exposed so tests can serve it on an ephemeral port.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_index))
        .route("/chat", post(handle_chat))
        .route("/reset", post(handle_reset))
        .route("/health", get(handle_health))
        .nest_service("/static", ServeDir::new(&state.static_dir))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Build the pipeline, start serving, and run the startup state machine in
/// the background. Questions are refused with 503 until it finishes.
///
/// Returns when the server shuts down (Ctrl-C), or an error if the pipeline
/// cannot be constructed or the address cannot be bound.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(RagPipeline::from_config(config).await?);
    let sessions = Arc::new(SessionStore::from_config(&config.sessions));

    tracing::info!(model = pipeline.model_name(), "language model configured");

    let startup = pipeline.clone();
    tokio::spawn(async move {
        let state = startup.startup().await;
        tracing::info!(%state, "pipeline ready");
    });

    let app = router(AppState::new(
        pipeline,
        sessions,
        config.server.static_dir.clone(),
    ));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("CorpGuide listening on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

struct AppError {
    status: StatusCode,
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

fn bad_request(detail: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        detail: detail.into(),
    }
}

fn unavailable() -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        detail: INITIALIZING_DETAIL.to_string(),
    }
}

fn internal(detail: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        detail: detail.into(),
    }
}

// ============ GET / ============

async fn handle_index(State(state): State<AppState>) -> Html<String> {
    let path = state.static_dir.join("index.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(page) => Html(page),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "serving built-in landing page");
            Html(FALLBACK_PAGE.to_string())
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state: String,
    model: String,
    version: &'static str,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        state: state.pipeline.state().to_string(),
        model: state.pipeline.model_name().to_string(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ POST /chat ============

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    /// `[role, text]` pairs; malformed entries are ignored.
    #[serde(default)]
    pub chat_history: Vec<serde_json::Value>,
    /// When set, history is kept by the server under this id and
    /// `chat_history` is ignored.
    #[serde(default)]
    pub session_id: Option<String>,
}

async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    if !state.pipeline.state().is_ready() {
        return Err(unavailable());
    }

    let Json(req) = payload.map_err(|e| bad_request(e.body_text()))?;
    let question = req.question.trim();
    if question.is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let session_id = req.session_id.as_deref().filter(|s| !s.is_empty());
    let turns = match session_id {
        Some(id) => state.sessions.history(id).await,
        None => history::from_wire(&req.chat_history),
    };

    let response = state
        .pipeline
        .process_query(question, &turns)
        .await
        .map_err(|e| internal(format!("{:#}", e)))?;

    if let Some(id) = session_id {
        state.sessions.append(id, question, &response.answer).await;
    }

    Ok(Json(response))
}

// ============ POST /reset ============

#[derive(Debug, Default, Deserialize)]
struct ResetRequest {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
struct ResetResponse {
    message: &'static str,
}

/// Body is optional: no body (or no `session_id`) clears every session.
async fn handle_reset(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ResetResponse>, AppError> {
    let req: ResetRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ResetRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| bad_request(format!("invalid body: {}", e)))?
    };

    let removed = state.sessions.reset(req.session_id.as_deref()).await;
    tracing::info!(session = ?req.session_id, removed, "chat history reset");

    Ok(Json(ResetResponse {
        message: RESET_MESSAGE,
    }))
}
