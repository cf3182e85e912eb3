//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/turn` | Run one conversational turn |
//! | `POST` | `/search` | Hybrid legislation search |
//! | `GET`  | `/tools/list` | List registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call a registered tool by name |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `timeout` (408),
//! `tool_error` (500), `internal` (500), `safety_gate_failed` (503),
//! `provider_outage` (503), `retrieval_unavailable` (503).
//!
//! Turn failures never leak provider detail; the body carries the same
//! generic message the chat client shows.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted for browser clients.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use auslaw_core::error::RetrievalError;
use auslaw_core::models::Jurisdiction;
use auslaw_core::search::SearchHit;

use crate::config::Config;
use crate::db;
use crate::directory::Directory;
use crate::orchestrator::{Orchestrator, TurnError, TurnOutcome, TurnRequest};
use crate::tools::{validate_params, ToolContext, ToolRegistry};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub tools: Arc<ToolRegistry>,
    pub directory: Arc<Directory>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, tools: ToolRegistry) -> Self {
        Self {
            orchestrator,
            tools: Arc::new(tools),
            directory: Arc::new(Directory::default()),
        }
    }

    pub fn with_directory(mut self, directory: Directory) -> Self {
        self.directory = Arc::new(directory);
        self
    }

    fn tool_context(&self) -> ToolContext {
        ToolContext::new(self.orchestrator.retriever().clone()).with_directory(self.directory.clone())
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/turn", post(handle_turn))
        .route("/search", post(handle_search))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// `auslaw serve`: bind to `[server].bind` and run until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    crate::migrate::migrate_pool(&pool).await?;
    let orchestrator = Orchestrator::from_config(config, pool)?;
    let registry = ToolRegistry::with_builtins();
    let directory = match &config.directory.path {
        Some(path) => Directory::load(path)?,
        None => Directory::default(),
    };

    for t in registry.tools() {
        tracing::info!(tool = t.name(), "tool registered");
    }
    let app = router(AppState::new(Arc::new(orchestrator), registry).with_directory(directory));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "server listening");
    println!("AusLaw server listening on http://{}", config.server.bind);
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

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }
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
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

impl From<TurnError> for AppError {
    fn from(err: TurnError) -> Self {
        let status = match err {
            TurnError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            TurnError::SafetyGateFailed(_) | TurnError::ProviderOutage => StatusCode::SERVICE_UNAVAILABLE,
            TurnError::Checkpoint(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.code(), err.user_message())
    }
}

impl From<RetrievalError> for AppError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::InvalidQuery { reason } => bad_request(reason),
            RetrievalError::RetrievalUnavailable { reason } => {
                tracing::error!(%reason, "search unavailable");
                AppError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "retrieval_unavailable",
                    "Legislation search is unavailable right now.",
                )
            }
        }
    }
}

/// Map tool failures to a status from their message.
fn classify_tool_error(tool_name: &str, err: anyhow::Error) -> AppError {
    let msg = err.to_string();
    if msg.contains("not found") {
        not_found(format!("{}: {}", tool_name, msg))
    } else if msg.contains("must not be empty")
        || msg.contains("too short")
        || msg.contains("unknown category")
        || msg.contains("invalid query")
    {
        bad_request(format!("{}: {}", tool_name, msg))
    } else if msg.contains("timed out") {
        AppError::new(StatusCode::REQUEST_TIMEOUT, "timeout", format!("{}: {}", tool_name, msg))
    } else {
        AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "tool_error", format!("{}: {}", tool_name, msg))
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

// ============ POST /turn ============

async fn handle_turn(
    State(state): State<AppState>,
    Json(req): Json<TurnRequest>,
) -> Result<Json<TurnOutcome>, AppError> {
    let outcome = state.orchestrator.handle_turn(req).await?;
    Ok(Json(outcome))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let jurisdiction = match req.state.as_deref() {
        Some(s) if !s.trim().is_empty() => Some(
            Jurisdiction::detect(s).ok_or_else(|| bad_request(format!("unknown state: {}", s)))?,
        ),
        _ => None,
    };
    let mut results = state
        .orchestrator
        .retriever()
        .retrieve(&req.query, jurisdiction)
        .await?;
    if let Some(n) = req.limit {
        results.truncate(n);
    }
    Ok(Json(SearchResponse { results }))
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolInfo {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state
        .tools
        .tools()
        .iter()
        .map(|t| ToolInfo {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
        })
        .collect();
    Json(ToolListResponse { tools })
}

// ============ POST /tools/{name} ============

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tool = state
        .tools
        .find(&name)
        .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))?;

    let params = validate_params(&tool.parameters_schema(), &params)
        .map_err(|e| bad_request(e.to_string()))?;

    let result = tool
        .execute(params, &state.tool_context())
        .await
        .map_err(|e| classify_tool_error(&name, e))?;

    Ok(Json(serde_json::json!({ "result": result })))
}
