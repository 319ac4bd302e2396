//! HTTP server.
//!
//! Exposes the retrieval tools, the consistency check and the chat loop as
//! a JSON API, plus an MCP endpoint for MCP-capable clients.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/tools/list` | List all registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call a tool by name |
//! | `GET`  | `/api/db-stats` | Card database / vector index consistency report |
//! | `POST` | `/api/chat` | Answer a conversation with the tool-calling loop |
//! | *      | `/mcp` | MCP Streamable HTTP transport |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `timeout` (408),
//! `inconsistent` (500), `tool_error` (500), `internal` (500),
//! `upstream` (502).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpService,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::chat::{self, ChatAnswer, ChatCompletion, ChatMessage};
use crate::config::Config;
use crate::db;
use crate::mcp::McpBridge;
use crate::stats::{self, ConsistencyReport};
use crate::traits::{validate_params, ToolContext, ToolInfo, ToolRegistry};
use crate::vector::{self, VectorIndex};

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
    chat: Arc<dyn ChatCompletion>,
}

/// Build the router with explicit backends.
pub fn build_router(
    config: Arc<Config>,
    index: Arc<dyn VectorIndex>,
    chat: Arc<dyn ChatCompletion>,
) -> Router {
    let tools = Arc::new(ToolRegistry::with_builtins());
    let ctx = ToolContext::new(config.clone(), index);

    let bridge = McpBridge::new(ctx.clone(), tools.clone());
    let mcp_service = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let state = AppState {
        config,
        tools,
        ctx,
        chat,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/api/db-stats", get(handle_db_stats))
        .route("/api/chat", post(handle_chat))
        .nest_service("/mcp", mcp_service)
        .layer(cors)
        .with_state(state)
}

/// Start the server on `[server].bind`. Runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let index = vector::open_index(&config.vector_index);
    let chat = chat::open_chat(&config.chat);
    let app = build_router(Arc::new(config.clone()), index, chat);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(%bind_addr, "server started");
    println!("MTG RAG server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<ConsistencyReport>,
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
    report: Option<ConsistencyReport>,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            report: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
            report: self.report,
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

fn internal(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

/// Map an error from a tool or the chat loop onto a status code by what
/// its message says went wrong.
fn classify_error(prefix: &str, err: anyhow::Error) -> AppError {
    let msg = format!("{}: {}", prefix, err);

    // Upstream failures first: provider error bodies often say "invalid" or "not found"
    if msg.contains("timed out") {
        AppError::new(StatusCode::REQUEST_TIMEOUT, "timeout", msg)
    } else if msg.contains("API error")
        || msg.contains("connection error")
        || msg.contains("unavailable")
        || msg.contains("returned")
    {
        AppError::new(StatusCode::BAD_GATEWAY, "upstream", msg)
    } else if msg.contains("no tool registered") || msg.contains("not found") {
        not_found(msg)
    } else if msg.contains("must not be empty")
        || msg.contains("must be")
        || msg.contains("invalid")
        || msg.contains("missing required")
    {
        bad_request(msg)
    } else {
        AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "tool_error", msg)
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

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.tools.infos(),
    })
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

    let validated_params = validate_params(&tool.parameters_schema(), &params)
        .map_err(|e| bad_request(e.to_string()))?;

    let result = tool
        .execute(validated_params, &state.ctx)
        .await
        .map_err(|e| classify_error(&name, e))?;

    Ok(Json(serde_json::json!({ "result": result })))
}

// ============ GET /api/db-stats ============

async fn handle_db_stats(
    State(state): State<AppState>,
) -> Result<Json<ConsistencyReport>, AppError> {
    let pool = db::connect(&state.config).await.map_err(|e| {
        error!(error = %e, "could not open card database");
        internal(e.to_string())
    })?;
    let report = stats::check_consistency(
        &pool,
        state.ctx.index(),
        &state.config.vector_index.partitions,
    )
    .await;
    pool.close().await;

    let report = report.map_err(|e| {
        error!(error = %e, "consistency check failed");
        internal(e.to_string())
    })?;

    if report.is_healthy() {
        return Ok(Json(report));
    }

    warn!(problems = ?report.problems, "data stores inconsistent");
    Err(AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "inconsistent",
        message: report.problems.join("; "),
        report: Some(report),
    })
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
struct ChatRequest {
    messages: Vec<IncomingMessage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct IncomingMessage {
    role: String,
    content: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatAnswer>, AppError> {
    let model = chat::resolve_model(&state.config.chat, req.model.as_deref())
        .map_err(|e| bad_request(e.to_string()))?;

    let mut conversation = Vec::with_capacity(req.messages.len());
    for m in req.messages {
        match m.role.as_str() {
            "user" => conversation.push(ChatMessage::user(m.content)),
            "assistant" => conversation.push(ChatMessage::assistant(m.content)),
            other => {
                return Err(bad_request(format!(
                    "invalid message role '{}': must be user or assistant",
                    other
                )))
            }
        }
    }
    if conversation.last().map(|m| m.role.as_str()) != Some("user") {
        return Err(bad_request("messages must end with a user message"));
    }

    let answer = chat::ask(
        &state.config.chat,
        state.chat.as_ref(),
        &state.tools,
        &state.ctx,
        model,
        conversation,
    )
    .await
    .map_err(|e| classify_error("chat", e))?;

    Ok(Json(answer))
}
