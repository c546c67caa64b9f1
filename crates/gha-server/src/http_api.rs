use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use gha_agent::service::SessionHistory;
use gha_agent::{AgentService, TurnRequest};
use gha_core::ledger::DEFAULT_TURN_LIMIT;
use gha_core::types::{AssistantOutput, SessionToken, TurnId};
use gha_integrations::host::Credential;
use gha_telemetry::middleware::request_id_middleware;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api_error::ApiError;

/// Shared state for all handlers. Built once in `main`, read-only after.
pub struct AppState {
    pub service: Arc<AgentService>,
    /// Whether the reasoning engine came up at startup.
    pub engine_initialized: bool,
}

impl AppState {
    pub fn new(service: Arc<AgentService>, engine_initialized: bool) -> Self {
        Self {
            service,
            engine_initialized,
        }
    }
}

pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/agent/query", post(agent_query))
        .route("/sessions/{token}/history", get(session_history))
        .layer(axum_middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub user: String,
    /// Client-side timestamp; RFC 3339 values become the turn's timestamp.
    pub timestamp: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub assistant_output: AssistantOutput,
    pub timestamp: DateTime<Utc>,
    pub status: &'static str,
    pub conv_id: TurnId,
    pub session_id: SessionToken,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn root() -> Json<Value> {
    Json(json!({ "status": "ok", "message": "GitHub Agent API is running" }))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "engine_initialized": state.engine_initialized,
        "timestamp": Utc::now(),
    }))
}

fn credential(headers: &HeaderMap) -> Result<Credential, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(Credential::from_bearer)
        .ok_or_else(|| ApiError::Unauthorized("missing or malformed bearer token".into()))
}

async fn agent_query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let credential = credential(&headers)?;
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let timestamp = DateTime::parse_from_rfc3339(&body.timestamp)
        .map(|t| t.with_timezone(&Utc))
        .ok();
    let request = TurnRequest {
        user: body.user,
        query: body.query,
        timestamp,
        session_id: body.session_id,
    };

    let outcome = state.service.handle_query(&credential, request).await?;
    Ok(Json(QueryResponse {
        assistant_output: outcome.output,
        timestamp: outcome.timestamp,
        status: "success",
        conv_id: outcome.turn_id,
        session_id: outcome.session,
    }))
}

async fn session_history(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Query(params): Query<HistoryParams>,
    headers: HeaderMap,
) -> Result<Json<SessionHistory>, ApiError> {
    let credential = credential(&headers)?;
    let limit = params.limit.unwrap_or(DEFAULT_TURN_LIMIT);
    let history = state
        .service
        .session_history(&credential, &token, limit)
        .await?;
    Ok(Json(history))
}
