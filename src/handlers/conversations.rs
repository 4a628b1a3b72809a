use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use super::check_auth;
use crate::db::queries::{self, StepEvent};
use crate::errors::AppError;
use crate::models::{BookingContext, ToolCall};
use crate::services::turn::{run_turn, TurnOutcome};
use crate::state::AppState;

// POST /api/conversations/:chat_id/tools
#[derive(Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
    pub expected_version: Option<u64>,
}

pub async fn call_tool(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ToolRequest>,
) -> Result<Json<TurnOutcome>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let call = ToolCall::parse(&req.tool, req.args)?;
    let outcome = run_turn(&state, &chat_id, call, req.expected_version).await?;
    Ok(Json(outcome))
}

// GET /api/conversations/:chat_id/context
pub async fn get_context(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<BookingContext>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let db = state.db()?;
    queries::load_context(&db, &chat_id)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no booking context for '{chat_id}'")))
}

// GET /api/conversations/:chat_id/events
#[derive(Deserialize)]
pub struct EventsQuery {
    pub limit: Option<i64>,
}

pub async fn get_events(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<String>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<StepEvent>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let db = state.db()?;
    Ok(Json(queries::list_step_events(&db, &chat_id, limit)?))
}

// DELETE /api/conversations/:chat_id
pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let db = state.db()?;
    if queries::delete_context(&db, &chat_id)? {
        tracing::info!(%chat_id, "booking context deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("no booking context for '{chat_id}'")))
    }
}
