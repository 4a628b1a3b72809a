pub mod conversations;
pub mod health;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route(
            "/api/conversations/:chat_id/tools",
            post(conversations::call_tool),
        )
        .route(
            "/api/conversations/:chat_id/context",
            get(conversations::get_context),
        )
        .route(
            "/api/conversations/:chat_id/events",
            get(conversations::get_events),
        )
        .route(
            "/api/conversations/:chat_id",
            delete(conversations::delete_conversation),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bearer-token check shared by every `/api` route.
pub(crate) fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if expected_token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}
