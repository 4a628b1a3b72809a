use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::models::ContextField;

/// Failures raised by the step controller. A patch that fails with any of
/// these leaves the context untouched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    #[error("context version mismatch: expected {expected}, got {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("cannot set '{field}' before '{missing}' is provided")]
    MissingPrerequisite {
        field: ContextField,
        missing: ContextField,
    },

    #[error("cannot set 'appointment_time' to unavailable time '{time}'")]
    TimeNotOffered { time: String },

    #[error("employee '{token}' is not among the offered employees")]
    EmployeeNotOffered { token: String },

    #[error("no snapshot recorded for version {0}")]
    UnknownVersion(u64),
}

impl StepError {
    /// Validation failures are answered inside the turn; conflicts abort it.
    pub fn is_validation(&self) -> bool {
        !matches!(self, StepError::VersionConflict { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("scheduling API request timed out")]
    Timeout,

    #[error("scheduling API returned HTTP {0}")]
    Http(u16),

    #[error("scheduling API rejected the request: {0}")]
    Rejected(String),

    #[error("malformed scheduling API response: {0}")]
    Malformed(String),

    #[error("scheduling API transport error: {0}")]
    Transport(#[source] reqwest::Error),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else if let Some(status) = e.status() {
            ApiError::Http(status.as_u16())
        } else if e.is_decode() {
            ApiError::Malformed(e.to_string())
        } else {
            ApiError::Transport(e)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Step(#[from] StepError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Serialization(_) => StatusCode::BAD_REQUEST,
            AppError::Step(StepError::VersionConflict { .. }) => StatusCode::CONFLICT,
            AppError::Step(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Api(_) => StatusCode::BAD_GATEWAY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
