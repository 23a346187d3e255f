use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use stratus_core::StratusError;
use stratus_executor::ExecutorError;
use stratus_metrics::MetricsError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found (404)
    NotFound(String),

    /// Resource already exists (409)
    AlreadyExists(String),

    /// Operation not allowed in the current state (409)
    Conflict(String),

    /// Invalid input (400)
    BadRequest(String),

    /// Validation failed (422)
    ValidationFailed(String),

    /// Orchestration API timed out or refused (503)
    Unavailable(String),

    /// Internal server error (500)
    Internal(String),
}

/// Result type for API operations
pub type Result<T> = std::result::Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::AlreadyExists(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::ValidationFailed(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "kind": "Status",
            "status": "Failure",
            "message": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<StratusError> for ApiError {
    fn from(err: StratusError) -> Self {
        match err {
            StratusError::WorkloadNotFound { .. } | StratusError::NodeNotFound { .. } => {
                ApiError::NotFound(err.to_string())
            }
            StratusError::WorkloadAlreadyExists { .. } => ApiError::AlreadyExists(err.to_string()),
            StratusError::InvalidTransition { .. } => ApiError::Conflict(err.to_string()),
            StratusError::InvalidQuantity { .. } | StratusError::SerializationError { .. } => {
                ApiError::BadRequest(err.to_string())
            }
            StratusError::InvalidConfig { .. } => ApiError::ValidationFailed(err.to_string()),
            StratusError::InternalError { .. } => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ExecutorError> for ApiError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Core(core) => core.into(),
            ExecutorError::InvalidState { .. } | ExecutorError::Conflict { .. } => {
                ApiError::Conflict(err.to_string())
            }
            ExecutorError::Timeout { .. } | ExecutorError::Rejected { .. } => {
                ApiError::Unavailable(err.to_string())
            }
            ExecutorError::Storage(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<MetricsError> for ApiError {
    fn from(err: MetricsError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
