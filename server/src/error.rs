use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use nanoedge_core::InvokeError;
use nanoedge_core::ServiceError;
use nanoedge_state::StoreError;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

/// Error surface of the HTTP front door. Every variant owns one status
/// code; conversions from the runtime crates decide which variant a
/// failure lands in.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} is disabled")]
    Disabled(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0} already exists")]
    Conflict(String),
    #[error("no free port remains in the configured range")]
    ExhaustedPorts,
    #[error("Service failed to start: {0}")]
    ServiceFailedToStart(String),
    #[error("Service unavailable")]
    ServiceUnavailable,
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Disabled(_) => StatusCode::FORBIDDEN,
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::ExhaustedPorts | ApiError::ServiceFailedToStart(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::ServiceUnavailable => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("request failed: {self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, name } => ApiError::NotFound(format!("{kind} `{name}`")),
            StoreError::AlreadyExists { kind, name } => {
                ApiError::Conflict(format!("{kind} `{name}`"))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(name) => ApiError::NotFound(format!("service `{name}`")),
            ServiceError::PortsExhausted => ApiError::ExhaustedPorts,
            ServiceError::StartFailed { message, .. } => ApiError::ServiceFailedToStart(message),
            ServiceError::Store(err) => err.into(),
            ServiceError::Port(err) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<InvokeError> for ApiError {
    fn from(err: InvokeError) -> Self {
        match err {
            InvokeError::NotFound(name) => ApiError::NotFound(format!("function `{name}`")),
            InvokeError::Disabled(name) => ApiError::Disabled(format!("function `{name}`")),
            InvokeError::Store(err) => err.into(),
            InvokeError::Timeout(ms) => {
                ApiError::Internal(format!("function execution timed out after {ms} ms"))
            }
            InvokeError::Executor(err) => ApiError::Internal(err.to_string()),
        }
    }
}
