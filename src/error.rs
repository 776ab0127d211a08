use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Circuit breaker open for provider {provider}, retry after {retry_after_secs}s")]
    BreakerOpen {
        provider: String,
        retry_after_secs: u64,
    },

    #[error("Stream deadline exceeded after {0}s")]
    StreamTimeout(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Status code this error maps to at the HTTP boundary.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::Upstream(_) | Self::BreakerOpen { .. } => StatusCode::BAD_GATEWAY,
            Self::StreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to put on the wire. Upstream failures are collapsed
    /// to a generic message; the raw detail is logged with the request id.
    pub fn public_message(&self) -> String {
        match self {
            Self::Upstream(_) | Self::BreakerOpen { .. } => "upstream error".to_string(),
            Self::Persistence(_) | Self::JsonError(_) | Self::IoError(_) => {
                "internal error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({
            "error": {
                "message": self.public_message(),
                "type": error_type(&self),
            }
        });
        (status, Json(body)).into_response()
    }
}

fn error_type(err: &GatewayError) -> &'static str {
    match err {
        GatewayError::InvalidRequest(_) => "invalid_request_error",
        GatewayError::NotFound(_) => "not_found_error",
        GatewayError::AccessDenied(_) => "permission_error",
        GatewayError::Upstream(_) | GatewayError::BreakerOpen { .. } => "upstream_error",
        GatewayError::StreamTimeout(_) => "timeout_error",
        _ => "internal_error",
    }
}
