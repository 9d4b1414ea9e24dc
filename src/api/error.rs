//! Centralized error handling for HTTP API responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;
use tracing::error;

use crate::error::RefineError;

/// Standard API error response format
#[derive(Debug)]
pub struct ApiError {
    pub message: String,
    pub status_code: StatusCode,
}

impl ApiError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::BAD_REQUEST,
        }
    }

    pub fn custom(status_code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code,
        }
    }

    /// Map an engine error kind (as carried by `error` events) to a status.
    pub fn from_event_kind(kind: &str, message: impl Into<String>) -> Self {
        let status = match kind {
            "invalid_input" => StatusCode::BAD_REQUEST,
            "upstream_unavailable" => StatusCode::BAD_GATEWAY,
            "timeout" => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::custom(status, message)
    }
}

impl From<RefineError> for ApiError {
    fn from(e: RefineError) -> Self {
        let message = match &e {
            RefineError::Internal(inner) => {
                error!(error = %inner, "Internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        Self::from_event_kind(e.kind(), message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": true,
            "message": self.message,
            "status": self.status_code.as_u16(),
        });
        (self.status_code, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Extension trait for converting internal failures to ApiError
pub trait IntoApiError<T> {
    fn into_api_error(self, message: &str) -> Result<T, ApiError>;
}

impl<T, E> IntoApiError<T> for Result<T, E>
where
    E: std::fmt::Debug,
{
    fn into_api_error(self, message: &str) -> Result<T, ApiError> {
        self.map_err(|e| {
            error!("{}: {:?}", message, e);
            ApiError::internal(message)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(RefineError::InvalidInput("empty".into())).status_code,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(RefineError::UpstreamUnavailable("down".into())).status_code,
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(RefineError::Timeout).status_code,
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::from(RefineError::Storage("disk".into())).status_code,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_into_api_error_extension() {
        let result: Result<i32, &str> = Err("boom");
        let error = result.into_api_error("operation failed").unwrap_err();
        assert_eq!(error.status_code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.message, "operation failed");
    }
}
