//! Gateway error taxonomy and its HTTP boundary mapping.
//!
//! # Design Decisions
//! - Authentication failures never say which check failed
//! - Missing sessions/users surface as authentication failures, not 404
//! - Storage and unknown errors are logged here and answered with a bare 500

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Errors produced while authenticating, authorizing or routing a request.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Bad, missing or replayed credentials.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// A security-sensitive lookup found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Backing store failure.
    #[error("database error: {0}")]
    Database(String),

    /// Malformed input such as a CIDR or PEM block.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

/// Result alias used across the gateway core.
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Status code this error maps to at the HTTP boundary.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Authentication(_) | GatewayError::NotFound(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Parse(_) => StatusCode::BAD_REQUEST,
            GatewayError::Database(_) | GatewayError::Unknown(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// True for failures the client caused by presenting bad credentials.
    pub fn is_authentication(&self) -> bool {
        matches!(self, GatewayError::Authentication(_) | GatewayError::NotFound(_))
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => GatewayError::NotFound(what),
            StoreError::Duplicate(what) => GatewayError::Database(format!("duplicate {}", what)),
            StoreError::Backend(msg) => GatewayError::Database(msg),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match status {
            StatusCode::UNAUTHORIZED => {
                tracing::debug!(error = %self, "Request rejected");
                "Unauthorized"
            }
            StatusCode::BAD_REQUEST => "Bad Request",
            _ => {
                tracing::error!(error = %self, "Internal error while handling request");
                "Internal Server Error"
            }
        };
        (status, body).into_response()
    }
}

/// Structured `{error, message}` pair attached to authorization denials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorData {
    pub error: String,
    pub message: String,
}

impl ErrorData {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_reported_as_unauthorized() {
        let err = GatewayError::from(StoreError::NotFound("session".into()));
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert!(err.is_authentication());
    }

    #[test]
    fn backend_errors_map_to_500() {
        let err = GatewayError::from(StoreError::Backend("connection reset".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.is_authentication());
    }
}
