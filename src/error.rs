//! Error types for Relaygate
//!
//! This module defines custom error types used throughout the application.
//! Relay failures surface to callers in the OpenAI error envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("Access forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Sanitized relay failure ready to be shown to the caller
    #[error("Upstream error ({status}): {message}")]
    Upstream {
        status: u16,
        error_type: String,
        message: String,
    },

    #[error("Control plane error: {0}")]
    ControlPlane(String),

    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error details in the OpenAI envelope
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: String,
}

impl AppError {
    /// HTTP status, error type and code for this error
    fn parts(&self) -> (StatusCode, &str, &str) {
        match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "authentication_error", "UNAUTHORIZED"),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "authentication_error", "INVALID_TOKEN"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "permission_error", "FORBIDDEN"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "invalid_request_error", "NOT_FOUND"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", "BAD_REQUEST"),
            AppError::ServiceUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "system_error",
                "SERVICE_UNAVAILABLE",
            ),
            AppError::Upstream { status, error_type, .. } => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                error_type.as_str(),
                "UPSTREAM_ERROR",
            ),
            AppError::ControlPlane(_) => (StatusCode::BAD_GATEWAY, "system_error", "CONTROL_PLANE_ERROR"),
            AppError::RedisError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "system_error", "CACHE_ERROR"),
            AppError::HttpError(_) => (StatusCode::BAD_GATEWAY, "system_error", "UPSTREAM_ERROR"),
            AppError::JsonError(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", "INVALID_JSON"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "system_error", "INTERNAL_ERROR"),
        }
    }

    /// Message shown to the caller; internal details stay in the logs
    fn public_message(&self) -> String {
        match self {
            AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::ServiceUnavailable(msg) => msg.clone(),
            AppError::Upstream { message, .. } => message.clone(),
            AppError::ControlPlane(_) => "Control plane error".to_string(),
            AppError::RedisError(_) => "Cache service error".to_string(),
            AppError::HttpError(_) => "Upstream service error".to_string(),
            AppError::JsonError(_) => "Invalid JSON in request".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
            AppError::Unauthorized | AppError::InvalidToken => self.to_string(),
        }
    }

    /// HTTP status code this error maps to
    pub fn status(&self) -> StatusCode {
        self.parts().0
    }

    /// Caller-facing error body
    pub fn body(&self) -> ErrorBody {
        let (_, error_type, code) = self.parts();
        ErrorBody {
            message: self.public_message(),
            error_type: error_type.to_string(),
            code: code.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorResponse { error: self.body() };
        (self.status(), Json(body)).into_response()
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
