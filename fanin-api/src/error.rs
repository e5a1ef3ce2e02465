//! Error Types for FANIN API
//!
//! This module defines error handling for the API layer, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//! - GraphQL error extensions carrying the error code
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fanin_core::{ConfigError, ContextError, LoadError};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::store::StoreError;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code and represents
/// a category of error that can occur during API operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request contains invalid input data
    InvalidInput,

    /// Configuration value is out of range
    InvalidConfig,

    // ========================================================================
    // Server Errors (500, 504)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// Entity store operation failed
    DatabaseError,

    /// Operation timed out or the request was cancelled
    Timeout,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidInput | ErrorCode::InvalidConfig => StatusCode::BAD_REQUEST,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::InternalError | ErrorCode::DatabaseError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Wire name, as serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::InvalidConfig => "INVALID_CONFIG",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    /// Create an InvalidInput error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Create an InternalError.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Create a DatabaseError.
    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// Create a Timeout error.
    pub fn timeout(operation: &str) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("Operation '{}' timed out", operation),
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// GRAPHQL INTEGRATION
// ============================================================================

/// Resolver errors keep the message and expose the code under
/// `extensions.code`.
impl async_graphql::ErrorExtensions for ApiError {
    fn extend(&self) -> async_graphql::Error {
        let code = self.code.as_str();
        async_graphql::Error::new(self.message.clone()).extend_with(|_, ext| ext.set("code", code))
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<ContextError> for ApiError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::DeadlineExceeded => ApiError::timeout("request"),
            ContextError::Cancelled => ApiError::new(ErrorCode::Timeout, "Request was cancelled"),
        }
    }
}

/// Convert from StoreError to ApiError.
impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Context(ctx) => ctx.into(),
            StoreError::Unavailable(reason) => {
                // Log the full error for debugging
                tracing::error!(%reason, "Entity store error");
                // Return a generic error to avoid leaking internal details
                ApiError::database_error("Entity store operation failed")
            }
        }
    }
}

/// Convert a loader outcome error to ApiError.
impl From<LoadError<StoreError>> for ApiError {
    fn from(err: LoadError<StoreError>) -> Self {
        match err {
            LoadError::Fetch(store) => store.into(),
            LoadError::Context(ctx) => ctx.into(),
            LoadError::Abandoned => ApiError::internal_error("Batch dispatch was abandoned"),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::new(ErrorCode::InvalidConfig, err.to_string())
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ErrorCode::InvalidInput.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::InvalidConfig.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ErrorCode::DatabaseError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_code_serializes_as_wire_name() {
        let json = serde_json::to_value(ErrorCode::DatabaseError).unwrap();
        assert_eq!(json, serde_json::json!(ErrorCode::DatabaseError.as_str()));
    }

    #[tokio::test]
    async fn test_into_response_body() {
        let response = ApiError::invalid_input("Invalid port value: x").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "code": "INVALID_INPUT", "message": "Invalid port value: x" })
        );
    }

    #[test]
    fn test_load_error_mapping() {
        let err: ApiError = LoadError::Fetch(StoreError::Unavailable("pool closed".into())).into();
        assert_eq!(err.code, ErrorCode::DatabaseError);
        assert!(!err.message.contains("pool closed"));

        let err: ApiError = LoadError::<StoreError>::Context(ContextError::DeadlineExceeded).into();
        assert_eq!(err.code, ErrorCode::Timeout);

        let err: ApiError = LoadError::<StoreError>::Abandoned.into();
        assert_eq!(err.code, ErrorCode::InternalError);
    }

    #[test]
    fn test_graphql_extension_carries_code() {
        use async_graphql::ErrorExtensions;

        let err = ApiError::timeout("request").extend();
        let code = err
            .extensions
            .as_ref()
            .and_then(|ext| ext.get("code"))
            .cloned();
        assert_eq!(code, Some(async_graphql::Value::from("TIMEOUT")));
    }
}
