//! Error handling for Defendr

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Stage of the credential refresh chain that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    /// Refresh credential -> access token exchange
    Access,
    /// Access token -> session token exchange
    Session,
}

impl std::fmt::Display for AuthStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthStage::Access => write!(f, "access"),
            AuthStage::Session => write!(f, "session"),
        }
    }
}

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Token refresh chain failure (fatal to the current call, recoverable on next acquire)
    #[error("Auth error at {stage} stage: {cause}")]
    Auth { stage: AuthStage, cause: String },

    /// Event feed disconnect (recoverable via reconnect/backoff)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Snapshot fetch failed (aborts the current attempt, attempt is retryable)
    #[error("Capture error: {0}")]
    Capture(String),

    /// Object store upload/delete failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Face detection/comparison call failed outright
    /// (distinct from "zero faces found", which is a normal NoFace outcome)
    #[error("Recognition error: {0}")]
    Recognition(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for an auth error at a given refresh stage
    pub fn auth(stage: AuthStage, cause: impl Into<String>) -> Self {
        Error::Auth {
            stage,
            cause: cause.into(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::Auth { stage, cause } => (
                StatusCode::UNAUTHORIZED,
                "AUTH_ERROR",
                format!("{} stage: {}", stage, cause),
            ),
            Error::Transport(msg) => (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR", msg.clone()),
            Error::Capture(msg) => (StatusCode::BAD_GATEWAY, "CAPTURE_ERROR", msg.clone()),
            Error::Storage(msg) => (StatusCode::BAD_GATEWAY, "STORAGE_ERROR", msg.clone()),
            Error::Recognition(msg) => (StatusCode::BAD_GATEWAY, "RECOGNITION_ERROR", msg.clone()),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                msg.clone(),
            ),
            Error::Parse(msg) => (StatusCode::BAD_REQUEST, "PARSE_ERROR", msg.clone()),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
