//! Error types and handling
//!
//! Two layers live here:
//! - [`BackupError`], the tagged error kinds produced by the backup engine.
//!   Callers match on the kind to decide whether a failure may be retried.
//! - [`AppError`], the HTTP-facing error converted to a JSON response by the
//!   trigger API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Error kinds raised while executing a backup run
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackupError {
    /// Cannot reach or log in to the remote host, or a remote command
    /// could not be run at all
    #[error("Connection error: {0}")]
    Connection(String),

    /// Archive creation or verification failed, including disk-space preflight
    #[error("Zip error: {0}")]
    Zip(String),

    /// The remote archive command could not be run
    #[error("Zip error: {0}")]
    ZipCommand(String),

    /// Database engine detection or dump failed
    #[error("Database dump error: {0}")]
    DatabaseDump(String),

    /// Upload, listing or deletion against a destination failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid or missing configuration; never retried
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Task is paused, already running, or its server is busy
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Referenced task, server or destination does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Persistence failure
    #[error("Database error: {0}")]
    Database(String),
}

impl BackupError {
    /// Whether a bounded retry may help with this kind of failure
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackupError::Connection(_) | BackupError::ZipCommand(_) | BackupError::Storage(_)
        )
    }

    /// Short identifier of the error kind, used in structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            BackupError::Connection(_) => "connection",
            BackupError::Zip(_) | BackupError::ZipCommand(_) => "zip",
            BackupError::DatabaseDump(_) => "database_dump",
            BackupError::Storage(_) => "storage",
            BackupError::Configuration(_) => "configuration",
            BackupError::Conflict(_) => "conflict",
            BackupError::NotFound(_) => "not_found",
            BackupError::Database(_) => "database",
        }
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        BackupError::Connection(msg.into())
    }

    pub fn zip(msg: impl Into<String>) -> Self {
        BackupError::Zip(msg.into())
    }

    pub fn zip_command(msg: impl Into<String>) -> Self {
        BackupError::ZipCommand(msg.into())
    }

    pub fn dump(msg: impl Into<String>) -> Self {
        BackupError::DatabaseDump(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        BackupError::Storage(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        BackupError::Configuration(msg.into())
    }
}

impl From<sqlx::Error> for BackupError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => BackupError::NotFound("Record not found".to_string()),
            _ => BackupError::Database(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for BackupError {
    fn from(err: anyhow::Error) -> Self {
        BackupError::Database(format!("{:#}", err))
    }
}

/// Result type alias for the backup engine
pub type BackupResult<T> = Result<T, BackupError>;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Conflict - task paused, running, or server busy (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Remote host or storage backend unreachable (502)
    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl AppError {
    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}

/// Error response body
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Add details to the error response
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, should_log) = match &self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", false),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request", false),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict", false),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", true),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error", true),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", true),
            AppError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_error", true),
        };

        // Log server errors
        if should_log {
            error!(error = %self, error_type = error_type, "Request error");
        }

        let body = ErrorResponse::new(error_type, self.to_string());

        (status, Json(body)).into_response()
    }
}

impl From<BackupError> for AppError {
    fn from(err: BackupError) -> Self {
        match err {
            BackupError::Conflict(msg) => AppError::Conflict(msg),
            BackupError::NotFound(msg) => AppError::NotFound(msg),
            BackupError::Configuration(msg) => AppError::Config(msg),
            BackupError::Database(msg) => AppError::Database(msg),
            BackupError::Connection(msg) | BackupError::Storage(msg) => AppError::Upstream(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Record not found".to_string()),
            _ => AppError::Database(err.to_string()),
        }
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
