//! Error types for Watchtower
//!
//! One enum for the whole crate, with an HTTP status mapping for the read
//! endpoints.

use hyper::StatusCode;

/// Main error type for Watchtower operations
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The replication backend could not be read this pass; retried next tick
    #[error("Upstream unavailable: {0}")]
    TransientUpstream(String),

    /// The cache file could not be opened at startup
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WatchError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::TransientUpstream(_) => StatusCode::BAD_GATEWAY,
            Self::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the failure is expected to clear up on its own (retry next pass)
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientUpstream(_) | Self::Timeout(_))
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }
}

impl From<std::io::Error> for WatchError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for WatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON error: {}", err))
    }
}

impl From<sled::Error> for WatchError {
    fn from(err: sled::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for WatchError {
    fn from(err: reqwest::Error) -> Self {
        Self::TransientUpstream(err.to_string())
    }
}

impl From<hyper::Error> for WatchError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for WatchError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::Timeout(err.to_string())
    }
}

/// Result type alias for Watchtower operations
pub type Result<T> = std::result::Result<T, WatchError>;
