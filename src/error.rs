//! Error types for the edge cache

use crate::remote::RemoteError;
use thiserror::Error;

/// Result type alias for edge cache operations
pub type Result<T> = std::result::Result<T, EdgeError>;

/// Error types that can occur anywhere in the edge cache
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EdgeError {
    /// The key is absent at the tier that was asked. Expected; drives fallback.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Remote store error: {0}")]
    RemoteError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for EdgeError {
    fn from(err: std::io::Error) -> Self {
        EdgeError::IoError(err.to_string())
    }
}

impl From<RemoteError> for EdgeError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::NotFound(key) => EdgeError::NotFound(key),
            other => EdgeError::RemoteError(other.to_string()),
        }
    }
}

impl EdgeError {
    /// Whether this error only means "not at this tier"
    ///
    /// The orchestrator recovers these locally by asking the next tier.
    /// Any other error aborts the fallback chain.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EdgeError::NotFound(_))
    }

    /// Convert error to HTTP status code
    ///
    /// - NotFound: 404 (only reached once every tier has missed)
    /// - InvalidKey: 400
    /// - Everything else: 500 Internal Server Error
    pub fn to_http_status(&self) -> u16 {
        match self {
            EdgeError::NotFound(_) => 404,
            EdgeError::InvalidKey(_) => 400,
            EdgeError::IoError(_) => 500,
            EdgeError::RemoteError(_) => 500,
            EdgeError::ConfigError(_) => 500,
            EdgeError::HttpError(_) => 500,
            EdgeError::InternalError(_) => 500,
        }
    }

    /// Build a NotFound error for a key
    pub fn not_found(key: impl Into<String>) -> Self {
        EdgeError::NotFound(key.into())
    }
}
