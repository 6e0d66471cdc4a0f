//! Error types for powerport-core.

use thiserror::Error;

/// Result type alias using powerport-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for panel operations
#[derive(Error, Debug)]
pub enum Error {
    // Request errors
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    // Daemon errors
    #[error("Daemon unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Daemon rejected request with status {status}")]
    RemoteRejected {
        status: u16,
        body: serde_json::Value,
    },

    #[error("Daemon returned an unusable response: {0}")]
    RemoteMalformed(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Missing or malformed input
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Unknown entity, e.g. `Error::not_found("Node")`
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// HTTP status code this error maps to on the outward API
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Unauthorized(_) => 401,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::RemoteRejected { status, .. } => *status,
            _ => 500,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::RemoteUnavailable(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::RemoteUnavailable(e.to_string())
    }
}
