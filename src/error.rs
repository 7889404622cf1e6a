//! Error types for quipsync

use thiserror::Error;

/// Result type alias for quipsync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// How far an error is allowed to propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Confined to the current file, folder segment or image; the run continues.
    Recoverable,
    /// Aborts the whole run before the cache is saved.
    Fatal,
}

/// Main error type for quipsync
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote error during {operation} (status {status}): {message}")]
    Remote {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The token is valid but lacks access to this one resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<SyncError>,
    },

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SyncError {
    /// Build a remote error from an HTTP status
    pub fn remote(operation: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        SyncError::Remote {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    /// Gateway timeout from the API, or a client-side request timeout
    pub fn is_gateway_timeout(&self) -> bool {
        match self {
            SyncError::Remote { status, .. } => *status == 504,
            SyncError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        self.is_gateway_timeout()
    }

    /// Classify the error for the propagation policy
    pub fn severity(&self) -> Severity {
        match self {
            SyncError::Unauthorized(_)
            | SyncError::RetriesExhausted { .. }
            | SyncError::Cache(_) => Severity::Fatal,
            _ => Severity::Recoverable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}
