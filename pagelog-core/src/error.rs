//! Error types for Pagelog

use thiserror::Error;

/// Result type alias for Pagelog operations
pub type Result<T> = std::result::Result<T, LogsError>;

/// Pagelog error types
#[derive(Error, Debug)]
pub enum LogsError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Page checksum mismatch
    #[error("Integrity error: expected crc {expected:#010x}, got {actual:#010x}")]
    Integrity { expected: u32, actual: u32 },

    /// Fewer bytes available than a length field promised
    #[error("Truncated read: expected {expected} bytes, got {actual}")]
    TruncatedRead { expected: usize, actual: usize },

    /// Invalid data format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Malformed query predicate
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Object does not exist in the object store
    #[error("Object not found: {key}")]
    ObjectNotFound { key: String },

    /// Object store operation failed
    #[error("Object store error: {0}")]
    ObjectStore(String),

    /// Page store rejected a sealed page
    #[error("Flush failed: {0}")]
    FlushFailed(String),

    /// Query error
    #[error("Query error: {0}")]
    Query(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LogsError {
    /// Check if error indicates corrupt page bytes
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            LogsError::Integrity { .. } | LogsError::InvalidFormat(_)
        )
    }

    /// Check if error means the requested data simply isn't there
    pub fn is_missing(&self) -> bool {
        match self {
            LogsError::ObjectNotFound { .. } => true,
            LogsError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
