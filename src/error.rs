//! Error types for drivetree.

use thiserror::Error;

/// Common error type for drive operations.
#[derive(Error, Debug)]
pub enum DriveError {
    /// Database error.
    ///
    /// Errors from sqlx are converted into this variant.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Node missing, not owned by the caller, or in the wrong delete state.
    #[error("{0} not found")]
    NotFound(String),

    /// A live sibling with the same name already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A move would make a node its own ancestor.
    #[error("cycle violation: {0}")]
    CycleViolation(String),

    /// The principal lacks the required permission level.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Malformed name, color, email or permission value.
    #[error("validation error: {0}")]
    Validation(String),

    /// Storage quota exceeded.
    ///
    /// Reserved: usage above the limit is currently reported but not enforced.
    #[error("quota exceeded: {used} of {limit} bytes used")]
    QuotaExceeded { used: i64, limit: i64 },

    /// Blob store failure (including timeouts).
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for DriveError {
    fn from(e: sqlx::Error) -> Self {
        DriveError::Database(e.to_string())
    }
}

/// Result type alias for drive operations.
pub type Result<T> = std::result::Result<T, DriveError>;
