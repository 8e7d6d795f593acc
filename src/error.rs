//! # Error Handling
//!
//! Every failure the chat core can report, grouped the way clients see them:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  Error                                                               │
//! │  ├── Validation     - malformed event, empty content, bad batch      │
//! │  ├── Authorization  - acting identity does not own the operation     │
//! │  ├── NotFound       - message or identity absent                     │
//! │  └── Storage        - the message store failed                       │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! An unreachable recipient is not an error: delivery is best-effort and
//! the operation still succeeds.
//!
//! Rejections are reported to the initiating connection only (as a
//! `messageError` frame or an HTTP error body). The counterpart never learns
//! that a rejected operation was attempted.

use thiserror::Error;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    NotFound,
    Storage,
}

/// Main error type for the chat core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Validation
    // ========================================================================

    /// A required field was missing or empty
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Message content was empty or too long
    #[error("Invalid message content: {0}")]
    InvalidContent(String),

    /// Delete batch was empty or exceeded the configured limit
    #[error("Invalid delete batch: {0}")]
    InvalidBatch(String),

    /// A frame could not be decoded
    #[error("Invalid message format: {0}")]
    InvalidFrame(String),

    // ========================================================================
    // Authorization
    // ========================================================================

    /// The identity named in the event is not the one bound to the connection
    #[error("Acting identity does not match the connection")]
    IdentityMismatch,

    /// The acting identity does not own the targeted message(s)
    #[error("Not permitted: {0}")]
    Unauthorized(String),

    // ========================================================================
    // Not found
    // ========================================================================

    /// Message does not exist (never existed or was deleted for everyone)
    #[error("Message not found: {0}")]
    MessageNotFound(i64),

    /// Identity is unknown to the directory or inactive
    #[error("User not found: {0}")]
    UserNotFound(String),

    // ========================================================================
    // Storage
    // ========================================================================

    /// The underlying database failed
    #[error("Database error: {0}")]
    Database(String),
}

impl Error {
    /// Taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingField(_)
            | Error::InvalidContent(_)
            | Error::InvalidBatch(_)
            | Error::InvalidFrame(_) => ErrorKind::Validation,
            Error::IdentityMismatch | Error::Unauthorized(_) => ErrorKind::Authorization,
            Error::MessageNotFound(_) | Error::UserNotFound(_) => ErrorKind::NotFound,
            Error::Database(_) => ErrorKind::Storage,
        }
    }

    /// Stable code placed in error frames and HTTP bodies.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Validation => "validation",
            ErrorKind::Authorization => "unauthorized",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Storage => "storage",
        }
    }

    /// Log a failed `operation` at a level matching its kind.
    pub fn log(&self, operation: &str, user_id: &str) {
        match self.kind() {
            ErrorKind::Storage => {
                tracing::error!(user_id = user_id, operation = operation, error = %self, "Operation failed")
            }
            ErrorKind::Authorization => {
                tracing::warn!(user_id = user_id, operation = operation, error = %self, "Operation rejected")
            }
            ErrorKind::Validation | ErrorKind::NotFound => {
                tracing::debug!(user_id = user_id, operation = operation, error = %self, "Operation rejected")
            }
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Database(format!("Storage task failed: {}", e))
    }
}
