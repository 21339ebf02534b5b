//! Common error types for drivelink.

use thiserror::Error;

/// Top-level error type for drive and authentication operations.
///
/// Every operation reports failure through this one type, so callers can tell
/// a missing item from a name conflict or an authentication problem without
/// inspecting sentinel values.
#[derive(Debug, Error)]
pub enum Error {
    /// Token acquisition failed or the server rejected the token.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The request never produced an HTTP response.
    #[error("Network error: {0}")]
    Network(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The server reported a naming conflict (HTTP 409).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Any other non-success status.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// A parsed item was not the variant the caller asked for.
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error means the addressed item does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Whether this error is a server-side naming conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
