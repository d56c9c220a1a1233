//! Common error types for CoreCloud.

use thiserror::Error;

/// Top-level error type for CoreCloud operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed declared metadata or an unsupported request shape.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or invalid identity or wrapping key.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Requested byte range lies outside the plaintext file.
    #[error("Range not satisfiable for a file of {size} bytes")]
    RangeNotSatisfiable { size: u64 },

    /// Authentication tag mismatch on unwrap/open, or a failed seal.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Observed content disagrees with the declared size or checksum.
    #[error("Integrity mismatch: {0}")]
    IntegrityMismatch(String),

    /// Physical storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Record store operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether the failure was caused by the caller's input rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::Auth(_)
                | Error::NotFound(_)
                | Error::RangeNotSatisfiable { .. }
                | Error::Crypto(_)
                | Error::IntegrityMismatch(_)
        )
    }

    /// Whether repeating the same operation could succeed.
    ///
    /// Cryptographic and integrity failures are never retryable: a retry
    /// could hide real data loss, so the caller has to re-upload instead.
    pub fn should_retry(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Database(_) | Error::Io(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
