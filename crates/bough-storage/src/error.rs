//! Storage error types.

use thiserror::Error;

/// Errors that can occur while reading or writing objects.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested object does not exist.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// The object exists but has a different type than required.
    #[error("object {id} is a {actual}, expected a {expected}")]
    TypeMismatch {
        /// Hex id of the object.
        id: String,
        /// Type the caller asked for.
        expected: &'static str,
        /// Type actually stored.
        actual: &'static str,
    },

    /// Malformed object data or identifier.
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// Compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(String),
}
