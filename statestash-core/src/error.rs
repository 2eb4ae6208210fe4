/*!
Error types for the statestash core engine.
*/

use thiserror::Error;

/// Result type used throughout the statestash core.
pub type Result<T> = std::result::Result<T, PersistError>;

/// Errors that can occur while restoring or saving store state.
///
/// None of these escape the persistence pipeline once a store is installed:
/// the coordinator logs them and degrades to "nothing was persisted this time".
/// They are surfaced directly by the building blocks (codec, adapters,
/// serializers) and by configuration validation.
#[derive(Error, Debug)]
pub enum PersistError {
    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed compressed input
    #[error("Compression error: {0}")]
    Compression(String),

    /// The storage backend refused the availability probe
    #[error("Storage backend '{backend}' is not available")]
    BackendUnavailable { backend: String },

    /// The backend ran out of space for the requested write
    #[error("Storage quota exceeded: {needed} bytes needed, {quota} bytes allowed")]
    QuotaExceeded { needed: usize, quota: usize },

    /// Storage adapter errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Errors raised by a serializer, including custom ones
    #[error("Serializer error: {0}")]
    Serializer(String),

    /// Persisted data does not have the expected shape
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Configuration errors
    #[error("Validation error: {0}")]
    Validation(String),
}

impl PersistError {
    /// Create a new compression error
    pub fn compression<S: Into<String>>(msg: S) -> Self {
        Self::Compression(msg.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new serializer error
    pub fn serializer<S: Into<String>>(msg: S) -> Self {
        Self::Serializer(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new invalid format error
    pub fn invalid_format<S: Into<String>>(msg: S) -> Self {
        Self::InvalidFormat(msg.into())
    }

    /// Create a new backend unavailable error
    pub fn backend_unavailable<S: Into<String>>(backend: S) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
        }
    }
}
