//! Storage error types.

/// Errors from storage operations.
///
/// Variants carry rendered messages rather than source errors so that a
/// single failure can be cloned out to every caller coalesced behind it
/// (write lanes, deferred replay queues).
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// Opening or initializing a storage backend failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// A host I/O operation failed.
    #[error("i/o error: {0}")]
    Io(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The collection name or key is invalid.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A storage operation failed.
    #[error("storage error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
