//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A collection file could not be decoded.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the data directory lock.
    #[error("data directory locked: another process has exclusive access")]
    Locked,

    /// The collection name cannot be used by this backend.
    #[error("invalid collection name: {0:?}")]
    InvalidName(String),

    /// The store has been closed.
    #[error("storage is closed")]
    Closed,
}
