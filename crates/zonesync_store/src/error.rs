//! Error types for local storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the local stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Stored bytes could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Another process holds the store directory lock.
    #[error("store directory is locked by another process")]
    DirectoryLocked,

    /// The store path is missing or not a directory.
    #[error("invalid store path: {0}")]
    InvalidPath(String),

    /// An entity descriptor is malformed.
    #[error("invalid descriptor for '{record_type}': {message}")]
    InvalidDescriptor {
        /// Record type the descriptor declares.
        record_type: String,
        /// What is wrong with it.
        message: String,
    },
}

impl StoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        StoreError::Codec(message.into())
    }

    /// Creates a descriptor validation error.
    pub fn invalid_descriptor(record_type: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::InvalidDescriptor {
            record_type: record_type.into(),
            message: message.into(),
        }
    }
}
