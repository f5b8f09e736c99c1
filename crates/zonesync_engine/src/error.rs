//! Error types for the sync engine.

use std::time::Duration;
use thiserror::Error;
use zonesync_protocol::{ProtocolError, RecordId, RemoteError};
use zonesync_store::StoreError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote service rejected or failed an operation.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// A local store failed. The in-progress transaction is abandoned;
    /// previously committed batches and tokens are untouched.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Record mirror bytes could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),

    /// The engine is stopped; remote work is refused.
    #[error("engine is stopped")]
    Disabled,

    /// A change token expired again right after being reset.
    #[error("change token expired again after reset ({context})")]
    TokenResetExhausted {
        /// Which fetch hit the bound.
        context: String,
    },

    /// A conflict could not be resolved within the resubmission bound.
    #[error("conflict for record {record_id} unresolved after {rounds} resubmission round(s)")]
    ConflictUnresolved {
        /// Record still in conflict.
        record_id: RecordId,
        /// Rounds attempted.
        rounds: u32,
    },

    /// No descriptor is registered for a record type being written locally.
    #[error("no descriptor registered for record type '{0}'")]
    UnregisteredType(String),

    /// A local write targeted a shared record the user may not modify.
    #[error("record {record_id} is read-only for this user")]
    ReadOnlyRecord {
        /// The record that was refused.
        record_id: RecordId,
    },

    /// A shared entity has no cached mirror, so no valid update request can
    /// be built for it.
    #[error("no cached mirror for shared record {record_id}")]
    MissingMirror {
        /// The record missing its mirror.
        record_id: RecordId,
    },
}

impl SyncError {
    /// Creates a token-reset-exhausted error.
    pub fn token_reset_exhausted(context: impl Into<String>) -> Self {
        SyncError::TokenResetExhausted {
            context: context.into(),
        }
    }

    /// Creates an unresolved-conflict error.
    pub fn conflict_unresolved(record_id: RecordId, rounds: u32) -> Self {
        SyncError::ConflictUnresolved { record_id, rounds }
    }

    /// Creates an unregistered-type error.
    pub fn unregistered_type(record_type: impl Into<String>) -> Self {
        SyncError::UnregisteredType(record_type.into())
    }

    /// Returns true when retrying the same operation later can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns the server-requested retry delay, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::Remote(e) => e.retry_after(),
            _ => None,
        }
    }

    /// Returns true when the error is a whole-database token expiry.
    pub fn is_token_expired(&self) -> bool {
        matches!(self, SyncError::Remote(RemoteError::TokenExpired))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_classifies_as_retryable() {
        let err = SyncError::from(RemoteError::Busy {
            retry_after: Duration::from_secs(5),
        });
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn token_expiry_classification() {
        assert!(SyncError::from(RemoteError::TokenExpired).is_token_expired());
        assert!(!SyncError::Disabled.is_token_expired());
    }

    #[test]
    fn local_errors_are_not_retryable() {
        assert!(!SyncError::Disabled.is_retryable());
        assert!(!SyncError::unregistered_type("Note").is_retryable());
        assert_eq!(SyncError::Disabled.retry_after(), None);
    }

    #[test]
    fn error_display() {
        let err = SyncError::conflict_unresolved(RecordId::new("note-1"), 3);
        assert!(err.to_string().contains("note-1"));
        assert!(err.to_string().contains('3'));

        assert_eq!(SyncError::Disabled.to_string(), "engine is stopped");
    }
}
