//! Remote error taxonomy and local codec errors.

use crate::record::{RecordId, RemoteRecord};
use crate::zone::ZoneId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Result alias for protocol-local operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Result alias for calls against the remote service.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors raised by the protocol crate itself (not by the service).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Mirror bytes could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },
}

impl ProtocolError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        ProtocolError::Codec {
            message: message.into(),
        }
    }
}

/// The server/client/ancestor triple attached to a rejected save.
///
/// `server_record` is what the service currently holds, `client_record` is
/// what the client tried to save, and `ancestor_record` is the common base
/// both diverged from, when the service still has it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictCase {
    /// Current server-side record.
    pub server_record: RemoteRecord,
    /// The record the client attempted to save.
    pub client_record: RemoteRecord,
    /// Common ancestor, if available.
    pub ancestor_record: Option<RemoteRecord>,
}

impl ConflictCase {
    /// Returns true when server and client carry the same change tag.
    ///
    /// The service occasionally rejects a save even though the client was
    /// current; adopting the server record resolves such a case without a
    /// resubmit.
    pub fn is_spurious(&self) -> bool {
        self.server_record.change_tag.is_some()
            && self.server_record.change_tag == self.client_record.change_tag
    }
}

/// Why one item inside a modify batch failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ItemFailure {
    /// The save carried a stale change tag; the triple explains the clash.
    Conflict(ConflictCase),
    /// A sibling item failed, so this one was not attempted; resubmit
    /// unmodified.
    BatchRequestFailed,
    /// The addressed record does not exist on the server.
    UnknownItem,
    /// Any other per-item failure.
    Other(String),
}

/// Errors returned by the remote record service.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum RemoteError {
    /// The change token is no longer recognized; discard it and refetch.
    #[error("change token expired")]
    TokenExpired,

    /// The caller is not allowed to perform the operation. Terminal.
    #[error("permission failure: {0}")]
    PermissionFailure(String),

    /// Some items in a modify batch failed; the rest were rolled back.
    #[error("partial failure: {} item(s) rejected", failures.len())]
    PartialFailure {
        /// Per-item failure reasons, keyed by record id.
        failures: BTreeMap<RecordId, ItemFailure>,
    },

    /// The service is under load; retry the whole operation after the delay.
    #[error("service busy, retry after {retry_after:?}")]
    Busy {
        /// Server-requested delay before retrying.
        retry_after: Duration,
    },

    /// The addressed zone does not exist in this database.
    #[error("zone not found: {0}")]
    ZoneNotFound(ZoneId),

    /// Any other service-side failure.
    #[error("service error: {0}")]
    Service(String),
}

impl RemoteError {
    /// Creates a generic service error.
    pub fn service(message: impl Into<String>) -> Self {
        RemoteError::Service(message.into())
    }

    /// Creates a partial failure from per-item reasons.
    pub fn partial(failures: BTreeMap<RecordId, ItemFailure>) -> Self {
        RemoteError::PartialFailure { failures }
    }

    /// Returns true when retrying the same operation later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Busy { .. })
    }

    /// Returns the server-requested retry delay, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::Busy { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, tag: Option<&str>) -> RemoteRecord {
        let mut r = RemoteRecord::new(RecordId::new(id), "Note", ZoneId::custom("z"));
        r.change_tag = tag.map(String::from);
        r
    }

    #[test]
    fn busy_is_retryable_with_delay() {
        let err = RemoteError::Busy {
            retry_after: Duration::from_secs(3),
        };
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn other_errors_are_not_retryable() {
        assert!(!RemoteError::TokenExpired.is_retryable());
        assert!(!RemoteError::service("boom").is_retryable());
        assert_eq!(RemoteError::TokenExpired.retry_after(), None);
    }

    #[test]
    fn matching_tags_are_spurious() {
        let case = ConflictCase {
            server_record: record("a", Some("tag-3")),
            client_record: record("a", Some("tag-3")),
            ancestor_record: None,
        };
        assert!(case.is_spurious());
    }

    #[test]
    fn differing_tags_are_real_conflicts() {
        let case = ConflictCase {
            server_record: record("a", Some("tag-4")),
            client_record: record("a", Some("tag-3")),
            ancestor_record: Some(record("a", Some("tag-3"))),
        };
        assert!(!case.is_spurious());
    }

    #[test]
    fn missing_tags_are_never_spurious() {
        let case = ConflictCase {
            server_record: record("a", None),
            client_record: record("a", None),
            ancestor_record: None,
        };
        assert!(!case.is_spurious());
    }

    #[test]
    fn partial_failure_counts_items() {
        let mut failures = BTreeMap::new();
        failures.insert(RecordId::new("a"), ItemFailure::UnknownItem);
        failures.insert(RecordId::new("b"), ItemFailure::BatchRequestFailed);
        let err = RemoteError::partial(failures);
        assert_eq!(err.to_string(), "partial failure: 2 item(s) rejected");
    }
}
