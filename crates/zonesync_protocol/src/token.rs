//! Opaque change tokens.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque position in a change stream, issued by the remote service.
///
/// Tokens are persisted and echoed back verbatim on the next fetch; the
/// engine never inspects their contents. Two tokens compare equal only when
/// they are byte-identical. A token the service no longer recognizes is
/// reported as expired and must be discarded, forcing a full refetch.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeToken(Vec<u8>);

impl ChangeToken {
    /// Wraps raw token bytes received from the service.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes for persistence or echoing back.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the token, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for ChangeToken {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

// Tokens are opaque; Debug shows only the length.
impl fmt::Debug for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeToken({} bytes)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_byte_identity() {
        let a = ChangeToken::new(vec![1, 2, 3]);
        let b = ChangeToken::new(vec![1, 2, 3]);
        let c = ChangeToken::new(vec![1, 2, 4]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn debug_hides_payload() {
        let token = ChangeToken::new(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(format!("{token:?}"), "ChangeToken(4 bytes)");
    }
}
