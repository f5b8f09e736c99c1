//! Share records for cross-user access.

use crate::record::RecordId;
use crate::zone::ZoneId;
use serde::{Deserialize, Serialize};

/// Reserved record type of share records.
///
/// Share records are service bookkeeping, not domain data: on fetch they
/// update the permission of the record they govern and are cached, nothing
/// else.
pub const SHARE_RECORD_TYPE: &str = "zonesync.share";

/// Field on a share record holding the participant's write permission.
pub const SHARE_PERMISSION_FIELD: &str = "readWrite";

/// Field on a share record naming the root record it governs.
pub const SHARE_ROOT_FIELD: &str = "root";

/// Derives the deterministic share record id for a root record.
///
/// Deterministic so that repeated share attempts converge on one share
/// record per root.
pub fn share_id_for(root: &RecordId) -> RecordId {
    RecordId::new(format!("share-{root}"))
}

/// What a share acceptance flow hands the engine: enough to accept the
/// share server-side and know which zone to start fetching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareMetadata {
    /// Id of the share record being accepted.
    pub share_id: RecordId,
    /// The owner's zone the shared records live in.
    pub zone: ZoneId,
}

/// An established share, as surfaced to the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareHandle {
    /// Id of the share record.
    pub id: RecordId,
    /// Zone the shared records live in.
    pub zone: ZoneId,
    /// Whether the local participant may write.
    pub read_write: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_id_is_deterministic() {
        let root = RecordId::new("note-1");
        assert_eq!(share_id_for(&root), share_id_for(&root));
        assert_eq!(share_id_for(&root).as_str(), "share-note-1");
    }

    #[test]
    fn share_ids_differ_per_root() {
        assert_ne!(
            share_id_for(&RecordId::new("a")),
            share_id_for(&RecordId::new("b"))
        );
    }
}
