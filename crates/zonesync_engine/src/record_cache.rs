//! Cache of last-known server records.
//!
//! Every record applied from a fetch, and every record confirmed by a push,
//! is mirrored here in its wire form. The mirror serves two purposes:
//!
//! - It supplies the server change tag when the engine builds an outgoing
//!   save, so the server can detect concurrent writers.
//! - It preserves server-managed fields (creator, share pointer) that the
//!   local entity row does not carry.
//!
//! Mirrors are keyed by record id under a dedicated prefix so they share a
//! [`BlobStore`] with sync tokens and flags without colliding.

use std::sync::Arc;

use zonesync_protocol::{RecordId, RemoteRecord};
use zonesync_store::BlobStore;

use crate::error::SyncResult;

/// Prefix for mirror keys in the backing blob store.
const MIRROR_PREFIX: &str = "mirror/";

/// Persistent map from record id to the last server-confirmed record.
pub struct RecordCache {
    blobs: Arc<dyn BlobStore>,
}

impl RecordCache {
    /// Creates a cache over the given blob store.
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    fn key(id: &RecordId) -> String {
        format!("{MIRROR_PREFIX}{id}")
    }

    /// Stores `record` as the last-known server state for its id.
    pub fn store(&self, record: &RemoteRecord) -> SyncResult<()> {
        let bytes = record.to_mirror_bytes()?;
        self.blobs.put(&Self::key(&record.id), &bytes)?;
        Ok(())
    }

    /// Loads the mirrored record for `id`, if one exists.
    pub fn load(&self, id: &RecordId) -> SyncResult<Option<RemoteRecord>> {
        match self.blobs.get(&Self::key(id))? {
            Some(bytes) => Ok(Some(RemoteRecord::from_mirror_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Removes the mirror for `id`. Removing an absent mirror is a no-op.
    pub fn remove(&self, id: &RecordId) -> SyncResult<()> {
        self.blobs.remove(&Self::key(id))?;
        Ok(())
    }
}
