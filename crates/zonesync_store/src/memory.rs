//! In-memory store implementations for tests and demos.

use crate::blob::BlobStore;
use crate::entity::{EntityFilter, EntityWrite, LocalEntity};
use crate::entity_store::EntityStore;
use crate::error::StoreResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use zonesync_protocol::RecordId;

/// An in-memory [`BlobStore`].
///
/// Nothing survives the process; useful for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.blobs.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.blobs.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.blobs.write().remove(key);
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.blobs.read().len())
    }
}

/// An in-memory [`EntityStore`].
///
/// The single write lock makes `apply` trivially atomic.
#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    entities: RwLock<BTreeMap<RecordId, LocalEntity>>,
}

impl MemoryEntityStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntityStore for MemoryEntityStore {
    fn get(&self, id: &RecordId) -> StoreResult<Option<LocalEntity>> {
        Ok(self.entities.read().get(id).cloned())
    }

    fn select(&self, filter: &EntityFilter) -> StoreResult<Vec<LocalEntity>> {
        Ok(self
            .entities
            .read()
            .values()
            .filter(|entity| filter.matches(entity))
            .cloned()
            .collect())
    }

    fn apply(&self, writes: &[EntityWrite]) -> StoreResult<()> {
        let mut entities = self.entities.write();
        for write in writes {
            match write {
                EntityWrite::Upsert(entity) => {
                    entities.insert(entity.id.clone(), entity.clone());
                }
                EntityWrite::Delete(id) => {
                    entities.remove(id);
                }
            }
        }
        Ok(())
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.entities.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_store_roundtrip() {
        let store = MemoryBlobStore::new();
        assert_eq!(store.get("k").unwrap(), None);

        store.put("k", b"value").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"value".to_vec()));
        assert_eq!(store.len().unwrap(), 1);

        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn blob_remove_missing_is_noop() {
        let store = MemoryBlobStore::new();
        store.remove("missing").unwrap();
    }

    #[test]
    fn entity_store_upsert_and_get() {
        let store = MemoryEntityStore::new();
        let entity = LocalEntity::new(RecordId::new("a"), "Note");

        store.apply(&[EntityWrite::Upsert(entity.clone())]).unwrap();
        assert_eq!(store.get(&RecordId::new("a")).unwrap(), Some(entity));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn entity_store_delete_removes_row() {
        let store = MemoryEntityStore::new();
        let entity = LocalEntity::new(RecordId::new("a"), "Note");

        store.apply(&[EntityWrite::Upsert(entity)]).unwrap();
        store.apply(&[EntityWrite::Delete(RecordId::new("a"))]).unwrap();
        assert_eq!(store.get(&RecordId::new("a")).unwrap(), None);

        // Deleting again is a no-op.
        store.apply(&[EntityWrite::Delete(RecordId::new("a"))]).unwrap();
    }

    #[test]
    fn select_filters_and_orders_by_id() {
        let store = MemoryEntityStore::new();
        let mut a = LocalEntity::new(RecordId::new("a"), "Note");
        a.synced = true;
        let b = LocalEntity::new(RecordId::new("b"), "Task");
        let c = LocalEntity::new(RecordId::new("c"), "Note");

        store
            .apply(&[
                EntityWrite::Upsert(c),
                EntityWrite::Upsert(a),
                EntityWrite::Upsert(b),
            ])
            .unwrap();

        let notes = store
            .select(&EntityFilter::any().with_record_type("Note"))
            .unwrap();
        let ids: Vec<&str> = notes.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);

        let unsynced = store.select(&EntityFilter::any().with_synced(false)).unwrap();
        assert_eq!(unsynced.len(), 2);
    }

    #[test]
    fn batched_writes_apply_in_order() {
        let store = MemoryEntityStore::new();
        let entity = LocalEntity::new(RecordId::new("a"), "Note");

        // Upsert then delete in one batch leaves nothing behind.
        store
            .apply(&[
                EntityWrite::Upsert(entity),
                EntityWrite::Delete(RecordId::new("a")),
            ])
            .unwrap();
        assert!(store.is_empty().unwrap());
    }
}
