//! Local sync state: entities, mirrors, tokens, and the writer gate.
//!
//! `SyncStateStore` is the single place where local state changes during
//! sync. It owns the entity store, the record mirror cache, and the token
//! bookkeeping, and it serializes every mutation through one writer gate so
//! fetch and push can run on different worker threads without interleaving
//! partial batches.
//!
//! # Key Invariants
//!
//! - All writes happen under the writer gate; reads do not take it.
//! - `apply_zone_batch` persists records, then mirrors, then the zone token,
//!   in that order, so a crash can replay a page but never skip one.
//! - Bookkeeping lives in dedicated entity columns, never in the field map;
//!   descriptors reject the reserved names at registration.
//! - Outgoing records carry exactly the descriptor-listed fields.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use zonesync_protocol::{
    ChangeBatch, ChangeToken, DatabaseScope, FieldValue, RecordId, RemoteRecord, ZoneId,
    SHARE_PERMISSION_FIELD, SHARE_RECORD_TYPE, SHARE_ROOT_FIELD,
};
use zonesync_store::{
    BlobStore, EntityDescriptor, EntityFilter, EntityStore, EntityWrite, LocalEntity, StoreError,
};

use crate::error::{SyncError, SyncResult};
use crate::meta::MetaStore;
use crate::record_cache::RecordCache;

/// Current wall-clock time in unix milliseconds.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Counts of applied changes, returned by [`SyncStateStore::apply_zone_batch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyCounts {
    /// Records upserted from the batch.
    pub changed: usize,
    /// Records removed from the batch.
    pub deleted: usize,
}

/// Local persistence for the engine: entities, record mirrors, change
/// tokens, and the registered descriptor tables.
pub struct SyncStateStore {
    entities: Arc<dyn EntityStore>,
    cache: RecordCache,
    meta: MetaStore,
    registry: RwLock<BTreeMap<String, EntityDescriptor>>,
    writer: Mutex<()>,
}

impl SyncStateStore {
    /// Creates a state store over the given entity and blob stores.
    ///
    /// The blob store carries record mirrors, change tokens, and setup
    /// flags under disjoint key prefixes.
    pub fn new(entities: Arc<dyn EntityStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            entities,
            cache: RecordCache::new(Arc::clone(&blobs)),
            meta: MetaStore::new(blobs),
            registry: RwLock::new(BTreeMap::new()),
            writer: Mutex::new(()),
        }
    }

    pub(crate) fn meta(&self) -> &MetaStore {
        &self.meta
    }

    pub(crate) fn cache(&self) -> &RecordCache {
        &self.cache
    }

    /// Registers the field table for one record type.
    ///
    /// # Errors
    ///
    /// Returns an error when the table uses reserved or duplicate field
    /// names.
    pub fn register(&self, descriptor: EntityDescriptor) -> SyncResult<()> {
        descriptor.validate()?;
        self.registry
            .write()
            .insert(descriptor.record_type.clone(), descriptor);
        Ok(())
    }

    pub(crate) fn descriptor_for(&self, record_type: &str) -> Option<EntityDescriptor> {
        self.registry.read().get(record_type).cloned()
    }

    /// Reads one entity by id.
    pub fn entity(&self, id: &RecordId) -> SyncResult<Option<LocalEntity>> {
        Ok(self.entities.get(id)?)
    }

    /// Returns all entities matching the filter, ordered by id.
    pub fn entities(&self, filter: &EntityFilter) -> SyncResult<Vec<LocalEntity>> {
        Ok(self.entities.select(filter)?)
    }

    /// Writes an entity on behalf of the application.
    ///
    /// `fields` replaces the entity's whole field map. The write clears the
    /// synced flag and stamps the modification time, so the next push picks
    /// the entity up. Works whether or not the engine is running.
    ///
    /// # Errors
    ///
    /// Fails when no descriptor is registered for `record_type`, when a
    /// field is undeclared or of the wrong kind, or when the entity is
    /// shared read-only.
    pub fn save_local(
        &self,
        id: &RecordId,
        record_type: &str,
        fields: BTreeMap<String, FieldValue>,
    ) -> SyncResult<()> {
        let descriptor = self
            .descriptor_for(record_type)
            .ok_or_else(|| SyncError::unregistered_type(record_type))?;
        for (name, value) in &fields {
            match descriptor.field_spec(name) {
                None => {
                    return Err(StoreError::invalid_descriptor(
                        record_type,
                        format!("field '{name}' is not declared"),
                    )
                    .into());
                }
                Some(spec) if !spec.kind.matches(value) => {
                    return Err(StoreError::invalid_descriptor(
                        record_type,
                        format!("field '{name}' holds a {} value", value.kind_name()),
                    )
                    .into());
                }
                Some(_) => {}
            }
        }

        let _gate = self.writer.lock();
        let mut entity = match self.entities.get(id)? {
            Some(existing) => {
                if !existing.read_write {
                    return Err(SyncError::ReadOnlyRecord {
                        record_id: id.clone(),
                    });
                }
                existing
            }
            None => LocalEntity::new(id.clone(), record_type),
        };
        entity.record_type = record_type.to_string();
        entity.fields = fields;
        entity.deleted = false;
        entity.synced = false;
        entity.modified_at = now_millis();
        self.entities.apply(&[EntityWrite::Upsert(entity)])?;
        Ok(())
    }

    /// Tombstones an entity so the next push deletes it remotely.
    ///
    /// Deleting an absent entity is a no-op.
    ///
    /// # Errors
    ///
    /// Fails when the entity is shared read-only or the store fails.
    pub fn delete_local(&self, id: &RecordId) -> SyncResult<()> {
        let _gate = self.writer.lock();
        let Some(mut entity) = self.entities.get(id)? else {
            return Ok(());
        };
        if !entity.read_write {
            return Err(SyncError::ReadOnlyRecord {
                record_id: id.clone(),
            });
        }
        entity.deleted = true;
        entity.synced = false;
        entity.modified_at = now_millis();
        self.entities.apply(&[EntityWrite::Upsert(entity)])?;
        Ok(())
    }

    /// Applies one fetched page of zone changes and advances the zone token.
    ///
    /// The batch is normalized first (a delete beats a change to the same
    /// id), entity writes are applied atomically, mirrors follow, and the
    /// token is persisted last. Records of unregistered types are skipped
    /// with a warning. Share records update the permission of their root
    /// entity instead of becoming entities themselves.
    pub fn apply_zone_batch(
        &self,
        scope: DatabaseScope,
        zone: &ZoneId,
        mut batch: ChangeBatch,
        token: &ChangeToken,
    ) -> SyncResult<ApplyCounts> {
        batch.normalize();
        let _gate = self.writer.lock();

        let mut writes = Vec::new();
        let mut applied = Vec::new();
        let mut shares = Vec::new();
        for record in &batch.changed {
            if record.record_type == SHARE_RECORD_TYPE {
                shares.push(record);
                continue;
            }
            let Some(descriptor) = self.descriptor_for(&record.record_type) else {
                warn!(
                    record = %record.id,
                    record_type = %record.record_type,
                    "skipping change for unregistered record type"
                );
                continue;
            };
            let existing = self.entities.get(&record.id)?;
            writes.push(EntityWrite::Upsert(entity_from_record(
                record, existing, &descriptor,
            )));
            applied.push(record);
        }
        for id in &batch.deleted {
            writes.push(EntityWrite::Delete(id.clone()));
        }
        self.entities.apply(&writes)?;

        for record in &shares {
            self.apply_share_record(record)?;
        }
        for record in &applied {
            self.cache.store(record)?;
        }
        for id in &batch.deleted {
            self.cache.remove(id)?;
        }

        self.meta.set_zone_token(scope, zone, token)?;
        Ok(ApplyCounts {
            changed: applied.len() + shares.len(),
            deleted: batch.deleted.len(),
        })
    }

    /// Re-adopts a server record as local truth, mirror included.
    ///
    /// Used when a conflict turns out spurious: the server already holds
    /// what the client sent, so the local row takes the server copy and the
    /// synced flag.
    pub fn adopt_server_record(&self, record: &RemoteRecord) -> SyncResult<()> {
        let _gate = self.writer.lock();
        if record.record_type == SHARE_RECORD_TYPE {
            return self.apply_share_record(record);
        }
        if let Some(descriptor) = self.descriptor_for(&record.record_type) {
            let existing = self.entities.get(&record.id)?;
            let entity = entity_from_record(record, existing, &descriptor);
            self.entities.apply(&[EntityWrite::Upsert(entity)])?;
        }
        self.cache.store(record)?;
        Ok(())
    }

    /// Caller holds the writer gate.
    fn apply_share_record(&self, record: &RemoteRecord) -> SyncResult<()> {
        let read_write = record
            .field(SHARE_PERMISSION_FIELD)
            .and_then(FieldValue::as_bool)
            .unwrap_or(false);
        let root = record
            .field(SHARE_ROOT_FIELD)
            .and_then(FieldValue::as_text)
            .map(RecordId::from);
        match root {
            Some(root) => match self.entities.get(&root)? {
                Some(mut entity) => {
                    if entity.read_write != read_write {
                        entity.read_write = read_write;
                        self.entities.apply(&[EntityWrite::Upsert(entity)])?;
                    }
                }
                None => warn!(
                    share = %record.id,
                    root = %root,
                    "share record arrived before its root record"
                ),
            },
            None => warn!(share = %record.id, "share record carries no root pointer"),
        }
        self.cache.store(record)?;
        Ok(())
    }

    /// Entities with unpushed edits in the given scope.
    pub(crate) fn unsynced_saves(&self, shared: bool) -> SyncResult<Vec<LocalEntity>> {
        let filter = EntityFilter::any()
            .with_synced(false)
            .with_deleted(false)
            .with_shared(shared);
        Ok(self.entities.select(&filter)?)
    }

    /// Tombstones with unpushed deletes in the given scope.
    pub(crate) fn unsynced_deletes(&self, shared: bool) -> SyncResult<Vec<LocalEntity>> {
        let filter = EntityFilter::any()
            .with_synced(false)
            .with_deleted(true)
            .with_shared(shared);
        Ok(self.entities.select(&filter)?)
    }

    /// Builds the outgoing record for one unsynced entity.
    ///
    /// When a mirror exists the record is built on the mirrored skeleton so
    /// the server sees the change tag it assigned; otherwise a fresh
    /// skeleton is created in `default_zone`. Field values are copied per
    /// the descriptor table, nothing else; an optional field absent locally
    /// is removed from the record so it clears remotely.
    ///
    /// # Errors
    ///
    /// Fails for a shared entity without a mirror (no way to address the
    /// owner's zone) and for an unregistered record type.
    pub(crate) fn build_outgoing(
        &self,
        entity: &LocalEntity,
        default_zone: &ZoneId,
    ) -> SyncResult<RemoteRecord> {
        let descriptor = self
            .descriptor_for(&entity.record_type)
            .ok_or_else(|| SyncError::unregistered_type(&entity.record_type))?;
        let mut record = match self.cache.load(&entity.id)? {
            Some(mirror) => mirror,
            None if entity.is_shared() => {
                return Err(SyncError::MissingMirror {
                    record_id: entity.id.clone(),
                });
            }
            None => RemoteRecord::new(
                entity.id.clone(),
                entity.record_type.clone(),
                default_zone.clone(),
            ),
        };
        for spec in &descriptor.fields {
            match entity.field(&spec.name) {
                Some(value) => {
                    record.fields.insert(spec.name.clone(), value.clone());
                }
                None if spec.optional => {
                    record.fields.remove(&spec.name);
                }
                None => {}
            }
        }
        Ok(record)
    }

    /// Records server confirmation of saved records.
    ///
    /// Mirrors are always refreshed. The entity's synced flag is set only
    /// when the row still exists, is not tombstoned, and has not been
    /// modified since the push was built (`baselines` maps record id to the
    /// `modified_at` the push captured; a record without a baseline is
    /// marked unconditionally).
    pub(crate) fn mark_saved(
        &self,
        records: &[RemoteRecord],
        baselines: &BTreeMap<RecordId, i64>,
    ) -> SyncResult<()> {
        let _gate = self.writer.lock();
        let mut writes = Vec::new();
        for record in records {
            self.cache.store(record)?;
            let Some(mut row) = self.entities.get(&record.id)? else {
                continue;
            };
            if row.deleted {
                continue;
            }
            let baseline = baselines.get(&record.id).copied().unwrap_or(i64::MAX);
            if row.modified_at <= baseline {
                row.synced = true;
                writes.push(EntityWrite::Upsert(row));
            }
        }
        self.entities.apply(&writes)?;
        Ok(())
    }

    /// Purges tombstones whose remote deletes the server confirmed.
    ///
    /// Rows that were revived locally while the push was in flight keep
    /// their row but lose the mirror, since the server-side record is gone
    /// and the next push must create it fresh.
    pub(crate) fn purge_confirmed_deletes(&self, ids: &[RecordId]) -> SyncResult<()> {
        let _gate = self.writer.lock();
        let mut writes = Vec::new();
        for id in ids {
            self.cache.remove(id)?;
            if let Some(row) = self.entities.get(id)? {
                if row.deleted {
                    writes.push(EntityWrite::Delete(id.clone()));
                }
            }
        }
        self.entities.apply(&writes)?;
        Ok(())
    }

    /// Drops the cached mirror for a record, e.g. after the server reported
    /// the record unknown and the next save must be a fresh create.
    pub(crate) fn strip_mirror(&self, id: &RecordId) -> SyncResult<()> {
        self.cache.remove(id)
    }

    /// Removes all local traces of a zone the server deleted: the owner's
    /// entities, their mirrors, and the zone token. Returns the number of
    /// purged entities.
    pub(crate) fn purge_zone(&self, scope: DatabaseScope, zone: &ZoneId) -> SyncResult<usize> {
        let _gate = self.writer.lock();
        let rows = self
            .entities
            .select(&EntityFilter::any().with_owner(zone.owner.clone()))?;
        let writes: Vec<EntityWrite> = rows
            .iter()
            .map(|row| EntityWrite::Delete(row.id.clone()))
            .collect();
        self.entities.apply(&writes)?;
        for row in &rows {
            // The root mirror is the only pointer to a share record's
            // mirror, so chase it before dropping.
            if let Some(mirror) = self.cache.load(&row.id)? {
                if let Some(share_id) = &mirror.share {
                    self.cache.remove(share_id)?;
                }
            }
            self.cache.remove(&row.id)?;
        }
        self.meta.clear_zone_token(scope, zone)?;
        Ok(rows.len())
    }
}

/// Builds the local row for an incoming record, preserving the existing
/// row's permission when one exists.
fn entity_from_record(
    record: &RemoteRecord,
    existing: Option<LocalEntity>,
    descriptor: &EntityDescriptor,
) -> LocalEntity {
    let mut entity = existing
        .unwrap_or_else(|| LocalEntity::new(record.id.clone(), record.record_type.clone()));
    entity.record_type = record.record_type.clone();
    entity.owner_name = record.zone.owner.clone();
    entity.synced = true;
    entity.deleted = false;
    entity.modified_at = now_millis();
    for spec in &descriptor.fields {
        match record.field(&spec.name) {
            Some(value) if spec.kind.matches(value) => {
                entity.fields.insert(spec.name.clone(), value.clone());
            }
            Some(value) => warn!(
                record = %record.id,
                field = %spec.name,
                kind = value.kind_name(),
                "field kind mismatch, keeping local value"
            ),
            None if spec.optional => {
                entity.fields.remove(&spec.name);
            }
            None => {}
        }
    }
    entity
}
