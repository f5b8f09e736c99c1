//! Locally stored entities and their sync bookkeeping.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zonesync_protocol::{FieldValue, RecordId, DEFAULT_OWNER_NAME};

/// Bookkeeping field names reserved by the engine.
///
/// These live on `LocalEntity` as dedicated columns and must never cross
/// into a remote record's field map, nor be declared in an
/// [`super::EntityDescriptor`].
pub const RESERVED_FIELD_NAMES: [&str; 5] =
    ["synced", "deleted", "ownerName", "readWrite", "modifiedAt"];

/// Returns true when `name` is one of the reserved bookkeeping fields.
pub fn is_reserved_field(name: &str) -> bool {
    RESERVED_FIELD_NAMES.contains(&name)
}

/// A locally stored object together with the engine's sync bookkeeping.
///
/// The id doubles as the remote record id, so local rows and remote records
/// address each other directly. `synced` is cleared by every local edit and
/// set again once the service confirms the save; `deleted` marks a
/// tombstone that survives until the remote delete is confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalEntity {
    /// Identifier, shared with the remote record.
    pub id: RecordId,
    /// Record type, matching a registered descriptor.
    pub record_type: String,
    /// Domain fields.
    pub fields: BTreeMap<String, FieldValue>,
    /// Last local modification, unix milliseconds.
    pub modified_at: i64,
    /// Tombstone: the object is gone locally but its remote delete is still
    /// pending.
    pub deleted: bool,
    /// Whether the remote service has confirmed the current state.
    pub synced: bool,
    /// Owner of the zone the object lives in.
    pub owner_name: String,
    /// Whether the local user may modify the object (always true for owned
    /// objects; follows the share permission for shared ones).
    pub read_write: bool,
}

impl LocalEntity {
    /// Creates a fresh, never-synced entity owned by the local user.
    pub fn new(id: RecordId, record_type: impl Into<String>) -> Self {
        Self {
            id,
            record_type: record_type.into(),
            fields: BTreeMap::new(),
            modified_at: 0,
            deleted: false,
            synced: false,
            owner_name: DEFAULT_OWNER_NAME.to_string(),
            read_write: true,
        }
    }

    /// Returns true when the entity lives in another user's zone.
    pub fn is_shared(&self) -> bool {
        self.owner_name != DEFAULT_OWNER_NAME
    }

    /// Returns a domain field by name.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Sets a domain field, replacing any previous value.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }
}

/// Predicate for [`super::EntityStore::select`]. Unset members match
/// everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityFilter {
    /// Match a single record type.
    pub record_type: Option<String>,
    /// Match on the synced flag.
    pub synced: Option<bool>,
    /// Match on the tombstone flag.
    pub deleted: Option<bool>,
    /// Match on shared-ness (owner differs from the local user).
    pub shared: Option<bool>,
    /// Match a single owner name.
    pub owner: Option<String>,
}

impl EntityFilter {
    /// Creates a filter that matches every entity.
    pub fn any() -> Self {
        Self::default()
    }

    /// Restricts to one record type.
    pub fn with_record_type(mut self, record_type: impl Into<String>) -> Self {
        self.record_type = Some(record_type.into());
        self
    }

    /// Restricts on the synced flag.
    pub fn with_synced(mut self, synced: bool) -> Self {
        self.synced = Some(synced);
        self
    }

    /// Restricts on the tombstone flag.
    pub fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = Some(deleted);
        self
    }

    /// Restricts on shared-ness.
    pub fn with_shared(mut self, shared: bool) -> Self {
        self.shared = Some(shared);
        self
    }

    /// Restricts to one owner.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Returns true when the entity satisfies every set member.
    pub fn matches(&self, entity: &LocalEntity) -> bool {
        if let Some(record_type) = &self.record_type {
            if &entity.record_type != record_type {
                return false;
            }
        }
        if let Some(synced) = self.synced {
            if entity.synced != synced {
                return false;
            }
        }
        if let Some(deleted) = self.deleted {
            if entity.deleted != deleted {
                return false;
            }
        }
        if let Some(shared) = self.shared {
            if entity.is_shared() != shared {
                return false;
            }
        }
        if let Some(owner) = &self.owner {
            if &entity.owner_name != owner {
                return false;
            }
        }
        true
    }
}

/// One row of an atomic multi-row write.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityWrite {
    /// Insert or replace the entity.
    Upsert(LocalEntity),
    /// Remove the row entirely (this is the physical purge, not the
    /// tombstone; tombstoning is an `Upsert` with `deleted` set).
    Delete(RecordId),
}
