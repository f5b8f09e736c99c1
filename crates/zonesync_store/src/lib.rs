//! # Zonesync Store
//!
//! Local storage traits and implementations for the zonesync engine.
//!
//! This crate provides:
//! - `LocalEntity`, the locally stored object with its sync bookkeeping
//! - `EntityDescriptor` field tables describing each syncable type
//! - `EntityStore`, the keyed object store the engine reconciles
//! - `BlobStore`, the key-value store backing mirrors, tokens, and flags
//! - In-memory implementations of both, plus a file-backed blob store
//!
//! The engine treats both stores as opaque collaborators: a host
//! application can supply its own durable implementations as long as the
//! trait invariants hold (atomic `apply`, read-your-writes `put`).

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod blob;
mod descriptor;
mod entity;
mod entity_store;
mod error;
mod file;
mod memory;

pub use blob::BlobStore;
pub use descriptor::{EntityDescriptor, FieldKind, FieldSpec};
pub use entity::{is_reserved_field, EntityFilter, EntityWrite, LocalEntity, RESERVED_FIELD_NAMES};
pub use entity_store::EntityStore;
pub use error::{StoreError, StoreResult};
pub use file::FileBlobStore;
pub use memory::{MemoryBlobStore, MemoryEntityStore};
