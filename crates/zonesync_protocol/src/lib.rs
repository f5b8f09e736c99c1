//! # Zonesync Protocol
//!
//! Record, zone, and change-set types shared by the sync engine and the
//! remote record service.
//!
//! This crate provides:
//! - `RemoteRecord` and `FieldValue` for service-side records
//! - `ZoneId` and `DatabaseScope` for zone-scoped grouping
//! - `ChangeToken` as an opaque incremental-fetch position
//! - Change pages and batches for delta fetch
//! - The remote error taxonomy (`RemoteError`, `ItemFailure`, `ConflictCase`)
//! - Share metadata for cross-user record sharing
//!
//! This is a pure protocol crate with no I/O operations. Record mirrors are
//! serialized with CBOR so server-assigned metadata survives a round trip
//! through local storage byte-for-byte.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod changes;
mod error;
mod record;
mod share;
mod token;
mod zone;

pub use changes::{
    ChangeBatch, DatabaseChangesPage, ModifyOutcome, ZoneChangeRequest, ZoneChangesPage,
    ZoneFetchStatus,
};
pub use error::{
    ConflictCase, ItemFailure, ProtocolError, ProtocolResult, RemoteError, RemoteResult,
};
pub use record::{FieldValue, RecordId, RemoteRecord};
pub use share::{
    share_id_for, ShareHandle, ShareMetadata, SHARE_PERMISSION_FIELD, SHARE_RECORD_TYPE,
    SHARE_ROOT_FIELD,
};
pub use token::ChangeToken;
pub use zone::{DatabaseScope, ZoneId, DEFAULT_OWNER_NAME};
