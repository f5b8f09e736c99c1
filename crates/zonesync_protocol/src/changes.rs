//! Change pages and batches for delta fetch.

use crate::record::{RecordId, RemoteRecord};
use crate::token::ChangeToken;
use crate::zone::ZoneId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Records changed and deleted within one fetched page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Records created or updated since the request token.
    pub changed: Vec<RemoteRecord>,
    /// Ids of records deleted since the request token.
    pub deleted: Vec<RecordId>,
}

impl ChangeBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the batch carries no changes.
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }

    /// Enforces delete-wins: a record reported both changed and deleted in
    /// the same batch survives only in the deleted set.
    pub fn normalize(&mut self) {
        if self.changed.is_empty() || self.deleted.is_empty() {
            return;
        }
        let deleted: BTreeSet<&RecordId> = self.deleted.iter().collect();
        self.changed.retain(|record| !deleted.contains(&record.id));
    }
}

/// One page of database-level changes: which zones have new content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseChangesPage {
    /// Zones with record changes to fetch.
    pub zones_changed: Vec<ZoneId>,
    /// Zones deleted on the server since the request token.
    pub zones_deleted: Vec<ZoneId>,
    /// Token to persist once this page is handled.
    pub token: ChangeToken,
    /// Whether another page is waiting.
    pub more: bool,
}

/// Per-zone fetch request: the zone plus the last token seen for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneChangeRequest {
    /// Zone to fetch.
    pub zone: ZoneId,
    /// Last committed token for the zone; `None` fetches from the beginning.
    pub token: Option<ChangeToken>,
}

impl ZoneChangeRequest {
    /// Creates a request for one zone.
    pub fn new(zone: ZoneId, token: Option<ChangeToken>) -> Self {
        Self { zone, token }
    }
}

/// Outcome status of a single zone's fetch within a multi-zone request.
///
/// Token expiry is reported per zone rather than failing the whole request,
/// matching services that complete each zone independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneFetchStatus {
    /// The page is valid and its token may be committed.
    Ok,
    /// The request token was too old; discard it and refetch the zone.
    TokenExpired,
}

/// One page of record changes for a single zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneChangesPage {
    /// Zone this page belongs to.
    pub zone: ZoneId,
    /// Changed and deleted records in this page.
    pub batch: ChangeBatch,
    /// Token to persist once the batch is durably applied.
    pub token: ChangeToken,
    /// Whether the zone has another page waiting.
    pub more: bool,
    /// Per-zone outcome; the batch is meaningless unless `Ok`.
    pub status: ZoneFetchStatus,
}

/// Result of a successful modify call: canonical server-side state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModifyOutcome {
    /// Saved records as the server now holds them (fresh change tags).
    pub saved: Vec<RemoteRecord>,
    /// Ids whose deletion the server confirmed.
    pub deleted: Vec<RecordId>,
}
