//! Per-database runtime state.
//!
//! The engine drives one mirror per database scope. A mirror tracks the
//! zones known to hold records for this client (discovered from
//! database-level change pages, plus the configured custom zone for the
//! private scope) and carries the fetch-coalescing flag for wake signals.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use zonesync_protocol::{DatabaseScope, ZoneId};

/// Runtime state for one database scope.
pub struct DatabaseMirror {
    scope: DatabaseScope,
    zones: RwLock<BTreeSet<ZoneId>>,
    fetch_in_flight: AtomicBool,
}

impl DatabaseMirror {
    /// Creates a mirror with no known zones.
    pub fn new(scope: DatabaseScope) -> Self {
        Self {
            scope,
            zones: RwLock::new(BTreeSet::new()),
            fetch_in_flight: AtomicBool::new(false),
        }
    }

    /// The database scope this mirror tracks.
    pub fn scope(&self) -> DatabaseScope {
        self.scope
    }

    /// Identifier of the change subscription for this database.
    pub fn subscription_id(&self) -> String {
        self.scope.subscription_id()
    }

    /// Returns true for the shared database.
    pub fn is_shared(&self) -> bool {
        self.scope == DatabaseScope::Shared
    }

    /// Zones known to hold records in this database, ordered.
    pub fn zones(&self) -> Vec<ZoneId> {
        self.zones.read().iter().cloned().collect()
    }

    /// Adds a zone to the known set. Re-adding is a no-op.
    pub fn add_zone(&self, zone: ZoneId) {
        self.zones.write().insert(zone);
    }

    /// Removes a zone from the known set.
    pub fn remove_zone(&self, zone: &ZoneId) {
        self.zones.write().remove(zone);
    }

    /// Returns true when the zone is in the known set.
    pub fn contains_zone(&self, zone: &ZoneId) -> bool {
        self.zones.read().contains(zone)
    }

    /// Tries to claim the one in-flight fetch slot for this database.
    ///
    /// Returns false when a fetch is already running, in which case the
    /// caller coalesces instead of scheduling a second fetch.
    pub fn begin_fetch(&self) -> bool {
        self.fetch_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases the in-flight fetch slot.
    pub fn end_fetch(&self) {
        self.fetch_in_flight.store(false, Ordering::Release);
    }
}
