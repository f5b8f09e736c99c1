//! In-memory remote service.
//!
//! `LoopbackRemote` behaves like the real record service from the engine's
//! point of view: per-scope zones, server-assigned change tags, database-
//! and zone-level change logs addressed by opaque tokens, atomic modify
//! batches, and scriptable failure modes (backpressure, token expiry,
//! rejected saves). Integration tests run complete engines against it, and
//! two engines sharing one loopback act as two devices behind one account.
//!
//! Tokens encode `(epoch, sequence)`; `expire_tokens` bumps the epoch so
//! every outstanding token is rejected, which is how a server-side history
//! truncation looks to a client.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;

use zonesync_protocol::{
    ChangeBatch, ChangeToken, ConflictCase, DatabaseChangesPage, DatabaseScope, ItemFailure,
    ModifyOutcome, RecordId, RemoteError, RemoteRecord, RemoteResult, ShareMetadata,
    ZoneChangeRequest, ZoneChangesPage, ZoneFetchStatus, ZoneId,
};

use crate::remote::RemoteService;

const DEFAULT_PAGE_SIZE: usize = 100;

/// How often each service operation was called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopbackCounts {
    /// `fetch_database_changes` calls.
    pub database_fetches: usize,
    /// `fetch_zone_changes` calls.
    pub zone_fetches: usize,
    /// `modify_records` calls.
    pub modifies: usize,
    /// `create_zone` calls.
    pub zone_creates: usize,
    /// `manage_subscription` calls.
    pub subscriptions: usize,
    /// `accept_share` calls.
    pub share_accepts: usize,
}

#[derive(Debug, Clone)]
struct ZoneEvent {
    seq: u64,
    id: RecordId,
    deleted: bool,
}

#[derive(Debug, Clone)]
struct DbEvent {
    seq: u64,
    zone: ZoneId,
    deleted: bool,
}

#[derive(Debug, Default)]
struct ZoneState {
    records: BTreeMap<RecordId, RemoteRecord>,
    previous: BTreeMap<RecordId, RemoteRecord>,
    log: Vec<ZoneEvent>,
}

#[derive(Debug, Default)]
struct ScopeState {
    zones: BTreeMap<ZoneId, ZoneState>,
    db_log: Vec<DbEvent>,
    subscriptions: BTreeSet<String>,
}

struct StagedShare {
    zone: ZoneId,
    records: Vec<RemoteRecord>,
}

struct Inner {
    seq: u64,
    epoch: u32,
    private: ScopeState,
    shared: ScopeState,
    page_size: usize,
    busy_budget: Option<(u32, Duration)>,
    fail_next_modify: Option<RemoteError>,
    reject_once: BTreeSet<RecordId>,
    staged_shares: BTreeMap<RecordId, StagedShare>,
    counts: LoopbackCounts,
}

impl Inner {
    fn scope(&self, scope: DatabaseScope) -> &ScopeState {
        match scope {
            DatabaseScope::Private => &self.private,
            DatabaseScope::Shared => &self.shared,
        }
    }

    fn token(&self, seq: u64) -> ChangeToken {
        let mut bytes = Vec::with_capacity(12);
        bytes.extend_from_slice(&self.epoch.to_be_bytes());
        bytes.extend_from_slice(&seq.to_be_bytes());
        ChangeToken::new(bytes)
    }

    /// Decodes a token, returning `None` when it belongs to an older epoch
    /// or is not one of ours.
    fn decode(&self, token: &ChangeToken) -> Option<u64> {
        let bytes = token.as_bytes();
        if bytes.len() != 12 {
            return None;
        }
        let epoch = u32::from_be_bytes(bytes[..4].try_into().ok()?);
        if epoch != self.epoch {
            return None;
        }
        Some(u64::from_be_bytes(bytes[4..].try_into().ok()?))
    }
}

/// Scope selection has to leave `seq` and the script fields borrowable, so
/// the caller destructures `Inner` and picks the scope from the pieces.
fn pick<'a>(
    private: &'a mut ScopeState,
    shared: &'a mut ScopeState,
    scope: DatabaseScope,
) -> &'a mut ScopeState {
    match scope {
        DatabaseScope::Private => private,
        DatabaseScope::Shared => shared,
    }
}

/// Faithful in-memory [`RemoteService`] for tests and demos.
pub struct LoopbackRemote {
    state: Mutex<Inner>,
}

impl Default for LoopbackRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackRemote {
    /// Creates an empty service with no zones in either scope.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Inner {
                seq: 0,
                epoch: 0,
                private: ScopeState::default(),
                shared: ScopeState::default(),
                page_size: DEFAULT_PAGE_SIZE,
                busy_budget: None,
                fail_next_modify: None,
                reject_once: BTreeSet::new(),
                staged_shares: BTreeMap::new(),
                counts: LoopbackCounts::default(),
            }),
        }
    }

    /// Caps how many change events one page carries.
    pub fn set_page_size(&self, page_size: usize) {
        self.state.lock().page_size = page_size.max(1);
    }

    /// Invalidates every token handed out so far.
    pub fn expire_tokens(&self) {
        self.state.lock().epoch += 1;
    }

    /// Makes the next `times` modify calls answer `Busy` with the delay.
    pub fn make_busy(&self, times: u32, retry_after: Duration) {
        self.state.lock().busy_budget = Some((times, retry_after));
    }

    /// Makes the next modify call fail with the given error.
    pub fn fail_next_modify(&self, error: RemoteError) {
        self.state.lock().fail_next_modify = Some(error);
    }

    /// Rejects the next save of `id` as a conflict even though the client
    /// is current, producing a spurious conflict (equal change tags).
    pub fn reject_next_save(&self, id: RecordId) {
        self.state.lock().reject_once.insert(id);
    }

    /// Stages a share invitation; `accept_share` with the matching metadata
    /// installs the zone and records into the shared scope.
    pub fn stage_share(&self, metadata: &ShareMetadata, records: Vec<RemoteRecord>) {
        self.state.lock().staged_shares.insert(
            metadata.share_id.clone(),
            StagedShare {
                zone: metadata.zone.clone(),
                records,
            },
        );
    }

    /// Writes records server-side without conflict checks, creating zones
    /// as needed. Stands in for history that predates the client.
    pub fn seed(&self, scope: DatabaseScope, records: Vec<RemoteRecord>) {
        let inner = &mut *self.state.lock();
        let Inner {
            seq,
            private,
            shared,
            ..
        } = inner;
        let scope_state = pick(private, shared, scope);
        for mut record in records {
            *seq += 1;
            record.change_tag = Some(format!("tag-{seq}"));
            if record.created_by.is_none() {
                record.created_by = Some(record.zone.owner.clone());
            }
            let zone_id = record.zone.clone();
            let zone = scope_state.zones.entry(zone_id.clone()).or_default();
            zone.log.push(ZoneEvent {
                seq: *seq,
                id: record.id.clone(),
                deleted: false,
            });
            zone.records.insert(record.id.clone(), record);
            scope_state.db_log.push(DbEvent {
                seq: *seq,
                zone: zone_id,
                deleted: false,
            });
        }
    }

    /// Reads a record server-side.
    pub fn record(&self, scope: DatabaseScope, id: &RecordId) -> Option<RemoteRecord> {
        let inner = self.state.lock();
        inner
            .scope(scope)
            .zones
            .values()
            .find_map(|zone| zone.records.get(id).cloned())
    }

    /// Returns true when the zone exists in the scope.
    pub fn zone_exists(&self, scope: DatabaseScope, zone: &ZoneId) -> bool {
        self.state.lock().scope(scope).zones.contains_key(zone)
    }

    /// Returns true when the subscription is registered in the scope.
    pub fn subscription_exists(&self, scope: DatabaseScope, subscription_id: &str) -> bool {
        self.state
            .lock()
            .scope(scope)
            .subscriptions
            .contains(subscription_id)
    }

    /// Snapshot of per-operation call counts.
    pub fn counts(&self) -> LoopbackCounts {
        self.state.lock().counts
    }
}

impl RemoteService for LoopbackRemote {
    fn fetch_database_changes(
        &self,
        scope: DatabaseScope,
        since: Option<&ChangeToken>,
    ) -> RemoteResult<DatabaseChangesPage> {
        let inner = &mut *self.state.lock();
        inner.counts.database_fetches += 1;

        let since_seq = match since {
            None => 0,
            Some(token) => inner.decode(token).ok_or(RemoteError::TokenExpired)?,
        };
        let scope_state = inner.scope(scope);
        let mut events: VecDeque<&DbEvent> = scope_state
            .db_log
            .iter()
            .filter(|event| event.seq > since_seq)
            .collect();

        let mut page_events = Vec::new();
        let mut last_seq = since_seq;
        while page_events.len() < inner.page_size {
            let Some(event) = events.pop_front() else {
                break;
            };
            last_seq = event.seq;
            page_events.push(event.clone());
        }
        let more = !events.is_empty();

        // Within the page, only the latest event per zone matters.
        let mut latest: BTreeMap<ZoneId, bool> = BTreeMap::new();
        for event in &page_events {
            latest.insert(event.zone.clone(), event.deleted);
        }
        let mut zones_changed = Vec::new();
        let mut zones_deleted = Vec::new();
        for (zone, deleted) in latest {
            if deleted {
                zones_deleted.push(zone);
            } else {
                zones_changed.push(zone);
            }
        }

        Ok(DatabaseChangesPage {
            zones_changed,
            zones_deleted,
            token: inner.token(last_seq),
            more,
        })
    }

    fn fetch_zone_changes(
        &self,
        scope: DatabaseScope,
        requests: &[ZoneChangeRequest],
    ) -> RemoteResult<Vec<ZoneChangesPage>> {
        let inner = &mut *self.state.lock();
        inner.counts.zone_fetches += 1;

        let mut pages = Vec::with_capacity(requests.len());
        for request in requests {
            let Some(zone) = inner.scope(scope).zones.get(&request.zone) else {
                return Err(RemoteError::ZoneNotFound(request.zone.clone()));
            };

            let since_seq = match &request.token {
                None => 0,
                Some(token) => match inner.decode(token) {
                    Some(seq) => seq,
                    None => {
                        pages.push(ZoneChangesPage {
                            zone: request.zone.clone(),
                            batch: ChangeBatch::new(),
                            token: inner.token(inner.seq),
                            more: false,
                            status: ZoneFetchStatus::TokenExpired,
                        });
                        continue;
                    }
                },
            };

            let mut events: VecDeque<&ZoneEvent> = zone
                .log
                .iter()
                .filter(|event| event.seq > since_seq)
                .collect();
            let mut page_events = Vec::new();
            let mut last_seq = since_seq;
            while page_events.len() < inner.page_size {
                let Some(event) = events.pop_front() else {
                    break;
                };
                last_seq = event.seq;
                page_events.push(event.clone());
            }
            let more = !events.is_empty();

            let mut latest: BTreeMap<RecordId, bool> = BTreeMap::new();
            for event in &page_events {
                latest.insert(event.id.clone(), event.deleted);
            }
            let mut batch = ChangeBatch::new();
            for (id, deleted) in latest {
                if deleted {
                    batch.deleted.push(id);
                } else if let Some(record) = zone.records.get(&id) {
                    batch.changed.push(record.clone());
                }
                // A change whose record is gone again is skipped; the
                // deletion event is further down the log.
            }

            pages.push(ZoneChangesPage {
                zone: request.zone.clone(),
                batch,
                token: inner.token(last_seq),
                more,
                status: ZoneFetchStatus::Ok,
            });
        }
        Ok(pages)
    }

    fn modify_records(
        &self,
        scope: DatabaseScope,
        to_save: &[RemoteRecord],
        to_delete: &[RecordId],
    ) -> RemoteResult<ModifyOutcome> {
        let inner = &mut *self.state.lock();
        inner.counts.modifies += 1;

        if let Some((remaining, retry_after)) = inner.busy_budget {
            if remaining > 0 {
                inner.busy_budget = (remaining > 1).then_some((remaining - 1, retry_after));
                return Err(RemoteError::Busy { retry_after });
            }
        }
        if let Some(error) = inner.fail_next_modify.take() {
            return Err(error);
        }

        let Inner {
            seq,
            private,
            shared,
            reject_once,
            ..
        } = inner;
        let scope_state = pick(private, shared, scope);

        // Validate everything before touching anything; one bad item fails
        // the whole batch.
        let mut failures: BTreeMap<RecordId, ItemFailure> = BTreeMap::new();
        for save in to_save {
            match scope_state.zones.get(&save.zone) {
                None => {
                    failures.insert(
                        save.id.clone(),
                        ItemFailure::Other(format!("zone {} not found", save.zone)),
                    );
                    continue;
                }
                Some(zone) => {
                    let current = zone.records.get(&save.id);
                    if reject_once.remove(&save.id) {
                        if let Some(current) = current {
                            failures.insert(
                                save.id.clone(),
                                ItemFailure::Conflict(ConflictCase {
                                    server_record: current.clone(),
                                    client_record: save.clone(),
                                    ancestor_record: zone.previous.get(&save.id).cloned(),
                                }),
                            );
                            continue;
                        }
                    }
                    match current {
                        Some(current) if current.change_tag != save.change_tag => {
                            failures.insert(
                                save.id.clone(),
                                ItemFailure::Conflict(ConflictCase {
                                    server_record: current.clone(),
                                    client_record: save.clone(),
                                    ancestor_record: zone.previous.get(&save.id).cloned(),
                                }),
                            );
                        }
                        None if save.change_tag.is_some() => {
                            failures.insert(save.id.clone(), ItemFailure::UnknownItem);
                        }
                        _ => {}
                    }
                }
            }
        }
        for id in to_delete {
            let exists = scope_state
                .zones
                .values()
                .any(|zone| zone.records.contains_key(id));
            if !exists {
                failures.insert(id.clone(), ItemFailure::UnknownItem);
            }
        }

        if !failures.is_empty() {
            for save in to_save {
                failures
                    .entry(save.id.clone())
                    .or_insert(ItemFailure::BatchRequestFailed);
            }
            for id in to_delete {
                failures
                    .entry(id.clone())
                    .or_insert(ItemFailure::BatchRequestFailed);
            }
            return Err(RemoteError::PartialFailure { failures });
        }

        let mut outcome = ModifyOutcome::default();
        for save in to_save {
            *seq += 1;
            let mut record = save.clone();
            record.change_tag = Some(format!("tag-{seq}"));
            let zone_id = record.zone.clone();
            // Validation above guarantees the zone is present.
            let Some(zone) = scope_state.zones.get_mut(&zone_id) else {
                continue;
            };
            match zone.records.get(&record.id) {
                Some(current) => {
                    record.created_by = current.created_by.clone();
                    zone.previous.insert(record.id.clone(), current.clone());
                }
                None => {
                    record.created_by = Some(zone_id.owner.clone());
                }
            }
            zone.log.push(ZoneEvent {
                seq: *seq,
                id: record.id.clone(),
                deleted: false,
            });
            zone.records.insert(record.id.clone(), record.clone());
            scope_state.db_log.push(DbEvent {
                seq: *seq,
                zone: zone_id,
                deleted: false,
            });
            outcome.saved.push(record);
        }
        for id in to_delete {
            *seq += 1;
            for (zone_id, zone) in scope_state.zones.iter_mut() {
                if zone.records.remove(id).is_some() {
                    zone.previous.remove(id);
                    zone.log.push(ZoneEvent {
                        seq: *seq,
                        id: id.clone(),
                        deleted: true,
                    });
                    scope_state.db_log.push(DbEvent {
                        seq: *seq,
                        zone: zone_id.clone(),
                        deleted: false,
                    });
                    break;
                }
            }
            outcome.deleted.push(id.clone());
        }
        Ok(outcome)
    }

    fn create_zone(&self, scope: DatabaseScope, zone: &ZoneId) -> RemoteResult<()> {
        let inner = &mut *self.state.lock();
        inner.counts.zone_creates += 1;
        let Inner {
            seq,
            private,
            shared,
            ..
        } = inner;
        let scope_state = pick(private, shared, scope);
        if scope_state.zones.contains_key(zone) {
            return Ok(());
        }
        scope_state.zones.insert(zone.clone(), ZoneState::default());
        *seq += 1;
        scope_state.db_log.push(DbEvent {
            seq: *seq,
            zone: zone.clone(),
            deleted: false,
        });
        Ok(())
    }

    fn delete_zone(&self, scope: DatabaseScope, zone: &ZoneId) -> RemoteResult<()> {
        let inner = &mut *self.state.lock();
        let Inner {
            seq,
            private,
            shared,
            ..
        } = inner;
        let scope_state = pick(private, shared, scope);
        if scope_state.zones.remove(zone).is_none() {
            return Err(RemoteError::ZoneNotFound(zone.clone()));
        }
        *seq += 1;
        scope_state.db_log.push(DbEvent {
            seq: *seq,
            zone: zone.clone(),
            deleted: true,
        });
        Ok(())
    }

    fn manage_subscription(&self, scope: DatabaseScope, subscription_id: &str) -> RemoteResult<()> {
        let inner = &mut *self.state.lock();
        inner.counts.subscriptions += 1;
        let Inner {
            private, shared, ..
        } = inner;
        pick(private, shared, scope)
            .subscriptions
            .insert(subscription_id.to_string());
        Ok(())
    }

    fn accept_share(&self, metadata: &ShareMetadata) -> RemoteResult<()> {
        let inner = &mut *self.state.lock();
        inner.counts.share_accepts += 1;
        let Some(staged) = inner.staged_shares.remove(&metadata.share_id) else {
            return Err(RemoteError::service(format!(
                "unknown share {}",
                metadata.share_id
            )));
        };
        let Inner {
            seq,
            shared,
            ..
        } = inner;
        let zone = shared.zones.entry(staged.zone.clone()).or_default();
        for mut record in staged.records {
            *seq += 1;
            if record.change_tag.is_none() {
                record.change_tag = Some(format!("tag-{seq}"));
            }
            if record.created_by.is_none() {
                record.created_by = Some(staged.zone.owner.clone());
            }
            zone.log.push(ZoneEvent {
                seq: *seq,
                id: record.id.clone(),
                deleted: false,
            });
            zone.records.insert(record.id.clone(), record);
        }
        *seq += 1;
        shared.db_log.push(DbEvent {
            seq: *seq,
            zone: staged.zone,
            deleted: false,
        });
        Ok(())
    }
}
