//! Incremental pull: database-level zone discovery, then per-zone record
//! changes, each driven by its own opaque change token.
//!
//! Token handling is deliberately conservative:
//!
//! - A zone token advances only together with the durable application of
//!   the batch it describes (one writer-gate unit in the state store).
//! - The database token advances only after every zone the pages announced
//!   has been fetched, so a crash in between re-announces the zones rather
//!   than losing them.
//! - Token expiry resets are explicit bounded loops with a counter, never
//!   recursion; exhausting the bound surfaces an error.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use zonesync_protocol::{RemoteError, ZoneChangeRequest, ZoneFetchStatus, ZoneId};

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::mirror::DatabaseMirror;
use crate::remote::RemoteService;
use crate::state_store::{ApplyCounts, SyncStateStore};
use crate::zones::ZoneManager;

/// What one database fetch cycle changed locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Records upserted.
    pub changed: usize,
    /// Records removed.
    pub deleted: usize,
    /// Zones purged because the service reported them deleted.
    pub zones_deleted: usize,
}

/// Pulls remote changes into the local store.
pub(crate) struct DeltaFetcher<R: ?Sized> {
    remote: Arc<R>,
    state: Arc<SyncStateStore>,
    zones: Arc<ZoneManager<R>>,
    config: EngineConfig,
    disabled: Arc<AtomicBool>,
}

impl<R: RemoteService + ?Sized> DeltaFetcher<R> {
    pub fn new(
        remote: Arc<R>,
        state: Arc<SyncStateStore>,
        zones: Arc<ZoneManager<R>>,
        config: EngineConfig,
        disabled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            remote,
            state,
            zones,
            config,
            disabled,
        }
    }

    fn check_disabled(&self) -> SyncResult<()> {
        if self.disabled.load(Ordering::Acquire) {
            return Err(SyncError::Disabled);
        }
        Ok(())
    }

    /// Runs one full fetch cycle for a database: discover zones with news,
    /// pull and apply their record changes, then advance the database
    /// token.
    pub fn fetch_database(&self, mirror: &DatabaseMirror) -> SyncResult<FetchOutcome> {
        let scope = mirror.scope();
        let mut resets = 0u32;
        'restart: loop {
            self.check_disabled()?;
            let mut outcome = FetchOutcome::default();
            let mut changed: BTreeSet<ZoneId> = BTreeSet::new();
            let mut token = self.state.meta().database_token(scope)?;
            loop {
                self.check_disabled()?;
                let page = match self.remote.fetch_database_changes(scope, token.as_ref()) {
                    Ok(page) => page,
                    Err(RemoteError::TokenExpired) => {
                        if resets >= self.config.max_token_resets {
                            return Err(SyncError::token_reset_exhausted(format!(
                                "{scope} database changes"
                            )));
                        }
                        resets += 1;
                        self.state.meta().clear_database_token(scope)?;
                        warn!(%scope, "database change token expired, refetching from scratch");
                        continue 'restart;
                    }
                    Err(err) => return Err(err.into()),
                };
                for zone in &page.zones_deleted {
                    self.purge_deleted_zone(mirror, zone)?;
                    changed.remove(zone);
                    outcome.zones_deleted += 1;
                }
                changed.extend(page.zones_changed.iter().cloned());
                token = Some(page.token);
                if !page.more {
                    break;
                }
            }

            for zone in &changed {
                mirror.add_zone(zone.clone());
            }
            let applied = self.fetch_zones(mirror, changed.into_iter().collect())?;
            outcome.changed = applied.changed;
            outcome.deleted = applied.deleted;

            if let Some(token) = token {
                self.state.meta().set_database_token(scope, &token)?;
            }
            debug!(
                %scope,
                changed = outcome.changed,
                deleted = outcome.deleted,
                "fetch cycle complete"
            );
            return Ok(outcome);
        }
    }

    /// Pulls record changes for the given zones until every zone is
    /// exhausted, applying each page together with that zone's token.
    fn fetch_zones(&self, mirror: &DatabaseMirror, zones: Vec<ZoneId>) -> SyncResult<ApplyCounts> {
        let scope = mirror.scope();
        let mut totals = ApplyCounts::default();
        if zones.is_empty() {
            return Ok(totals);
        }

        let mut resets: BTreeMap<ZoneId, u32> = BTreeMap::new();
        let mut pending = Vec::with_capacity(zones.len());
        for zone in zones {
            let since = self.state.meta().zone_token(scope, &zone)?;
            pending.push(ZoneChangeRequest::new(zone, since));
        }

        while !pending.is_empty() {
            self.check_disabled()?;
            let requests = std::mem::take(&mut pending);
            let pages = self.remote.fetch_zone_changes(scope, &requests)?;
            for page in pages {
                match page.status {
                    ZoneFetchStatus::TokenExpired => {
                        let count = resets.entry(page.zone.clone()).or_insert(0);
                        if *count >= self.config.max_token_resets {
                            return Err(SyncError::token_reset_exhausted(format!(
                                "zone {} changes",
                                page.zone
                            )));
                        }
                        *count += 1;
                        self.state.meta().clear_zone_token(scope, &page.zone)?;
                        warn!(zone = %page.zone, "zone change token expired, refetching zone");
                        pending.push(ZoneChangeRequest::new(page.zone, None));
                    }
                    ZoneFetchStatus::Ok => {
                        let counts = self.state.apply_zone_batch(
                            scope,
                            &page.zone,
                            page.batch,
                            &page.token,
                        )?;
                        totals.changed += counts.changed;
                        totals.deleted += counts.deleted;
                        if page.more {
                            pending.push(ZoneChangeRequest::new(
                                page.zone,
                                Some(page.token),
                            ));
                        }
                    }
                }
            }
        }
        Ok(totals)
    }

    /// Removes all traces of a zone the service reported deleted: local
    /// entities and mirrors, the zone token, the creation flag, and the
    /// mirror's zone-list entry.
    fn purge_deleted_zone(&self, mirror: &DatabaseMirror, zone: &ZoneId) -> SyncResult<()> {
        let scope = mirror.scope();
        mirror.remove_zone(zone);
        self.zones.forget_zone(scope, zone)?;
        let purged = self.state.purge_zone(scope, zone)?;
        info!(%zone, %scope, purged, "zone deleted on the service, purged locally");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MockRemote;
    use zonesync_protocol::{
        ChangeBatch, ChangeToken, DatabaseChangesPage, DatabaseScope, FieldValue, RecordId,
        RemoteRecord, ZoneChangesPage,
    };
    use zonesync_store::{EntityDescriptor, FieldKind, MemoryBlobStore, MemoryEntityStore};

    struct Fixture {
        remote: Arc<MockRemote>,
        state: Arc<SyncStateStore>,
        fetcher: DeltaFetcher<MockRemote>,
        mirror: DatabaseMirror,
    }

    fn fixture() -> Fixture {
        let remote = Arc::new(MockRemote::new());
        let state = Arc::new(SyncStateStore::new(
            Arc::new(MemoryEntityStore::new()),
            Arc::new(MemoryBlobStore::new()),
        ));
        state
            .register(EntityDescriptor::new("note").with_field("title", FieldKind::Text))
            .unwrap();
        let zones = Arc::new(ZoneManager::new(Arc::clone(&remote), Arc::clone(&state)));
        let fetcher = DeltaFetcher::new(
            Arc::clone(&remote),
            Arc::clone(&state),
            zones,
            EngineConfig::default(),
            Arc::new(AtomicBool::new(false)),
        );
        Fixture {
            remote,
            state,
            fetcher,
            mirror: DatabaseMirror::new(DatabaseScope::Private),
        }
    }

    fn db_page(changed: &[ZoneId], token: u8, more: bool) -> DatabaseChangesPage {
        DatabaseChangesPage {
            zones_changed: changed.to_vec(),
            zones_deleted: Vec::new(),
            token: ChangeToken::new(vec![token]),
            more,
        }
    }

    fn note(id: &str, title: &str, zone: &ZoneId) -> RemoteRecord {
        let mut record = RemoteRecord::new(RecordId::new(id), "note", zone.clone());
        record.change_tag = Some(format!("tag-{id}"));
        record.set_field("title", FieldValue::from(title));
        record
    }

    fn zone_page(zone: &ZoneId, changed: Vec<RemoteRecord>, token: u8, more: bool) -> ZoneChangesPage {
        ZoneChangesPage {
            zone: zone.clone(),
            batch: ChangeBatch {
                changed,
                deleted: Vec::new(),
            },
            token: ChangeToken::new(vec![token]),
            more,
            status: ZoneFetchStatus::Ok,
        }
    }

    #[test]
    fn fetch_applies_records_and_advances_tokens() {
        let f = fixture();
        let zone = ZoneId::custom("notes");
        f.remote
            .push_database_page(Ok(db_page(std::slice::from_ref(&zone), 1, false)));
        f.remote.push_zone_pages(Ok(vec![zone_page(
            &zone,
            vec![note("n1", "hello", &zone)],
            10,
            false,
        )]));

        let outcome = f.fetcher.fetch_database(&f.mirror).unwrap();
        assert_eq!(outcome.changed, 1);
        assert!(f.mirror.contains_zone(&zone));
        assert!(f.state.entity(&RecordId::new("n1")).unwrap().unwrap().synced);
        assert_eq!(
            f.state.meta().database_token(DatabaseScope::Private).unwrap(),
            Some(ChangeToken::new(vec![1]))
        );
        assert_eq!(
            f.state
                .meta()
                .zone_token(DatabaseScope::Private, &zone)
                .unwrap(),
            Some(ChangeToken::new(vec![10]))
        );
    }

    #[test]
    fn fetch_paginates_database_and_zone_pages() {
        let f = fixture();
        let zone = ZoneId::custom("notes");
        f.remote
            .push_database_page(Ok(db_page(std::slice::from_ref(&zone), 1, true)));
        f.remote.push_database_page(Ok(db_page(&[], 2, false)));
        f.remote.push_zone_pages(Ok(vec![zone_page(
            &zone,
            vec![note("n1", "one", &zone)],
            10,
            true,
        )]));
        f.remote.push_zone_pages(Ok(vec![zone_page(
            &zone,
            vec![note("n2", "two", &zone)],
            11,
            false,
        )]));

        let outcome = f.fetcher.fetch_database(&f.mirror).unwrap();
        assert_eq!(outcome.changed, 2);
        assert_eq!(
            f.state.meta().database_token(DatabaseScope::Private).unwrap(),
            Some(ChangeToken::new(vec![2]))
        );
        assert_eq!(
            f.state
                .meta()
                .zone_token(DatabaseScope::Private, &zone)
                .unwrap(),
            Some(ChangeToken::new(vec![11]))
        );
    }

    #[test]
    fn database_token_expiry_resets_once() {
        let f = fixture();
        f.state
            .meta()
            .set_database_token(DatabaseScope::Private, &ChangeToken::new(vec![9]))
            .unwrap();
        f.remote.push_database_page(Err(RemoteError::TokenExpired));
        f.remote.push_database_page(Ok(db_page(&[], 1, false)));

        let outcome = f.fetcher.fetch_database(&f.mirror).unwrap();
        assert_eq!(outcome, FetchOutcome::default());
        assert_eq!(
            f.state.meta().database_token(DatabaseScope::Private).unwrap(),
            Some(ChangeToken::new(vec![1]))
        );
    }

    #[test]
    fn repeated_database_expiry_surfaces() {
        let f = fixture();
        f.remote.push_database_page(Err(RemoteError::TokenExpired));
        f.remote.push_database_page(Err(RemoteError::TokenExpired));

        assert!(matches!(
            f.fetcher.fetch_database(&f.mirror),
            Err(SyncError::TokenResetExhausted { .. })
        ));
    }

    #[test]
    fn zone_token_expiry_refetches_that_zone() {
        let f = fixture();
        let zone = ZoneId::custom("notes");
        f.remote
            .push_database_page(Ok(db_page(std::slice::from_ref(&zone), 1, false)));
        let mut expired = zone_page(&zone, Vec::new(), 0, false);
        expired.status = ZoneFetchStatus::TokenExpired;
        f.remote.push_zone_pages(Ok(vec![expired.clone()]));
        f.remote.push_zone_pages(Ok(vec![zone_page(
            &zone,
            vec![note("n1", "hello", &zone)],
            10,
            false,
        )]));

        let outcome = f.fetcher.fetch_database(&f.mirror).unwrap();
        assert_eq!(outcome.changed, 1);

        // A second expiry in the same cycle is an error.
        f.remote
            .push_database_page(Ok(db_page(std::slice::from_ref(&zone), 2, false)));
        f.remote.push_zone_pages(Ok(vec![expired.clone()]));
        f.remote.push_zone_pages(Ok(vec![expired]));
        assert!(matches!(
            f.fetcher.fetch_database(&f.mirror),
            Err(SyncError::TokenResetExhausted { .. })
        ));
    }

    #[test]
    fn deleted_zones_are_purged() {
        let f = fixture();
        let zone = ZoneId::custom("notes");
        // Seed a synced entity in the zone via a normal fetch.
        f.remote
            .push_database_page(Ok(db_page(std::slice::from_ref(&zone), 1, false)));
        f.remote.push_zone_pages(Ok(vec![zone_page(
            &zone,
            vec![note("n1", "hello", &zone)],
            10,
            false,
        )]));
        f.fetcher.fetch_database(&f.mirror).unwrap();

        f.remote.push_database_page(Ok(DatabaseChangesPage {
            zones_changed: Vec::new(),
            zones_deleted: vec![zone.clone()],
            token: ChangeToken::new(vec![2]),
            more: false,
        }));
        let outcome = f.fetcher.fetch_database(&f.mirror).unwrap();

        assert_eq!(outcome.zones_deleted, 1);
        assert!(!f.mirror.contains_zone(&zone));
        assert!(f.state.entity(&RecordId::new("n1")).unwrap().is_none());
        assert!(f
            .state
            .meta()
            .zone_token(DatabaseScope::Private, &zone)
            .unwrap()
            .is_none());
    }

    #[test]
    fn disabled_fetch_stops_before_any_call() {
        let remote = Arc::new(MockRemote::new());
        let state = Arc::new(SyncStateStore::new(
            Arc::new(MemoryEntityStore::new()),
            Arc::new(MemoryBlobStore::new()),
        ));
        let zones = Arc::new(ZoneManager::new(Arc::clone(&remote), Arc::clone(&state)));
        let fetcher = DeltaFetcher::new(
            Arc::clone(&remote),
            state,
            zones,
            EngineConfig::default(),
            Arc::new(AtomicBool::new(true)),
        );

        let mirror = DatabaseMirror::new(DatabaseScope::Private);
        assert!(matches!(
            fetcher.fetch_database(&mirror),
            Err(SyncError::Disabled)
        ));
        assert!(remote.calls().is_empty());
    }
}
