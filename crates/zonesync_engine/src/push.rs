//! Local-to-remote push with conflict handling.
//!
//! One push cycle collects every unsynced entity of a database, sends the
//! saves and deletes as a single atomic batch, and classifies the outcome.
//! Partial failures go through the [`ConflictResolver`] and are resubmitted
//! in bounded rounds; backpressure is handed back to the caller as a retry
//! disposition instead of blocking a worker.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use zonesync_protocol::{RecordId, RemoteError, ZoneId};

use crate::config::EngineConfig;
use crate::conflict::ConflictResolver;
use crate::error::{SyncError, SyncResult};
use crate::mirror::DatabaseMirror;
use crate::remote::RemoteService;
use crate::state_store::SyncStateStore;

/// How a push cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushDisposition {
    /// The cycle ran to completion.
    Completed {
        /// Records the service confirmed saved (adopted spurious conflicts
        /// included).
        saved: usize,
        /// Tombstones confirmed deleted and purged.
        deleted: usize,
    },
    /// The service asked for backpressure; rerun the whole cycle after the
    /// delay.
    RetryAfter(Duration),
}

/// Pushes unsynced local changes to the remote service.
pub(crate) struct Pusher<R: ?Sized> {
    remote: Arc<R>,
    state: Arc<SyncStateStore>,
    resolver: ConflictResolver,
    config: EngineConfig,
    disabled: Arc<AtomicBool>,
}

impl<R: RemoteService + ?Sized> Pusher<R> {
    pub fn new(
        remote: Arc<R>,
        state: Arc<SyncStateStore>,
        resolver: ConflictResolver,
        config: EngineConfig,
        disabled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            remote,
            state,
            resolver,
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

    /// Runs one push cycle for a database.
    ///
    /// The save set is every non-tombstoned unsynced entity whose shared-ness
    /// matches the database; the delete set is the matching tombstones. Both
    /// go out in one atomic `modify_records` call, then rounds of conflict
    /// resolution until the batch is accepted, the round bound is hit, or a
    /// terminal failure surfaces.
    pub fn push_database(&self, mirror: &DatabaseMirror) -> SyncResult<PushDisposition> {
        self.check_disabled()?;
        let scope = mirror.scope();
        let default_zone = ZoneId::custom(&self.config.zone_name);

        let saves = self.state.unsynced_saves(mirror.is_shared())?;
        let deletes = self.state.unsynced_deletes(mirror.is_shared())?;
        if saves.is_empty() && deletes.is_empty() {
            return Ok(PushDisposition::Completed {
                saved: 0,
                deleted: 0,
            });
        }

        let mut baselines = BTreeMap::new();
        let mut to_save = Vec::with_capacity(saves.len());
        for entity in &saves {
            baselines.insert(entity.id.clone(), entity.modified_at);
            to_save.push(self.state.build_outgoing(entity, &default_zone)?);
        }
        let mut to_delete: Vec<RecordId> = deletes.into_iter().map(|e| e.id).collect();

        let mut saved_total = 0usize;
        let mut deleted_total = 0usize;
        let mut rounds = 0u32;

        loop {
            self.check_disabled()?;
            match self.remote.modify_records(scope, &to_save, &to_delete) {
                Ok(outcome) => {
                    self.state.mark_saved(&outcome.saved, &baselines)?;
                    self.state.purge_confirmed_deletes(&outcome.deleted)?;
                    saved_total += outcome.saved.len();
                    deleted_total += outcome.deleted.len();
                    debug!(
                        %scope,
                        saved = saved_total,
                        deleted = deleted_total,
                        "push cycle complete"
                    );
                    return Ok(PushDisposition::Completed {
                        saved: saved_total,
                        deleted: deleted_total,
                    });
                }
                Err(RemoteError::Busy { retry_after }) => {
                    debug!(%scope, ?retry_after, "service busy, push deferred");
                    return Ok(PushDisposition::RetryAfter(retry_after));
                }
                Err(RemoteError::PartialFailure { failures }) => {
                    if rounds >= self.config.max_resubmit_rounds {
                        let record_id = failures
                            .keys()
                            .next()
                            .cloned()
                            .unwrap_or_else(|| RecordId::new("unknown"));
                        return Err(SyncError::conflict_unresolved(record_id, rounds));
                    }
                    rounds += 1;
                    let plan = self.resolver.plan(&failures, &to_save, &to_delete);
                    if !plan.terminal.is_empty() {
                        return Err(RemoteError::partial(plan.terminal).into());
                    }

                    for record in &plan.adopt {
                        self.state.adopt_server_record(record)?;
                        saved_total += 1;
                    }
                    if !plan.drop_tombstones.is_empty() {
                        self.state.purge_confirmed_deletes(&plan.drop_tombstones)?;
                        deleted_total += plan.drop_tombstones.len();
                    }

                    let mut next_saves = plan.resubmit;
                    for id in &plan.recreate {
                        self.state.strip_mirror(id)?;
                        match self.state.entity(id)? {
                            Some(entity) if entity.is_shared() => {
                                // Vanished shared records mean the share went
                                // away; the next fetch purges the zone.
                                warn!(
                                    record = %id,
                                    "shared record unknown to the service, left for fetch to reconcile"
                                );
                            }
                            Some(entity) if !entity.deleted => {
                                next_saves
                                    .push(self.state.build_outgoing(&entity, &default_zone)?);
                            }
                            _ => {}
                        }
                    }
                    to_save = next_saves;
                    to_delete = plan.resubmit_deletes;
                    if to_save.is_empty() && to_delete.is_empty() {
                        return Ok(PushDisposition::Completed {
                            saved: saved_total,
                            deleted: deleted_total,
                        });
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
