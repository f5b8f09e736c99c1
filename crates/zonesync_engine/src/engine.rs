//! Engine orchestration.
//!
//! `SyncEngine` owns the moving parts (state store, operation queue, retry
//! scheduler, per-database mirrors) and exposes the application surface:
//! lifecycle, sync triggers, wake-signal handling, sharing, and the local
//! read/write path. Engines are plain instances; an application creates one
//! per account and holds it wherever it likes.
//!
//! Key invariants:
//! - `stop` is advisory: queued and in-flight work observes the disabled
//!   flag at its next stage boundary and bails quietly, in-flight remote
//!   calls are never interrupted.
//! - Local reads and writes work while the engine is stopped; edits made
//!   offline are picked up by the first push after `start`.
//! - At most one wake-driven fetch per database is pending at a time;
//!   further signals are acknowledged but coalesced.
//! - One `Idle` event per burst: the first trigger of a burst arms a waiter
//!   that drains the queue and then notifies.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;

use tracing::{error, info, warn};

use zonesync_protocol::{
    share_id_for, DatabaseScope, FieldValue, RecordId, RemoteRecord, ShareHandle, ShareMetadata,
    ZoneId, SHARE_PERMISSION_FIELD, SHARE_RECORD_TYPE, SHARE_ROOT_FIELD,
};
use zonesync_store::{BlobStore, EntityDescriptor, EntityFilter, EntityStore, LocalEntity};

use crate::config::EngineConfig;
use crate::conflict::{ConflictResolver, ResolutionPolicy};
use crate::error::{SyncError, SyncResult};
use crate::events::{EngineEvent, EventFeed};
use crate::fetch::DeltaFetcher;
use crate::mirror::DatabaseMirror;
use crate::push::{PushDisposition, Pusher};
use crate::queue::OperationQueue;
use crate::remote::RemoteService;
use crate::retry::RetryScheduler;
use crate::state_store::SyncStateStore;
use crate::zones::ZoneManager;

const PRIVATE: usize = 0;
const SHARED: usize = 1;

/// A push-notification payload telling the engine a subscription fired.
///
/// The transport that receives the platform notification extracts the
/// subscription id and hands it over; the engine maps it back to a
/// database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeSignal {
    /// Subscription the service says has new changes.
    pub subscription_id: String,
}

impl WakeSignal {
    /// Creates a wake signal for a subscription id.
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
        }
    }
}

/// How the engine responded to a wake signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeAck {
    /// A fetch cycle was queued for the matching database.
    Scheduled,
    /// A fetch for that database is already pending; the signal folded into
    /// it.
    Coalesced,
    /// The engine is stopped or the subscription is not one of ours.
    Ignored,
}

struct EngineCore<R: RemoteService + 'static> {
    config: EngineConfig,
    remote: Arc<R>,
    state: Arc<SyncStateStore>,
    queue: Arc<OperationQueue>,
    retry: RetryScheduler,
    fetcher: DeltaFetcher<R>,
    pusher: Pusher<R>,
    zones: Arc<ZoneManager<R>>,
    mirrors: [Arc<DatabaseMirror>; 2],
    events: Arc<EventFeed>,
    disabled: Arc<AtomicBool>,
    running: AtomicBool,
    idle_pending: Arc<AtomicBool>,
}

/// The sync engine.
///
/// See the [module docs](self) for the lifecycle and concurrency rules.
pub struct SyncEngine<R: RemoteService + 'static> {
    core: Arc<EngineCore<R>>,
}

impl<R: RemoteService + 'static> SyncEngine<R> {
    /// Creates an engine over the given service and stores.
    ///
    /// The engine starts stopped; call [`start`](Self::start) to begin
    /// syncing. Conflicts resolve with [`ClientFieldsWin`].
    ///
    /// [`ClientFieldsWin`]: crate::conflict::ClientFieldsWin
    pub fn new(
        config: EngineConfig,
        remote: Arc<R>,
        entities: Arc<dyn EntityStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self::build(config, remote, entities, blobs, ConflictResolver::default())
    }

    /// Creates an engine with a custom conflict resolution policy.
    pub fn with_policy(
        config: EngineConfig,
        remote: Arc<R>,
        entities: Arc<dyn EntityStore>,
        blobs: Arc<dyn BlobStore>,
        policy: Arc<dyn ResolutionPolicy>,
    ) -> Self {
        Self::build(
            config,
            remote,
            entities,
            blobs,
            ConflictResolver::new(policy),
        )
    }

    fn build(
        config: EngineConfig,
        remote: Arc<R>,
        entities: Arc<dyn EntityStore>,
        blobs: Arc<dyn BlobStore>,
        resolver: ConflictResolver,
    ) -> Self {
        let state = Arc::new(SyncStateStore::new(entities, blobs));
        let queue = Arc::new(OperationQueue::new(config.max_workers));
        let retry = RetryScheduler::new(Arc::clone(&queue));
        let disabled = Arc::new(AtomicBool::new(true));
        let zones = Arc::new(ZoneManager::new(Arc::clone(&remote), Arc::clone(&state)));
        let fetcher = DeltaFetcher::new(
            Arc::clone(&remote),
            Arc::clone(&state),
            Arc::clone(&zones),
            config.clone(),
            Arc::clone(&disabled),
        );
        let pusher = Pusher::new(
            Arc::clone(&remote),
            Arc::clone(&state),
            resolver,
            config.clone(),
            Arc::clone(&disabled),
        );
        Self {
            core: Arc::new(EngineCore {
                config,
                remote,
                state,
                queue,
                retry,
                fetcher,
                pusher,
                zones,
                mirrors: [
                    Arc::new(DatabaseMirror::new(DatabaseScope::Private)),
                    Arc::new(DatabaseMirror::new(DatabaseScope::Shared)),
                ],
                events: Arc::new(EventFeed::new()),
                disabled,
                running: AtomicBool::new(false),
                idle_pending: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    /// Registers entity descriptors.
    ///
    /// Every record type the application syncs must be registered before
    /// the first fetch; records of unregistered types are skipped with a
    /// warning.
    pub fn register(&self, descriptors: Vec<EntityDescriptor>) -> SyncResult<()> {
        for descriptor in descriptors {
            self.core.state.register(descriptor)?;
        }
        Ok(())
    }

    /// Starts the engine.
    ///
    /// Queues one-time setup (private zone, per-database subscriptions,
    /// both flag-gated and so no-ops on later launches) followed by a fetch
    /// cycle per database. Calling `start` on a running engine does
    /// nothing.
    pub fn start(&self) {
        if self.core.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.core.disabled.store(false, Ordering::SeqCst);
        info!("engine starting");
        let core = Arc::clone(&self.core);
        self.core.queue.submit(move || EngineCore::run_setup(&core));
    }

    /// Stops the engine.
    ///
    /// Sets the advisory disabled flag: queued work bails at its next
    /// check, in-flight remote calls finish, and no new cycles are
    /// accepted. Local reads and writes keep working.
    pub fn stop(&self) {
        if !self.core.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.core.disabled.store(true, Ordering::SeqCst);
        info!("engine stopped");
    }

    /// Returns true while the engine is started.
    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::SeqCst)
    }

    /// Queues a push cycle for each database: every unsynced entity is
    /// saved remotely, every tombstone deleted remotely.
    ///
    /// Incoming changes arrive through [`fetch_changes`](Self::fetch_changes)
    /// and wake signals, not here. No-op while stopped. One `Idle` event
    /// follows once the burst has drained.
    pub fn sync(&self) {
        if self.core.is_disabled() {
            return;
        }
        for mirror in &self.core.mirrors {
            let core = Arc::clone(&self.core);
            let mirror = Arc::clone(mirror);
            self.core
                .queue
                .submit(move || EngineCore::run_push(&core, &mirror));
        }
        EngineCore::notify_when_idle(&self.core);
    }

    /// Queues a fetch cycle for each database without pushing.
    pub fn fetch_changes(&self) {
        if self.core.is_disabled() {
            return;
        }
        for mirror in &self.core.mirrors {
            let core = Arc::clone(&self.core);
            let mirror = Arc::clone(mirror);
            self.core.queue.submit(move || core.run_fetch(&mirror));
        }
        EngineCore::notify_when_idle(&self.core);
    }

    /// Reacts to a push notification.
    ///
    /// Maps the subscription id to a database and queues one fetch cycle
    /// for it. While that fetch is pending, further signals for the same
    /// database are acknowledged but coalesced into it.
    pub fn handle_wake_signal(&self, signal: &WakeSignal) -> WakeAck {
        if self.core.is_disabled() {
            return WakeAck::Ignored;
        }
        let Some(mirror) = self
            .core
            .mirrors
            .iter()
            .find(|mirror| mirror.subscription_id() == signal.subscription_id)
        else {
            return WakeAck::Ignored;
        };
        if !mirror.begin_fetch() {
            return WakeAck::Coalesced;
        }
        let core = Arc::clone(&self.core);
        let mirror = Arc::clone(mirror);
        self.core.queue.submit(move || {
            core.run_fetch(&mirror);
            mirror.end_fetch();
        });
        EngineCore::notify_when_idle(&self.core);
        WakeAck::Scheduled
    }

    /// Accepts a share invitation and queues a fetch of the shared
    /// database, which will announce the owner's zone and bring the shared
    /// records in.
    ///
    /// # Errors
    ///
    /// [`SyncError::Disabled`] while stopped; service errors from the
    /// acceptance call.
    pub fn accept_incoming_share(&self, metadata: &ShareMetadata) -> SyncResult<()> {
        if self.core.is_disabled() {
            return Err(SyncError::Disabled);
        }
        self.core.remote.accept_share(metadata)?;
        info!(zone = %metadata.zone, "share accepted");
        let core = Arc::clone(&self.core);
        let mirror = Arc::clone(&self.core.mirrors[SHARED]);
        self.core.queue.submit(move || core.run_fetch(&mirror));
        EngineCore::notify_when_idle(&self.core);
        Ok(())
    }

    /// Shares a record, returning a handle invitees can be given.
    ///
    /// Reuses the existing share when the root already carries one.
    /// Otherwise creates a share record in the root's zone and saves root
    /// and share in one batch, so the root's share pointer and the share
    /// record land together.
    ///
    /// # Errors
    ///
    /// [`SyncError::Disabled`] while stopped; [`SyncError::MissingMirror`]
    /// when the root has never synced (there is no server copy to attach a
    /// share to); service errors from the save.
    pub fn create_share(&self, root: &RecordId) -> SyncResult<ShareHandle> {
        if self.core.is_disabled() {
            return Err(SyncError::Disabled);
        }
        let core = &self.core;
        let Some(root_mirror) = core.state.cache().load(root)? else {
            return Err(SyncError::MissingMirror {
                record_id: root.clone(),
            });
        };
        if let Some(existing) = &root_mirror.share {
            if let Some(share) = core.state.cache().load(existing)? {
                let read_write = share
                    .field(SHARE_PERMISSION_FIELD)
                    .and_then(FieldValue::as_bool)
                    .unwrap_or(true);
                return Ok(ShareHandle {
                    id: share.id,
                    zone: share.zone,
                    read_write,
                });
            }
        }

        let share_id = share_id_for(root);
        let mut share = RemoteRecord::new(
            share_id.clone(),
            SHARE_RECORD_TYPE,
            root_mirror.zone.clone(),
        );
        share.set_field(SHARE_PERMISSION_FIELD, FieldValue::from(true));
        share.set_field(SHARE_ROOT_FIELD, FieldValue::from(root.as_str()));

        // Push the current local fields, not the stale mirror, so sharing
        // does not revert unsynced edits.
        let mut baselines = BTreeMap::new();
        let mut outgoing_root = match core.state.entity(root)? {
            Some(entity) => {
                baselines.insert(root.clone(), entity.modified_at);
                core.state.build_outgoing(&entity, &core.private_zone())?
            }
            None => root_mirror.clone(),
        };
        outgoing_root.share = Some(share_id.clone());

        let scope = if root_mirror.zone.is_owned() {
            DatabaseScope::Private
        } else {
            DatabaseScope::Shared
        };
        let outcome = core
            .remote
            .modify_records(scope, &[outgoing_root, share], &[])?;
        core.state.mark_saved(&outcome.saved, &baselines)?;

        let read_write = outcome
            .saved
            .iter()
            .find(|record| record.id == share_id)
            .and_then(|record| record.field(SHARE_PERMISSION_FIELD))
            .and_then(FieldValue::as_bool)
            .unwrap_or(true);
        info!(root = %root, share = %share_id, "share created");
        Ok(ShareHandle {
            id: share_id,
            zone: root_mirror.zone,
            read_write,
        })
    }

    /// Resolves the share governing a record from the cached mirrors.
    ///
    /// Returns `None` when the record is unknown, has never synced, or is
    /// not shared. The handle's zone identifies the owner; the caller never
    /// supplies ownership.
    pub fn fetch_share(&self, root: &RecordId) -> Option<ShareHandle> {
        let cache = self.core.state.cache();
        let root_mirror = match cache.load(root) {
            Ok(found) => found?,
            Err(error) => {
                warn!(root = %root, %error, "share lookup failed");
                return None;
            }
        };
        let share_id = root_mirror.share?;
        let share = match cache.load(&share_id) {
            Ok(found) => found?,
            Err(error) => {
                warn!(root = %root, %error, "share lookup failed");
                return None;
            }
        };
        let read_write = share
            .field(SHARE_PERMISSION_FIELD)
            .and_then(FieldValue::as_bool)
            .unwrap_or(false);
        Some(ShareHandle {
            id: share.id,
            zone: share.zone,
            read_write,
        })
    }

    /// Saves an application record locally, marking it for the next push.
    ///
    /// Works while the engine is stopped; offline edits push after the
    /// next `start`.
    ///
    /// # Errors
    ///
    /// Unregistered type, undeclared or mistyped fields, or a read-only
    /// shared record.
    pub fn save_local(
        &self,
        id: &RecordId,
        record_type: &str,
        fields: BTreeMap<String, FieldValue>,
    ) -> SyncResult<()> {
        self.core.state.save_local(id, record_type, fields)
    }

    /// Tombstones a record locally; the next push deletes it remotely.
    pub fn delete_local(&self, id: &RecordId) -> SyncResult<()> {
        self.core.state.delete_local(id)
    }

    /// Reads one entity.
    pub fn entity(&self, id: &RecordId) -> SyncResult<Option<LocalEntity>> {
        self.core.state.entity(id)
    }

    /// Reads all entities matching a filter.
    pub fn entities(&self, filter: &EntityFilter) -> SyncResult<Vec<LocalEntity>> {
        self.core.state.entities(filter)
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.core.events.subscribe()
    }

    /// Blocks until every queued operation has run.
    ///
    /// Retries that are scheduled but whose delay has not elapsed are not
    /// waited for.
    pub fn drain(&self) {
        self.core.queue.drain();
    }

    #[cfg(test)]
    fn mirror(&self, scope: DatabaseScope) -> Arc<DatabaseMirror> {
        let index = match scope {
            DatabaseScope::Private => PRIVATE,
            DatabaseScope::Shared => SHARED,
        };
        Arc::clone(&self.core.mirrors[index])
    }
}

impl<R: RemoteService + 'static> Drop for SyncEngine<R> {
    /// Cancels parked retries and waits for jobs in flight. A parked retry
    /// holds the core, so it must be dropped here for the stores behind the
    /// engine to be released with the handle.
    fn drop(&mut self) {
        self.core.running.store(false, Ordering::SeqCst);
        self.core.disabled.store(true, Ordering::SeqCst);
        self.core.retry.cancel_all();
        self.core.queue.drain();
    }
}

impl<R: RemoteService + 'static> EngineCore<R> {
    fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    fn private_zone(&self) -> ZoneId {
        ZoneId::custom(self.config.zone_name.as_str())
    }

    /// One-time setup, then an initial fetch cycle per database.
    fn run_setup(core: &Arc<Self>) {
        if core.is_disabled() {
            return;
        }
        let private_zone = core.private_zone();
        let result = (|| -> SyncResult<()> {
            core.zones.ensure_zone(DatabaseScope::Private, &private_zone)?;
            core.mirrors[PRIVATE].add_zone(private_zone.clone());
            for mirror in &core.mirrors {
                core.zones.ensure_subscription(mirror.scope())?;
            }
            Ok(())
        })();
        match result {
            Ok(()) => {
                for mirror in &core.mirrors {
                    let fetch_core = Arc::clone(core);
                    let mirror = Arc::clone(mirror);
                    core.queue.submit(move || fetch_core.run_fetch(&mirror));
                }
            }
            Err(SyncError::Disabled) => {}
            Err(error) => {
                error!(%error, "setup failed");
                core.events.emit(EngineEvent::Failed {
                    scope: DatabaseScope::Private,
                    message: error.to_string(),
                });
            }
        }
    }

    fn run_fetch(&self, mirror: &DatabaseMirror) {
        match self.fetcher.fetch_database(mirror) {
            Ok(outcome) => {
                self.events.emit(EngineEvent::FetchCompleted {
                    scope: mirror.scope(),
                    changed: outcome.changed,
                    deleted: outcome.deleted,
                });
            }
            Err(SyncError::Disabled) => {}
            Err(error) => {
                error!(scope = mirror.scope().name(), %error, "fetch failed");
                self.events.emit(EngineEvent::Failed {
                    scope: mirror.scope(),
                    message: error.to_string(),
                });
            }
        }
    }

    fn run_push(core: &Arc<Self>, mirror: &Arc<DatabaseMirror>) {
        match core.pusher.push_database(mirror) {
            Ok(PushDisposition::Completed { saved, deleted }) => {
                core.events.emit(EngineEvent::PushCompleted {
                    scope: mirror.scope(),
                    saved,
                    deleted,
                });
            }
            Ok(PushDisposition::RetryAfter(delay)) => {
                core.events.emit(EngineEvent::RetryScheduled {
                    scope: mirror.scope(),
                    delay,
                });
                let retry_core = Arc::clone(core);
                let retry_mirror = Arc::clone(mirror);
                core.retry.schedule(delay, move || {
                    // Re-checked when the deadline fires; a stopped engine
                    // drops the parked push.
                    if retry_core.is_disabled() {
                        return;
                    }
                    Self::run_push(&retry_core, &retry_mirror);
                });
            }
            Err(SyncError::Disabled) => {}
            Err(error) => {
                error!(scope = mirror.scope().name(), %error, "push failed");
                core.events.emit(EngineEvent::Failed {
                    scope: mirror.scope(),
                    message: error.to_string(),
                });
            }
        }
    }

    /// Arms the drain-then-notify waiter; at most one per burst.
    ///
    /// The waiter captures the queue and the event feed, never the whole
    /// core, so a waiter that outlives the engine handle cannot pin the
    /// stores.
    fn notify_when_idle(core: &Arc<Self>) {
        if core.idle_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let queue = Arc::clone(&core.queue);
        let events = Arc::clone(&core.events);
        let pending = Arc::clone(&core.idle_pending);
        thread::spawn(move || {
            queue.drain();
            pending.store(false, Ordering::SeqCst);
            events.emit(EngineEvent::Idle);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackRemote;
    use std::time::Duration;
    use zonesync_store::{FieldKind, MemoryBlobStore, MemoryEntityStore};

    fn note_descriptor() -> EntityDescriptor {
        EntityDescriptor::new("note")
            .with_field("title", FieldKind::Text)
            .with_optional_field("body", FieldKind::Text)
    }

    fn engine() -> (SyncEngine<LoopbackRemote>, Arc<LoopbackRemote>) {
        let remote = Arc::new(LoopbackRemote::new());
        let engine = SyncEngine::new(
            EngineConfig::new("notes").with_max_workers(2),
            Arc::clone(&remote),
            Arc::new(MemoryEntityStore::new()),
            Arc::new(MemoryBlobStore::new()),
        );
        engine.register(vec![note_descriptor()]).unwrap();
        (engine, remote)
    }

    fn note_fields(title: &str) -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), FieldValue::from(title));
        fields
    }

    #[test]
    fn start_runs_setup_once() {
        let (engine, remote) = engine();
        engine.start();
        engine.drain();
        engine.start();
        engine.drain();

        let counts = remote.counts();
        assert_eq!(counts.zone_creates, 1);
        assert_eq!(counts.subscriptions, 2);
        assert!(remote.zone_exists(DatabaseScope::Private, &ZoneId::custom("notes")));
        assert!(remote.subscription_exists(DatabaseScope::Private, "private-changes"));
        assert!(remote.subscription_exists(DatabaseScope::Shared, "shared-changes"));
    }

    #[test]
    fn local_edit_pushes_and_marks_synced() {
        let (engine, remote) = engine();
        engine.start();
        engine.drain();

        let id = RecordId::new("n1");
        engine.save_local(&id, "note", note_fields("hello")).unwrap();
        engine.sync();
        engine.drain();

        let row = engine.entity(&id).unwrap().unwrap();
        assert!(row.synced);
        let server = remote.record(DatabaseScope::Private, &id).unwrap();
        assert_eq!(server.field("title").unwrap().as_text(), Some("hello"));
    }

    #[test]
    fn offline_edits_are_accepted_and_push_after_start() {
        let (engine, remote) = engine();
        let id = RecordId::new("n1");
        engine.save_local(&id, "note", note_fields("offline")).unwrap();
        assert!(!engine.entity(&id).unwrap().unwrap().synced);
        assert_eq!(remote.counts().modifies, 0);

        engine.start();
        engine.drain();
        engine.sync();
        engine.drain();
        assert!(engine.entity(&id).unwrap().unwrap().synced);
    }

    #[test]
    fn wake_signal_routing_and_coalescing() {
        let (engine, _remote) = engine();
        let signal = WakeSignal::new("private-changes");
        assert_eq!(engine.handle_wake_signal(&signal), WakeAck::Ignored);

        engine.start();
        engine.drain();
        assert_eq!(
            engine.handle_wake_signal(&WakeSignal::new("someone-elses")),
            WakeAck::Ignored
        );

        // Simulate an in-flight fetch; the signal must coalesce into it.
        let mirror = engine.mirror(DatabaseScope::Private);
        assert!(mirror.begin_fetch());
        assert_eq!(engine.handle_wake_signal(&signal), WakeAck::Coalesced);
        mirror.end_fetch();

        assert_eq!(engine.handle_wake_signal(&signal), WakeAck::Scheduled);
        engine.drain();
    }

    #[test]
    fn stop_makes_triggers_no_ops() {
        let (engine, remote) = engine();
        engine.start();
        engine.drain();
        engine.stop();
        let before = remote.counts();

        engine.sync();
        engine.fetch_changes();
        assert_eq!(
            engine.handle_wake_signal(&WakeSignal::new("private-changes")),
            WakeAck::Ignored
        );
        engine.drain();
        assert_eq!(remote.counts(), before);
        assert!(matches!(
            engine.accept_incoming_share(&ShareMetadata {
                share_id: RecordId::new("share-x"),
                zone: ZoneId::new("notes", "alice"),
            }),
            Err(SyncError::Disabled)
        ));
        assert!(matches!(
            engine.create_share(&RecordId::new("n1")),
            Err(SyncError::Disabled)
        ));
    }

    #[test]
    fn start_is_idempotent_for_running_state() {
        let (engine, _remote) = engine();
        assert!(!engine.is_running());
        engine.start();
        assert!(engine.is_running());
        engine.stop();
        assert!(!engine.is_running());
        engine.stop();
        assert!(!engine.is_running());
    }

    #[test]
    fn create_share_then_fetch_share_round_trips() {
        let (engine, remote) = engine();
        engine.start();
        engine.drain();

        let id = RecordId::new("n1");
        engine.save_local(&id, "note", note_fields("shared")).unwrap();
        engine.sync();
        engine.drain();

        let handle = engine.create_share(&id).unwrap();
        assert_eq!(handle.id, RecordId::new("share-n1"));
        assert!(handle.read_write);
        assert_eq!(handle.zone, ZoneId::custom("notes"));
        assert!(remote
            .record(DatabaseScope::Private, &handle.id)
            .is_some());
        let server_root = remote.record(DatabaseScope::Private, &id).unwrap();
        assert_eq!(server_root.share, Some(handle.id.clone()));

        // A second call reuses the established share.
        let again = engine.create_share(&id).unwrap();
        assert_eq!(again.id, handle.id);

        assert_eq!(engine.fetch_share(&id), Some(handle));
        assert_eq!(engine.fetch_share(&RecordId::new("unknown")), None);
    }

    #[test]
    fn create_share_requires_a_synced_root() {
        let (engine, _remote) = engine();
        engine.start();
        engine.drain();

        let id = RecordId::new("never-synced");
        engine.save_local(&id, "note", note_fields("draft")).unwrap();
        assert!(matches!(
            engine.create_share(&id),
            Err(SyncError::MissingMirror { .. })
        ));
    }

    #[test]
    fn events_flow_and_idle_closes_the_burst() {
        let (engine, _remote) = engine();
        let events = engine.subscribe();
        engine.start();
        engine.drain();

        engine
            .save_local(&RecordId::new("n1"), "note", note_fields("x"))
            .unwrap();
        engine.sync();
        engine.drain();

        let mut saw_push = false;
        let mut saw_idle = false;
        while let Ok(event) = events.recv_timeout(Duration::from_secs(2)) {
            match event {
                EngineEvent::PushCompleted { saved, .. } if saved > 0 => saw_push = true,
                EngineEvent::Idle => {
                    saw_idle = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_push);
        assert!(saw_idle);
    }

    #[test]
    fn accepted_share_is_fetched_into_the_shared_scope() {
        let (engine, remote) = engine();
        engine.start();
        engine.drain();

        let owner_zone = ZoneId::new("notes", "alice");
        let metadata = ShareMetadata {
            share_id: RecordId::new("share-a1"),
            zone: owner_zone.clone(),
        };
        let mut shared_note =
            RemoteRecord::new(RecordId::new("a1"), "note", owner_zone.clone());
        shared_note.set_field("title", FieldValue::from("from alice"));
        let mut share = RemoteRecord::new(
            RecordId::new("share-a1"),
            SHARE_RECORD_TYPE,
            owner_zone.clone(),
        );
        share.set_field(SHARE_PERMISSION_FIELD, FieldValue::from(true));
        share.set_field(SHARE_ROOT_FIELD, FieldValue::from("a1"));
        remote.stage_share(&metadata, vec![shared_note, share]);

        engine.accept_incoming_share(&metadata).unwrap();
        engine.drain();

        let row = engine.entity(&RecordId::new("a1")).unwrap().unwrap();
        assert_eq!(row.owner_name, "alice");
        assert!(row.read_write);
        assert_eq!(row.field("title").unwrap().as_text(), Some("from alice"));
    }
}
