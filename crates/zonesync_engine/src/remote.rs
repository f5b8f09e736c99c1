//! Remote record service interface.

use parking_lot::Mutex;
use std::collections::VecDeque;
use zonesync_protocol::{
    ChangeToken, DatabaseChangesPage, DatabaseScope, ModifyOutcome, RecordId, RemoteError,
    RemoteRecord, RemoteResult, ShareMetadata, ZoneChangeRequest, ZoneChangesPage, ZoneId,
};

/// The remote record service the engine reconciles against.
///
/// Calls are blocking; the engine invokes them from queue workers. The
/// service is the authority on record identity, change tags, and tokens;
/// the engine never fabricates any of those.
///
/// # Implementors
///
/// - [`super::LoopbackRemote`] - Faithful in-memory service for tests and
///   demos
/// - [`MockRemote`] - Scripted responses for unit tests
pub trait RemoteService: Send + Sync {
    /// Fetches one page of database-level changes (which zones have news).
    ///
    /// # Errors
    ///
    /// `TokenExpired` when `since` is no longer recognized; transport-level
    /// failures as `Service`.
    fn fetch_database_changes(
        &self,
        scope: DatabaseScope,
        since: Option<&ChangeToken>,
    ) -> RemoteResult<DatabaseChangesPage>;

    /// Fetches one page of record changes for each requested zone.
    ///
    /// Token expiry is reported per zone in the page status, not as a
    /// call-level error.
    ///
    /// # Errors
    ///
    /// `ZoneNotFound` when a requested zone does not exist.
    fn fetch_zone_changes(
        &self,
        scope: DatabaseScope,
        requests: &[ZoneChangeRequest],
    ) -> RemoteResult<Vec<ZoneChangesPage>>;

    /// Saves and deletes records in one atomic batch.
    ///
    /// # Errors
    ///
    /// `PartialFailure` when any item is rejected (sibling items report
    /// `BatchRequestFailed` and nothing is committed); `Busy` under
    /// backpressure.
    fn modify_records(
        &self,
        scope: DatabaseScope,
        to_save: &[RemoteRecord],
        to_delete: &[RecordId],
    ) -> RemoteResult<ModifyOutcome>;

    /// Creates a record zone. Creating an existing zone succeeds.
    ///
    /// # Errors
    ///
    /// Service-side failures as `Service` or `PermissionFailure`.
    fn create_zone(&self, scope: DatabaseScope, zone: &ZoneId) -> RemoteResult<()>;

    /// Deletes a record zone and everything in it.
    ///
    /// # Errors
    ///
    /// `ZoneNotFound` when the zone does not exist.
    fn delete_zone(&self, scope: DatabaseScope, zone: &ZoneId) -> RemoteResult<()>;

    /// Registers the change subscription for a database. Idempotent.
    ///
    /// # Errors
    ///
    /// Service-side failures as `Service`.
    fn manage_subscription(&self, scope: DatabaseScope, subscription_id: &str) -> RemoteResult<()>;

    /// Accepts a share invitation, making the owner's zone visible in the
    /// shared database.
    ///
    /// # Errors
    ///
    /// `Service` when the share is unknown or already accepted by someone
    /// else.
    fn accept_share(&self, metadata: &ShareMetadata) -> RemoteResult<()>;
}

/// Scripted [`RemoteService`] for unit tests.
///
/// Responses are queued per call kind and consumed in order; an empty
/// queue yields a benign default. Every call is recorded by name.
#[derive(Default)]
pub struct MockRemote {
    database_pages: Mutex<VecDeque<RemoteResult<DatabaseChangesPage>>>,
    zone_pages: Mutex<VecDeque<RemoteResult<Vec<ZoneChangesPage>>>>,
    modify_results: Mutex<VecDeque<RemoteResult<ModifyOutcome>>>,
    setup_failure: Mutex<Option<RemoteError>>,
    calls: Mutex<Vec<String>>,
}

impl MockRemote {
    /// Creates a mock with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a database-changes response.
    pub fn push_database_page(&self, page: RemoteResult<DatabaseChangesPage>) {
        self.database_pages.lock().push_back(page);
    }

    /// Queues a zone-changes response.
    pub fn push_zone_pages(&self, pages: RemoteResult<Vec<ZoneChangesPage>>) {
        self.zone_pages.lock().push_back(pages);
    }

    /// Queues a modify-records response.
    pub fn push_modify_result(&self, result: RemoteResult<ModifyOutcome>) {
        self.modify_results.lock().push_back(result);
    }

    /// Makes the next setup call (zone/subscription/share) fail.
    pub fn fail_next_setup(&self, error: RemoteError) {
        *self.setup_failure.lock() = Some(error);
    }

    /// Returns the names of all calls made so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record_call(&self, name: &str) {
        self.calls.lock().push(name.to_string());
    }

    fn take_setup_failure(&self) -> RemoteResult<()> {
        match self.setup_failure.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl RemoteService for MockRemote {
    fn fetch_database_changes(
        &self,
        _scope: DatabaseScope,
        since: Option<&ChangeToken>,
    ) -> RemoteResult<DatabaseChangesPage> {
        self.record_call("fetch_database_changes");
        self.database_pages.lock().pop_front().unwrap_or_else(|| {
            Ok(DatabaseChangesPage {
                zones_changed: Vec::new(),
                zones_deleted: Vec::new(),
                token: since.cloned().unwrap_or_else(|| ChangeToken::new(vec![0])),
                more: false,
            })
        })
    }

    fn fetch_zone_changes(
        &self,
        _scope: DatabaseScope,
        _requests: &[ZoneChangeRequest],
    ) -> RemoteResult<Vec<ZoneChangesPage>> {
        self.record_call("fetch_zone_changes");
        self.zone_pages
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn modify_records(
        &self,
        _scope: DatabaseScope,
        _to_save: &[RemoteRecord],
        _to_delete: &[RecordId],
    ) -> RemoteResult<ModifyOutcome> {
        self.record_call("modify_records");
        self.modify_results
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(ModifyOutcome::default()))
    }

    fn create_zone(&self, _scope: DatabaseScope, _zone: &ZoneId) -> RemoteResult<()> {
        self.record_call("create_zone");
        self.take_setup_failure()
    }

    fn delete_zone(&self, _scope: DatabaseScope, _zone: &ZoneId) -> RemoteResult<()> {
        self.record_call("delete_zone");
        self.take_setup_failure()
    }

    fn manage_subscription(
        &self,
        _scope: DatabaseScope,
        _subscription_id: &str,
    ) -> RemoteResult<()> {
        self.record_call("manage_subscription");
        self.take_setup_failure()
    }

    fn accept_share(&self, _metadata: &ShareMetadata) -> RemoteResult<()> {
        self.record_call("accept_share");
        self.take_setup_failure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_replays_scripted_responses() {
        let mock = MockRemote::new();
        mock.push_database_page(Err(RemoteError::TokenExpired));

        let err = mock
            .fetch_database_changes(DatabaseScope::Private, None)
            .unwrap_err();
        assert_eq!(err, RemoteError::TokenExpired);

        // Queue exhausted: default empty page.
        let page = mock
            .fetch_database_changes(DatabaseScope::Private, None)
            .unwrap();
        assert!(page.zones_changed.is_empty());
        assert!(!page.more);
    }

    #[test]
    fn mock_records_calls() {
        let mock = MockRemote::new();
        let _ = mock.manage_subscription(DatabaseScope::Private, "private-changes");
        let _ = mock.modify_records(DatabaseScope::Private, &[], &[]);

        assert_eq!(mock.calls(), vec!["manage_subscription", "modify_records"]);
    }

    #[test]
    fn setup_failure_is_consumed_once() {
        let mock = MockRemote::new();
        mock.fail_next_setup(RemoteError::service("down"));

        let zone = ZoneId::custom("z");
        assert!(mock.create_zone(DatabaseScope::Private, &zone).is_err());
        assert!(mock.create_zone(DatabaseScope::Private, &zone).is_ok());
    }
}
