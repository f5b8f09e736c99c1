//! One-time zone and subscription setup.
//!
//! Zone and subscription creation are idempotent on the service side, but a
//! round trip per launch is wasted work, so successful creation is recorded
//! as a persistent flag and skipped from then on. A lost flag therefore
//! costs one redundant call, never missed setup.

use std::sync::Arc;

use tracing::debug;

use zonesync_protocol::{DatabaseScope, ZoneId};

use crate::error::SyncResult;
use crate::remote::RemoteService;
use crate::state_store::SyncStateStore;

/// Flag-gated creation of zones and change subscriptions.
pub(crate) struct ZoneManager<R: ?Sized> {
    remote: Arc<R>,
    state: Arc<SyncStateStore>,
}

impl<R: RemoteService + ?Sized> ZoneManager<R> {
    pub fn new(remote: Arc<R>, state: Arc<SyncStateStore>) -> Self {
        Self { remote, state }
    }

    /// Creates the zone unless a flag says this client already did.
    ///
    /// Returns true when the zone was created by this call.
    pub fn ensure_zone(&self, scope: DatabaseScope, zone: &ZoneId) -> SyncResult<bool> {
        if self.state.meta().is_zone_created(scope, &zone.name)? {
            return Ok(false);
        }
        self.remote.create_zone(scope, zone)?;
        self.state.meta().mark_zone_created(scope, &zone.name)?;
        debug!(%zone, %scope, "created zone");
        Ok(true)
    }

    /// Registers the change subscription for `scope` unless already done.
    ///
    /// Returns true when the subscription was registered by this call.
    pub fn ensure_subscription(&self, scope: DatabaseScope) -> SyncResult<bool> {
        if self.state.meta().is_subscription_created(scope)? {
            return Ok(false);
        }
        self.remote
            .manage_subscription(scope, &scope.subscription_id())?;
        self.state.meta().mark_subscription_created(scope)?;
        debug!(%scope, "registered change subscription");
        Ok(true)
    }

    /// Drops the creation flag and token for a zone the service reported
    /// gone, so a later `ensure_zone` may recreate it.
    pub fn forget_zone(&self, scope: DatabaseScope, zone: &ZoneId) -> SyncResult<()> {
        self.state.meta().clear_zone_created(scope, &zone.name)?;
        self.state.meta().clear_zone_token(scope, zone)?;
        Ok(())
    }
}
