//! Sync bookkeeping: change tokens and one-time setup flags.
//!
//! Tokens are stored as raw bytes because they are opaque server handles.
//! Setup flags record that a zone or subscription was created so the engine
//! can skip the round trip on later launches; the server treats repeated
//! creation as an upsert, so a lost flag costs one redundant call and
//! nothing else.
//!
//! Key layout in the backing [`BlobStore`]:
//!
//! - `token/db/<scope>`: database-level change token
//! - `token/zone/<scope>/<owner>/<name>`: per-zone change token
//! - `flag/subscription/<scope>`: change subscription registered
//! - `flag/zone/<scope>/<name>`: zone created by this client

use std::sync::Arc;

use zonesync_protocol::{ChangeToken, DatabaseScope, ZoneId};
use zonesync_store::BlobStore;

use crate::error::SyncResult;

const FLAG_SET: &[u8] = &[1];

/// Persistent store for change tokens and setup flags.
pub struct MetaStore {
    blobs: Arc<dyn BlobStore>,
}

impl MetaStore {
    /// Creates a meta store over the given blob store.
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    fn database_token_key(scope: DatabaseScope) -> String {
        format!("token/db/{}", scope.name())
    }

    fn zone_token_key(scope: DatabaseScope, zone: &ZoneId) -> String {
        format!("token/zone/{}/{}/{}", scope.name(), zone.owner, zone.name)
    }

    fn subscription_flag_key(scope: DatabaseScope) -> String {
        format!("flag/subscription/{}", scope.name())
    }

    fn zone_flag_key(scope: DatabaseScope, zone_name: &str) -> String {
        format!("flag/zone/{}/{zone_name}", scope.name())
    }

    /// Returns the database-level change token for `scope`, if one is saved.
    pub fn database_token(&self, scope: DatabaseScope) -> SyncResult<Option<ChangeToken>> {
        let bytes = self.blobs.get(&Self::database_token_key(scope))?;
        Ok(bytes.map(ChangeToken::from))
    }

    /// Saves the database-level change token for `scope`.
    pub fn set_database_token(&self, scope: DatabaseScope, token: &ChangeToken) -> SyncResult<()> {
        self.blobs
            .put(&Self::database_token_key(scope), token.as_bytes())?;
        Ok(())
    }

    /// Discards the database-level token so the next fetch starts from scratch.
    pub fn clear_database_token(&self, scope: DatabaseScope) -> SyncResult<()> {
        self.blobs.remove(&Self::database_token_key(scope))?;
        Ok(())
    }

    /// Returns the per-zone change token, if one is saved.
    pub fn zone_token(&self, scope: DatabaseScope, zone: &ZoneId) -> SyncResult<Option<ChangeToken>> {
        let bytes = self.blobs.get(&Self::zone_token_key(scope, zone))?;
        Ok(bytes.map(ChangeToken::from))
    }

    /// Saves the per-zone change token.
    ///
    /// Callers must persist the records of the batch the token describes
    /// before calling this; a token without its records silently skips
    /// changes forever.
    pub fn set_zone_token(
        &self,
        scope: DatabaseScope,
        zone: &ZoneId,
        token: &ChangeToken,
    ) -> SyncResult<()> {
        self.blobs
            .put(&Self::zone_token_key(scope, zone), token.as_bytes())?;
        Ok(())
    }

    /// Discards the per-zone token so the next fetch replays the zone.
    pub fn clear_zone_token(&self, scope: DatabaseScope, zone: &ZoneId) -> SyncResult<()> {
        self.blobs.remove(&Self::zone_token_key(scope, zone))?;
        Ok(())
    }

    /// Whether the change subscription for `scope` was already registered.
    pub fn is_subscription_created(&self, scope: DatabaseScope) -> SyncResult<bool> {
        Ok(self.blobs.get(&Self::subscription_flag_key(scope))?.is_some())
    }

    /// Records that the change subscription for `scope` exists.
    pub fn mark_subscription_created(&self, scope: DatabaseScope) -> SyncResult<()> {
        self.blobs
            .put(&Self::subscription_flag_key(scope), FLAG_SET)?;
        Ok(())
    }

    /// Whether the named zone was already created by this client.
    pub fn is_zone_created(&self, scope: DatabaseScope, zone_name: &str) -> SyncResult<bool> {
        Ok(self.blobs.get(&Self::zone_flag_key(scope, zone_name))?.is_some())
    }

    /// Records that the named zone exists.
    pub fn mark_zone_created(&self, scope: DatabaseScope, zone_name: &str) -> SyncResult<()> {
        self.blobs
            .put(&Self::zone_flag_key(scope, zone_name), FLAG_SET)?;
        Ok(())
    }

    /// Forgets that the named zone exists, after the server reports it gone.
    pub fn clear_zone_created(&self, scope: DatabaseScope, zone_name: &str) -> SyncResult<()> {
        self.blobs.remove(&Self::zone_flag_key(scope, zone_name))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonesync_store::MemoryBlobStore;

    fn meta() -> MetaStore {
        MetaStore::new(Arc::new(MemoryBlobStore::new()))
    }

    #[test]
    fn database_tokens_are_scoped() {
        let meta = meta();
        assert!(meta.database_token(DatabaseScope::Private).unwrap().is_none());

        meta.set_database_token(DatabaseScope::Private, &ChangeToken::new(vec![1, 2]))
            .unwrap();
        assert_eq!(
            meta.database_token(DatabaseScope::Private).unwrap(),
            Some(ChangeToken::new(vec![1, 2]))
        );
        assert!(meta.database_token(DatabaseScope::Shared).unwrap().is_none());

        meta.clear_database_token(DatabaseScope::Private).unwrap();
        assert!(meta.database_token(DatabaseScope::Private).unwrap().is_none());
    }

    #[test]
    fn zone_tokens_keyed_by_owner_and_name() {
        let meta = meta();
        let mine = ZoneId::custom("notes");
        let theirs = ZoneId::new("notes", "friend");

        meta.set_zone_token(DatabaseScope::Shared, &mine, &ChangeToken::new(vec![9]))
            .unwrap();
        assert!(meta.zone_token(DatabaseScope::Shared, &theirs).unwrap().is_none());
        assert_eq!(
            meta.zone_token(DatabaseScope::Shared, &mine).unwrap(),
            Some(ChangeToken::new(vec![9]))
        );

        meta.clear_zone_token(DatabaseScope::Shared, &mine).unwrap();
        assert!(meta.zone_token(DatabaseScope::Shared, &mine).unwrap().is_none());
    }

    #[test]
    fn setup_flags_start_clear_and_persist() {
        let meta = meta();
        assert!(!meta.is_subscription_created(DatabaseScope::Private).unwrap());
        meta.mark_subscription_created(DatabaseScope::Private).unwrap();
        assert!(meta.is_subscription_created(DatabaseScope::Private).unwrap());
        assert!(!meta.is_subscription_created(DatabaseScope::Shared).unwrap());

        assert!(!meta.is_zone_created(DatabaseScope::Private, "notes").unwrap());
        meta.mark_zone_created(DatabaseScope::Private, "notes").unwrap();
        assert!(meta.is_zone_created(DatabaseScope::Private, "notes").unwrap());

        meta.clear_zone_created(DatabaseScope::Private, "notes").unwrap();
        assert!(!meta.is_zone_created(DatabaseScope::Private, "notes").unwrap());
    }
}
