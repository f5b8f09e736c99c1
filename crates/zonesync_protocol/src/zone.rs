//! Zones and database scopes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Owner name carried by records in zones the local user owns.
///
/// Records fetched from another user's zone carry that user's name instead,
/// which is how shared records are told apart from owned ones.
pub const DEFAULT_OWNER_NAME: &str = "__defaultOwner__";

/// The logical database a zone lives in.
///
/// The private scope holds zones owned by the local user; the shared scope
/// holds zones other users have shared with them. Each scope carries its own
/// change token and its own server subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DatabaseScope {
    /// Zones owned by the local user.
    Private,
    /// Zones shared with the local user by other owners.
    Shared,
}

impl DatabaseScope {
    /// Returns the stable name used in persistence keys.
    pub fn name(&self) -> &'static str {
        match self {
            DatabaseScope::Private => "private",
            DatabaseScope::Shared => "shared",
        }
    }

    /// Returns the subscription identifier registered for this scope.
    ///
    /// Wake signals carry this identifier back, which is how a signal is
    /// routed to the right database.
    pub fn subscription_id(&self) -> String {
        format!("{}-changes", self.name())
    }

    /// All scopes, in fetch order (private first).
    pub fn all() -> [DatabaseScope; 2] {
        [DatabaseScope::Private, DatabaseScope::Shared]
    }
}

impl fmt::Display for DatabaseScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifier of a record zone: a name qualified by its owner.
///
/// Two users can each have a zone named `notes`; the owner field keeps them
/// distinct. Zone ids order records for change fetches and scope a change
/// token.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ZoneId {
    /// Zone name, unique per owner.
    pub name: String,
    /// Owner of the zone.
    pub owner: String,
}

impl ZoneId {
    /// Creates a zone id with an explicit owner.
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
        }
    }

    /// Creates a zone id owned by the local user.
    pub fn custom(name: impl Into<String>) -> Self {
        Self::new(name, DEFAULT_OWNER_NAME)
    }

    /// Returns true when the local user owns this zone.
    pub fn is_owned(&self) -> bool {
        self.owner == DEFAULT_OWNER_NAME
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_names_are_stable() {
        assert_eq!(DatabaseScope::Private.name(), "private");
        assert_eq!(DatabaseScope::Shared.name(), "shared");
        assert_eq!(DatabaseScope::Private.subscription_id(), "private-changes");
    }

    #[test]
    fn custom_zone_is_owned() {
        let zone = ZoneId::custom("notes");
        assert!(zone.is_owned());
        assert_eq!(zone.owner, DEFAULT_OWNER_NAME);
    }

    #[test]
    fn foreign_zone_is_not_owned() {
        let zone = ZoneId::new("notes", "alice");
        assert!(!zone.is_owned());
        assert_eq!(zone.to_string(), "alice/notes");
    }

    #[test]
    fn zone_ids_distinguish_owners() {
        let a = ZoneId::new("notes", "alice");
        let b = ZoneId::new("notes", "bob");
        assert_ne!(a, b);
    }
}
