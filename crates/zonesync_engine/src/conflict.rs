//! Conflict resolution for rejected saves.
//!
//! When a push comes back as a partial failure, the resolver turns the
//! per-item failure map into a concrete follow-up plan: which records to
//! resubmit (resolved or unmodified), which server records to adopt as-is,
//! which to recreate from scratch, and which failures are terminal. The
//! resolution policy itself is pluggable; the engine defaults to
//! [`ClientFieldsWin`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use zonesync_protocol::{ConflictCase, ItemFailure, RecordId, RemoteRecord};

/// Merges a rejected save with the current server record.
///
/// # Invariants
///
/// - The returned record must carry the server record's change tag, so the
///   resubmission is accepted against the server's current version.
/// - Resolution must be deterministic: the same case always resolves to the
///   same record.
pub trait ResolutionPolicy: Send + Sync {
    /// Produces the record to resubmit for a genuine conflict.
    fn resolve(&self, case: &ConflictCase) -> RemoteRecord;
}

/// Default policy: the server record is the base, and every field the
/// client sent overwrites the server's value. Fields the client never set
/// keep the server's value; local edits are never silently dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientFieldsWin;

impl ResolutionPolicy for ClientFieldsWin {
    fn resolve(&self, case: &ConflictCase) -> RemoteRecord {
        let mut merged = case.server_record.clone();
        for (name, value) in &case.client_record.fields {
            merged.fields.insert(name.clone(), value.clone());
        }
        merged
    }
}

/// Follow-up actions for one round of partial-failure handling.
#[derive(Debug, Default)]
pub(crate) struct ResolutionPlan {
    /// Resolved or unattempted saves to send again.
    pub resubmit: Vec<RemoteRecord>,
    /// Unattempted deletes to send again.
    pub resubmit_deletes: Vec<RecordId>,
    /// Server records to adopt locally without another round trip.
    pub adopt: Vec<RemoteRecord>,
    /// Saves whose server record vanished; push again as fresh creates.
    pub recreate: Vec<RecordId>,
    /// Deletes whose server record vanished; already gone, purge locally.
    pub drop_tombstones: Vec<RecordId>,
    /// Failures no resubmission can fix.
    pub terminal: BTreeMap<RecordId, ItemFailure>,
}

impl ResolutionPlan {
    /// Returns true when the plan calls for another modify round.
    pub fn needs_resubmit(&self) -> bool {
        !self.resubmit.is_empty() || !self.resubmit_deletes.is_empty() || !self.recreate.is_empty()
    }
}

/// Classifies a partial failure into a [`ResolutionPlan`].
pub struct ConflictResolver {
    policy: Arc<dyn ResolutionPolicy>,
}

impl ConflictResolver {
    /// Creates a resolver with the given policy.
    pub fn new(policy: Arc<dyn ResolutionPolicy>) -> Self {
        Self { policy }
    }

    /// Classifies every per-item failure of one rejected modify call.
    ///
    /// `attempted_saves` and `attempted_deletes` are the sets the failed
    /// call carried; they decide which side an id-only failure reason
    /// belongs to. Ids that match neither side are terminal, since nothing
    /// can be resubmitted for them.
    pub(crate) fn plan(
        &self,
        failures: &BTreeMap<RecordId, ItemFailure>,
        attempted_saves: &[RemoteRecord],
        attempted_deletes: &[RecordId],
    ) -> ResolutionPlan {
        let save_ids: BTreeMap<&RecordId, &RemoteRecord> =
            attempted_saves.iter().map(|r| (&r.id, r)).collect();
        let delete_ids: BTreeSet<&RecordId> = attempted_deletes.iter().collect();

        let mut plan = ResolutionPlan::default();
        for (id, failure) in failures {
            match failure {
                ItemFailure::Conflict(case) => {
                    if case.is_spurious() {
                        plan.adopt.push(case.server_record.clone());
                    } else {
                        plan.resubmit.push(self.policy.resolve(case));
                    }
                }
                ItemFailure::BatchRequestFailed => {
                    if let Some(record) = save_ids.get(id) {
                        plan.resubmit.push((*record).clone());
                    } else if delete_ids.contains(id) {
                        plan.resubmit_deletes.push(id.clone());
                    } else {
                        plan.terminal.insert(id.clone(), failure.clone());
                    }
                }
                ItemFailure::UnknownItem => {
                    if save_ids.contains_key(id) {
                        plan.recreate.push(id.clone());
                    } else if delete_ids.contains(id) {
                        plan.drop_tombstones.push(id.clone());
                    } else {
                        plan.terminal.insert(id.clone(), failure.clone());
                    }
                }
                ItemFailure::Other(_) => {
                    plan.terminal.insert(id.clone(), failure.clone());
                }
            }
        }
        plan
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(Arc::new(ClientFieldsWin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonesync_protocol::{FieldValue, ZoneId};

    fn record(id: &str, tag: Option<&str>) -> RemoteRecord {
        let mut record =
            RemoteRecord::new(RecordId::new(id), "note", ZoneId::custom("notes"));
        record.change_tag = tag.map(str::to_string);
        record
    }

    fn conflict(id: &str, server_tag: &str, client_tag: &str) -> ItemFailure {
        let mut server = record(id, Some(server_tag));
        server.set_field("a", 1i64);
        server.set_field("b", 2i64);
        let mut client = record(id, Some(client_tag));
        client.set_field("a", 5i64);
        ItemFailure::Conflict(ConflictCase {
            server_record: server,
            client_record: client,
            ancestor_record: None,
        })
    }

    #[test]
    fn client_fields_overlay_server_base() {
        let ItemFailure::Conflict(case) = conflict("n1", "t1", "t0") else {
            unreachable!();
        };
        let merged = ClientFieldsWin.resolve(&case);

        // Server base keeps its tag and untouched fields; client fields win.
        assert_eq!(merged.change_tag, Some("t1".to_string()));
        assert_eq!(merged.field("a"), Some(&FieldValue::Int(5)));
        assert_eq!(merged.field("b"), Some(&FieldValue::Int(2)));
    }

    #[test]
    fn resolution_is_deterministic() {
        let ItemFailure::Conflict(case) = conflict("n1", "t1", "t0") else {
            unreachable!();
        };
        assert_eq!(ClientFieldsWin.resolve(&case), ClientFieldsWin.resolve(&case));
    }

    #[test]
    fn spurious_conflicts_adopt_the_server_record() {
        let resolver = ConflictResolver::default();
        let mut failures = BTreeMap::new();
        failures.insert(RecordId::new("n1"), conflict("n1", "t1", "t1"));

        let plan = resolver.plan(&failures, &[record("n1", Some("t1"))], &[]);
        assert_eq!(plan.adopt.len(), 1);
        assert!(plan.resubmit.is_empty());
        assert!(!plan.needs_resubmit());
    }

    #[test]
    fn batch_failures_resubmit_unmodified() {
        let resolver = ConflictResolver::default();
        let attempted = record("n2", None);
        let mut failures = BTreeMap::new();
        failures.insert(RecordId::new("n1"), conflict("n1", "t1", "t0"));
        failures.insert(RecordId::new("n2"), ItemFailure::BatchRequestFailed);
        failures.insert(RecordId::new("n3"), ItemFailure::BatchRequestFailed);

        let plan = resolver.plan(
            &failures,
            &[record("n1", Some("t0")), attempted.clone()],
            &[RecordId::new("n3")],
        );
        assert!(plan.needs_resubmit());
        assert_eq!(plan.resubmit.len(), 2);
        assert!(plan.resubmit.contains(&attempted));
        assert_eq!(plan.resubmit_deletes, vec![RecordId::new("n3")]);
        assert!(plan.terminal.is_empty());
    }

    #[test]
    fn unknown_items_split_by_side() {
        let resolver = ConflictResolver::default();
        let mut failures = BTreeMap::new();
        failures.insert(RecordId::new("save"), ItemFailure::UnknownItem);
        failures.insert(RecordId::new("del"), ItemFailure::UnknownItem);

        let plan = resolver.plan(
            &failures,
            &[record("save", Some("t0"))],
            &[RecordId::new("del")],
        );
        assert_eq!(plan.recreate, vec![RecordId::new("save")]);
        assert_eq!(plan.drop_tombstones, vec![RecordId::new("del")]);
    }

    #[test]
    fn other_failures_are_terminal() {
        let resolver = ConflictResolver::default();
        let mut failures = BTreeMap::new();
        failures.insert(
            RecordId::new("n1"),
            ItemFailure::Other("quota exceeded".to_string()),
        );

        let plan = resolver.plan(&failures, &[record("n1", None)], &[]);
        assert!(!plan.needs_resubmit());
        assert_eq!(plan.terminal.len(), 1);
    }
}
