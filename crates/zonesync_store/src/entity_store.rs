//! Keyed entity store trait.

use crate::entity::{EntityFilter, EntityWrite, LocalEntity};
use crate::error::StoreResult;
use zonesync_protocol::RecordId;

/// The keyed object store the engine reconciles with the remote service.
///
/// The engine is the only writer during sync; host applications write
/// through the engine's local-save path so that sync bookkeeping stays
/// consistent.
///
/// # Invariants
///
/// - `apply` is atomic: either every write in the slice takes effect or
///   none does. The engine relies on this for crash consistency: a change
///   token is only advanced after the batch it describes has been applied.
/// - `select` returns entities ordered by id.
/// - Deleting an absent id inside `apply` is a no-op, not an error.
/// - Implementations must be `Send + Sync`.
///
/// # Implementors
///
/// - [`super::MemoryEntityStore`] - For testing and the demo
pub trait EntityStore: Send + Sync {
    /// Reads one entity by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails; an absent id is
    /// `Ok(None)`.
    fn get(&self, id: &RecordId) -> StoreResult<Option<LocalEntity>>;

    /// Returns all entities matching the filter, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn select(&self, filter: &EntityFilter) -> StoreResult<Vec<LocalEntity>>;

    /// Applies a batch of writes atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be applied; in that case no
    /// write in the batch may be visible.
    fn apply(&self, writes: &[EntityWrite]) -> StoreResult<()>;

    /// Returns the number of stored entities (tombstones included).
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn len(&self) -> StoreResult<usize>;

    /// Returns true when the store holds no entities.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}
