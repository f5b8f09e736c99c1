//! Key-value blob store trait.

use crate::error::StoreResult;

/// A durable key-value store for small opaque blobs.
///
/// The engine keeps record mirrors, change tokens, and setup flags here.
/// Values are at most a few kilobytes; keys are flat strings namespaced by
/// convention (`mirror/...`, `token/...`, `flag/...`).
///
/// # Invariants
///
/// - `put` is read-your-writes: a following `get` on any thread returns the
///   new value. For a store claiming durability, the value must survive
///   process termination once `put` returns.
/// - `remove` of an absent key is a no-op.
/// - Implementations must be `Send + Sync`; the engine shares one store
///   across databases.
///
/// # Implementors
///
/// - [`super::MemoryBlobStore`] - For testing
/// - [`super::FileBlobStore`] - Snapshot-per-write persistence
pub trait BlobStore: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails; an absent key is
    /// `Ok(None)`.
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value could not be stored durably.
    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Removes the value under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn remove(&self, key: &str) -> StoreResult<()>;

    /// Flushes any buffered writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&self) -> StoreResult<()>;

    /// Returns the number of stored blobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn len(&self) -> StoreResult<usize>;

    /// Returns true when the store holds no blobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}
