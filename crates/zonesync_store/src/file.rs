//! File-backed blob store.
//!
//! Directory layout:
//!
//! ```text
//! <store_path>/
//! ├─ BLOBS        # CBOR snapshot of all blobs
//! ├─ BLOBS.tmp    # Temporary file for atomic snapshot writes
//! └─ LOCK         # Advisory lock for single-process access
//! ```
//!
//! Every write rewrites the snapshot through a temp-file-then-rename, so a
//! crash leaves either the old snapshot or the new one, never a torn file.
//! The store holds mirrors, tokens, and flags (small values in small
//! numbers), so the full rewrite stays cheap.

use crate::blob::BlobStore;
use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const SNAPSHOT_FILE: &str = "BLOBS";
const SNAPSHOT_TEMP: &str = "BLOBS.tmp";
const LOCK_FILE: &str = "LOCK";

/// A [`BlobStore`] persisted as a single CBOR snapshot file.
///
/// # Thread Safety
///
/// The store holds an exclusive advisory lock on its directory; only one
/// instance can exist per directory at a time. Within the process, an
/// internal lock serializes writers.
#[derive(Debug)]
pub struct FileBlobStore {
    path: PathBuf,
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl FileBlobStore {
    /// Opens or creates a blob store directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The path exists but is not a directory
    /// - Another process holds the lock (returns `DirectoryLocked`)
    /// - The snapshot cannot be read or decoded
    pub fn open(path: &Path) -> StoreResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(StoreError::InvalidPath(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::DirectoryLocked);
        }

        let blobs = Self::load_snapshot(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            blobs: RwLock::new(blobs),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_snapshot(path: &Path) -> StoreResult<BTreeMap<String, Vec<u8>>> {
        let snapshot_path = path.join(SNAPSHOT_FILE);
        if !snapshot_path.exists() {
            return Ok(BTreeMap::new());
        }

        let mut file = File::open(&snapshot_path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        if data.is_empty() {
            return Ok(BTreeMap::new());
        }

        ciborium::de::from_reader(data.as_slice()).map_err(|e| StoreError::codec(e.to_string()))
    }

    /// Writes the snapshot atomically: temp file, fsync, rename, directory
    /// fsync.
    fn persist(&self, blobs: &BTreeMap<String, Vec<u8>>) -> StoreResult<()> {
        let snapshot_path = self.path.join(SNAPSHOT_FILE);
        let temp_path = self.path.join(SNAPSHOT_TEMP);

        let mut data = Vec::new();
        ciborium::ser::into_writer(blobs, &mut data)
            .map_err(|e| StoreError::codec(e.to_string()))?;

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &snapshot_path)?;
        self.sync_directory()?;

        Ok(())
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StoreResult<()> {
        // On Unix, fsync on the directory makes the rename durable.
        let dir = File::open(&self.path)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StoreResult<()> {
        // Windows NTFS journals metadata; directory fsync is not supported.
        Ok(())
    }
}

impl BlobStore for FileBlobStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.blobs.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let mut blobs = self.blobs.write();
        blobs.insert(key.to_string(), value.to_vec());
        self.persist(&blobs)
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let mut blobs = self.blobs.write();
        if blobs.remove(key).is_some() {
            self.persist(&blobs)?;
        }
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        let blobs = self.blobs.read();
        self.persist(&blobs)
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.blobs.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let store_path = temp.path().join("new_store");
        assert!(!store_path.exists());

        let store = FileBlobStore::open(&store_path).unwrap();
        assert!(store_path.is_dir());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn values_survive_reopen() {
        let temp = tempdir().unwrap();
        let store_path = temp.path().join("persist");

        {
            let store = FileBlobStore::open(&store_path).unwrap();
            store.put("token/db/private", &[1, 2, 3]).unwrap();
            store.put("flag/zone/private/workspace", &[1]).unwrap();
        }

        let store = FileBlobStore::open(&store_path).unwrap();
        assert_eq!(store.get("token/db/private").unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn remove_survives_reopen() {
        let temp = tempdir().unwrap();
        let store_path = temp.path().join("remove");

        {
            let store = FileBlobStore::open(&store_path).unwrap();
            store.put("a", &[1]).unwrap();
            store.remove("a").unwrap();
        }

        let store = FileBlobStore::open(&store_path).unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let store_path = temp.path().join("locked");

        let _store = FileBlobStore::open(&store_path).unwrap();
        let second = FileBlobStore::open(&store_path);
        assert!(matches!(second, Err(StoreError::DirectoryLocked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        let store_path = temp.path().join("reopen");

        {
            let _store = FileBlobStore::open(&store_path).unwrap();
        }
        let _again = FileBlobStore::open(&store_path).unwrap();
    }

    #[test]
    fn overwrite_replaces_value() {
        let temp = tempdir().unwrap();
        let store = FileBlobStore::open(&temp.path().join("ow")).unwrap();

        store.put("k", &[1]).unwrap();
        store.put("k", &[2, 3]).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(vec![2, 3]));
        assert_eq!(store.len().unwrap(), 1);
    }
}
