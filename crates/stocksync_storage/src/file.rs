//! File-based key-value backend for persistent storage.
//!
//! Layout of a data directory:
//!
//! ```text
//! <data_dir>/
//! ├─ LOCK                # Advisory lock for single-process access
//! ├─ products.cbor       # One snapshot file per collection
//! └─ _queue.cbor
//! ```
//!
//! Every write rewrites the affected collection file in full through a
//! temporary file and an atomic rename, so a crash leaves either the old or
//! the new snapshot on disk, never a torn one.

use crate::error::{StorageError, StorageResult};
use crate::kv::{validate_collection_name, KeyValueStore};
use ciborium::Value;
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

const LOCK_FILE: &str = "LOCK";
const COLLECTION_EXT: &str = "cbor";
const TEMP_SUFFIX: &str = "cbor.tmp";

type Entries = BTreeMap<String, Vec<u8>>;

/// A file-based key-value backend.
///
/// Collections are cached in memory and mirrored to one CBOR snapshot file
/// each. Data survives process restarts.
///
/// # Durability
///
/// Each `put`, `delete` and `clear` writes the collection snapshot to a
/// temporary file, calls `File::sync_all()`, then renames it over the old
/// snapshot before returning.
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads. The data
/// directory is held under an exclusive advisory lock for the lifetime of
/// the value, so a second process opening it gets [`StorageError::Locked`].
///
/// # Example
///
/// ```no_run
/// use stocksync_storage::{FileKv, KeyValueStore};
/// use std::path::Path;
///
/// let kv = FileKv::open(Path::new("data")).unwrap();
/// kv.put("products", "P1", b"persistent").unwrap();
/// ```
#[derive(Debug)]
pub struct FileKv {
    path: PathBuf,
    collections: RwLock<BTreeMap<String, Entries>>,
    _lock_file: File,
}

impl FileKv {
    /// Opens or creates a data directory and loads every collection file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - Another process holds the lock (returns `Locked`)
    /// - A collection file cannot be decoded (returns `Corrupted`)
    pub fn open(path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(path)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let mut collections = BTreeMap::new();
        for entry in fs::read_dir(path)? {
            let file_path = entry?.path();
            if file_path.extension().and_then(|e| e.to_str()) != Some(COLLECTION_EXT) {
                continue;
            }
            let Some(name) = file_path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let entries = decode_collection(&fs::read(&file_path)?)
                .map_err(|e| StorageError::Corrupted(format!("{}: {e}", file_path.display())))?;
            debug!(collection = name, entries = entries.len(), "loaded collection");
            collections.insert(name.to_string(), entries);
        }

        Ok(Self {
            path: path.to_path_buf(),
            collections: RwLock::new(collections),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the data directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.path.join(format!("{collection}.{COLLECTION_EXT}"))
    }

    /// Atomically replaces the snapshot file of a collection.
    fn write_collection(&self, collection: &str, entries: &Entries) -> StorageResult<()> {
        let target = self.collection_path(collection);
        if entries.is_empty() {
            match fs::remove_file(&target) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(());
        }

        let temp = self.path.join(format!("{collection}.{TEMP_SUFFIX}"));
        let bytes = encode_collection(entries)?;
        {
            let mut file = File::create(&temp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &target)?;
        Ok(())
    }
}

impl KeyValueStore for FileKv {
    fn get(&self, collection: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn put(&self, collection: &str, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_collection_name(collection)?;
        let mut collections = self.collections.write();
        let mut entries = collections.get(collection).cloned().unwrap_or_default();
        entries.insert(key.to_string(), value.to_vec());
        self.write_collection(collection, &entries)?;
        collections.insert(collection.to_string(), entries);
        Ok(())
    }

    fn delete(&self, collection: &str, key: &str) -> StorageResult<bool> {
        let mut collections = self.collections.write();
        let Some(current) = collections.get(collection) else {
            return Ok(false);
        };
        if !current.contains_key(key) {
            return Ok(false);
        }

        let mut entries = current.clone();
        entries.remove(key);
        self.write_collection(collection, &entries)?;
        if entries.is_empty() {
            collections.remove(collection);
        } else {
            collections.insert(collection.to_string(), entries);
        }
        Ok(true)
    }

    fn scan(&self, collection: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn clear(&self, collection: &str) -> StorageResult<usize> {
        let mut collections = self.collections.write();
        let removed = collections.get(collection).map_or(0, BTreeMap::len);
        if removed > 0 {
            self.write_collection(collection, &Entries::new())?;
            collections.remove(collection);
        }
        Ok(removed)
    }

    fn collections(&self) -> StorageResult<Vec<String>> {
        Ok(self.collections.read().keys().cloned().collect())
    }

    fn flush(&self) -> StorageResult<()> {
        // Writes are synced as they happen; sync the directory entry too.
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }
}

fn encode_collection(entries: &Entries) -> StorageResult<Vec<u8>> {
    let map = Value::Map(
        entries
            .iter()
            .map(|(k, v)| (Value::Text(k.clone()), Value::Bytes(v.clone())))
            .collect(),
    );
    let mut bytes = Vec::new();
    ciborium::into_writer(&map, &mut bytes)
        .map_err(|e| StorageError::Corrupted(format!("encode failed: {e}")))?;
    Ok(bytes)
}

fn decode_collection(bytes: &[u8]) -> Result<Entries, String> {
    let value: Value = ciborium::from_reader(bytes).map_err(|e| e.to_string())?;
    let Value::Map(pairs) = value else {
        return Err("expected a map".into());
    };

    pairs
        .into_iter()
        .map(|pair| match pair {
            (Value::Text(key), Value::Bytes(value)) => Ok((key, value)),
            _ => Err("expected text keys and byte values".into()),
        })
        .collect()
}
