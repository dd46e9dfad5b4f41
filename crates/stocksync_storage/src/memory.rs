//! In-memory key-value backend for testing.

use crate::error::StorageResult;
use crate::kv::{validate_collection_name, KeyValueStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;

type Collections = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// An in-memory key-value backend.
///
/// This backend keeps all collections in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral stores that don't need persistence
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use stocksync_storage::{InMemoryKv, KeyValueStore};
///
/// let kv = InMemoryKv::new();
/// kv.put("inventory", "I1", b"12").unwrap();
/// assert_eq!(kv.scan("inventory").unwrap().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryKv {
    collections: RwLock<Collections>,
}

impl InMemoryKv {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of entries across all collections.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn total_entries(&self) -> usize {
        self.collections.read().values().map(BTreeMap::len).sum()
    }
}

impl KeyValueStore for InMemoryKv {
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
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, collection: &str, key: &str) -> StorageResult<bool> {
        let mut collections = self.collections.write();
        let removed = collections
            .get_mut(collection)
            .is_some_and(|entries| entries.remove(key).is_some());
        if collections.get(collection).is_some_and(BTreeMap::is_empty) {
            collections.remove(collection);
        }
        Ok(removed)
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
        Ok(self
            .collections
            .write()
            .remove(collection)
            .map_or(0, |entries| entries.len()))
    }

    fn collections(&self) -> StorageResult<Vec<String>> {
        Ok(self.collections.read().keys().cloned().collect())
    }

    fn flush(&self) -> StorageResult<()> {
        // Nothing is buffered
        Ok(())
    }
}
