//! Key-value store trait definition.

use crate::error::{StorageError, StorageResult};

/// A collection-scoped key-value store.
///
/// Stores hold **opaque byte values** grouped into named collections. The
/// record store and the mutation queue own all interpretation of the bytes.
///
/// # Invariants
///
/// - `put` followed by `get` on the same collection and key returns the same bytes
/// - `scan` returns entries in ascending key order
/// - Each call is atomic: a reader never observes a half-applied `put`,
///   `delete` or `clear`
/// - When a call returns `Ok` on a durable backend, its effect survives
///   process termination
///
/// # Implementors
///
/// - [`super::InMemoryKv`] - For testing
/// - [`super::FileKv`] - For persistent storage
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be read.
    fn get(&self, collection: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection name is invalid or the write fails.
    fn put(&self, collection: &str, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes `key` from the collection.
    ///
    /// Returns `true` if a value was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn delete(&self, collection: &str, key: &str) -> StorageResult<bool>;

    /// Returns every entry of the collection in ascending key order.
    ///
    /// A collection that was never written is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be read.
    fn scan(&self, collection: &str) -> StorageResult<Vec<(String, Vec<u8>)>>;

    /// Removes every entry of the collection and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn clear(&self, collection: &str) -> StorageResult<usize>;

    /// Returns the names of all non-empty collections.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot enumerate its collections.
    fn collections(&self) -> StorageResult<Vec<String>>;

    /// Flushes any buffered state to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&self) -> StorageResult<()>;
}

/// Checks that a collection name is usable by every backend.
///
/// Names must be non-empty and contain only ASCII letters, digits, `_` and `-`,
/// because the file backend uses them as file names.
///
/// # Errors
///
/// Returns [`StorageError::InvalidName`] for names outside that alphabet.
pub fn validate_collection_name(name: &str) -> StorageResult<()> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}
