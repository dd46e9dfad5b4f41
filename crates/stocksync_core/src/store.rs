//! The local record store.

use crate::codec::{from_cbor, to_cbor};
use crate::error::{CoreError, CoreResult};
use crate::index::SecondaryIndex;
use crate::record::Record;
use crate::schema::{reconcile, DomainSchema, SchemaChange, SCHEMA_COLLECTION};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use stocksync_storage::KeyValueStore;
use tracing::{debug, info};

/// An open domain: its schema and in-memory indices.
///
/// The `RwLock` is the per-domain write serializer: `put` and `delete` hold
/// it across the backend write and the index update.
struct DomainHandle {
    schema: DomainSchema,
    indices: RwLock<HashMap<String, SecondaryIndex>>,
}

impl DomainHandle {
    fn key_of(&self, record: &Record) -> CoreResult<String> {
        record.key_for(&self.schema.key_path).ok_or_else(|| {
            CoreError::invalid_record(
                &self.schema.name,
                format!(
                    "missing string or integer key attribute {:?}",
                    self.schema.key_path
                ),
            )
        })
    }
}

/// Per-domain record collections with secondary indices, usable offline.
///
/// Records live in the backend collection named after their domain, encoded
/// as CBOR and keyed by their natural key. Secondary indices are kept in
/// memory and rebuilt from a scan whenever a domain is opened.
///
/// # Thread Safety
///
/// `LocalStore` is `Send + Sync`. Writers to the same domain are serialized;
/// readers only block while a write to the same domain is in progress.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use serde_json::json;
/// use stocksync_core::{DomainSchema, LocalStore, Record};
/// use stocksync_storage::InMemoryKv;
///
/// let store = LocalStore::new(Arc::new(InMemoryKv::new()));
/// store.open_domain(&DomainSchema::new("products", "code").with_index("category")).unwrap();
///
/// let bolt = Record::new().with("code", "P1").with("category", "tools");
/// store.put("products", bolt.clone()).unwrap();
///
/// assert_eq!(store.get("products", "P1").unwrap(), Some(bolt));
/// assert_eq!(store.query_by_index("products", "category", &json!("tools")).unwrap().len(), 1);
/// ```
pub struct LocalStore {
    kv: Arc<dyn KeyValueStore>,
    domains: RwLock<HashMap<String, Arc<DomainHandle>>>,
}

impl LocalStore {
    /// Creates a store over a key-value backend. No domain is open yet.
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            domains: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &Arc<dyn KeyValueStore> {
        &self.kv
    }

    /// Opens a domain, creating or upgrading its schema as needed.
    ///
    /// Opening an already-open domain with the same schema is a no-op apart
    /// from rebuilding its indices.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaUpgradeFailed`] if the schema cannot be
    /// created or upgraded, and storage or codec errors if the stored
    /// records cannot be read. The domain is unusable after an error.
    pub fn open_domain(&self, requested: &DomainSchema) -> CoreResult<SchemaChange> {
        let stored = self
            .kv
            .get(SCHEMA_COLLECTION, &requested.name)?
            .map(|bytes| from_cbor::<DomainSchema>(&bytes))
            .transpose()
            .map_err(|e| CoreError::schema_upgrade(&requested.name, e.to_string()))?;

        let (schema, change) = reconcile(stored, requested)?;
        if change.needs_write() {
            self.kv
                .put(SCHEMA_COLLECTION, &schema.name, &to_cbor(&schema)?)
                .map_err(|e| CoreError::schema_upgrade(&schema.name, e.to_string()))?;
        }

        let mut indices: HashMap<String, SecondaryIndex> = schema
            .indices
            .iter()
            .map(|name| (name.clone(), SecondaryIndex::new(name.clone())))
            .collect();

        let rows = self.kv.scan(&schema.name)?;
        for (key, bytes) in &rows {
            let record: Record = from_cbor(bytes)?;
            for index in indices.values_mut() {
                index.insert(key, &record);
            }
        }

        info!(
            domain = %schema.name,
            version = schema.version,
            records = rows.len(),
            ?change,
            "opened domain"
        );

        let handle = Arc::new(DomainHandle {
            schema,
            indices: RwLock::new(indices),
        });
        self.domains
            .write()
            .insert(handle.schema.name.clone(), handle);

        Ok(change)
    }

    fn handle(&self, domain: &str) -> CoreResult<Arc<DomainHandle>> {
        self.domains
            .read()
            .get(domain)
            .cloned()
            .ok_or_else(|| CoreError::domain_not_open(domain))
    }

    /// Returns true if the domain is open.
    pub fn is_open(&self, domain: &str) -> bool {
        self.domains.read().contains_key(domain)
    }

    /// Names of the open domains, sorted.
    pub fn domains(&self) -> Vec<String> {
        let mut names: Vec<String> = self.domains.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the effective schema of an open domain.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DomainNotOpen`] if the domain is not open.
    pub fn schema(&self, domain: &str) -> CoreResult<DomainSchema> {
        Ok(self.handle(domain)?.schema.clone())
    }

    /// Returns every stored schema, whether or not the domain is open.
    ///
    /// # Errors
    ///
    /// Returns storage or codec errors.
    pub fn stored_schemas(&self) -> CoreResult<Vec<DomainSchema>> {
        self.kv
            .scan(SCHEMA_COLLECTION)?
            .iter()
            .map(|(_, bytes)| from_cbor(bytes))
            .collect()
    }

    /// Returns the natural key of `record` in `domain`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRecord`] if the key attribute is missing
    /// or not a string or integer.
    pub fn key_of(&self, domain: &str, record: &Record) -> CoreResult<String> {
        self.handle(domain)?.key_of(record)
    }

    /// Reads one record by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the domain is not open or the record cannot be read.
    pub fn get(&self, domain: &str, key: &str) -> CoreResult<Option<Record>> {
        let handle = self.handle(domain)?;
        let _guard = handle.indices.read();
        self.kv
            .get(domain, key)?
            .map(|bytes| from_cbor(&bytes))
            .transpose()
    }

    /// Inserts or replaces a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the domain is not open, the record has no usable
    /// key, or the write fails. A failed write leaves the store unchanged.
    pub fn put(&self, domain: &str, record: Record) -> CoreResult<()> {
        let handle = self.handle(domain)?;
        let key = handle.key_of(&record)?;
        let bytes = to_cbor(&record)?;

        let mut indices = handle.indices.write();
        let previous: Option<Record> = self
            .kv
            .get(domain, &key)?
            .map(|bytes| from_cbor(&bytes))
            .transpose()?;

        self.kv.put(domain, &key, &bytes)?;

        for index in indices.values_mut() {
            if let Some(previous) = &previous {
                index.remove(&key, previous);
            }
            index.insert(&key, &record);
        }
        debug!(domain, key = %key, replaced = previous.is_some(), "put record");
        Ok(())
    }

    /// Deletes a record. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the domain is not open or the write fails.
    pub fn delete(&self, domain: &str, key: &str) -> CoreResult<bool> {
        let handle = self.handle(domain)?;
        let mut indices = handle.indices.write();

        let Some(previous) = self.kv.get(domain, key)? else {
            return Ok(false);
        };
        let previous: Record = from_cbor(&previous)?;

        self.kv.delete(domain, key)?;
        for index in indices.values_mut() {
            index.remove(key, &previous);
        }
        debug!(domain, key, "deleted record");
        Ok(true)
    }

    /// Returns the records whose indexed attribute equals `value`, in key order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownIndex`] if the domain has no such index.
    pub fn query_by_index(
        &self,
        domain: &str,
        index_name: &str,
        value: &Value,
    ) -> CoreResult<Vec<Record>> {
        let handle = self.handle(domain)?;
        let indices = handle.indices.read();
        let index = indices
            .get(index_name)
            .ok_or_else(|| CoreError::UnknownIndex {
                domain: domain.to_string(),
                index: index_name.to_string(),
            })?;

        index
            .lookup(value)
            .iter()
            .filter_map(|key| self.kv.get(domain, key).transpose())
            .map(|bytes| -> CoreResult<Record> { from_cbor(&bytes?) })
            .collect()
    }

    /// Returns every record of the domain in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the domain is not open or a record cannot be read.
    pub fn get_all(&self, domain: &str) -> CoreResult<Vec<Record>> {
        let handle = self.handle(domain)?;
        let _guard = handle.indices.read();
        self.kv
            .scan(domain)?
            .iter()
            .map(|(_, bytes)| from_cbor(bytes))
            .collect()
    }

    /// Number of records in the domain.
    ///
    /// # Errors
    ///
    /// Returns an error if the domain is not open.
    pub fn count(&self, domain: &str) -> CoreResult<usize> {
        let handle = self.handle(domain)?;
        let _guard = handle.indices.read();
        Ok(self.kv.scan(domain)?.len())
    }

    /// Removes every record of the domain. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the domain is not open or the write fails.
    pub fn clear(&self, domain: &str) -> CoreResult<usize> {
        let handle = self.handle(domain)?;
        let mut indices = handle.indices.write();
        let removed = self.kv.clear(domain)?;
        indices.values_mut().for_each(SecondaryIndex::clear);
        info!(domain, removed, "cleared domain");
        Ok(removed)
    }

    /// Deletes every record whose indexed attribute equals `value`.
    ///
    /// Returns the number of records removed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownIndex`] for an unknown index, or storage
    /// errors. Records deleted before a failing write stay deleted.
    pub fn delete_by_index(&self, domain: &str, index_name: &str, value: &Value) -> CoreResult<usize> {
        let handle = self.handle(domain)?;
        let mut indices = handle.indices.write();
        let keys = indices
            .get(index_name)
            .ok_or_else(|| CoreError::UnknownIndex {
                domain: domain.to_string(),
                index: index_name.to_string(),
            })?
            .lookup(value);

        let mut removed = 0;
        for key in keys {
            let Some(bytes) = self.kv.get(domain, &key)? else {
                continue;
            };
            let previous: Record = from_cbor(&bytes)?;
            self.kv.delete(domain, &key)?;
            for index in indices.values_mut() {
                index.remove(&key, &previous);
            }
            removed += 1;
        }
        debug!(domain, index = index_name, removed, "deleted by index");
        Ok(removed)
    }

    /// Releases a domain. Returns `true` if it was open.
    ///
    /// Stored records are untouched; the domain can be opened again.
    pub fn close_domain(&self, domain: &str) -> bool {
        self.domains.write().remove(domain).is_some()
    }

    /// Releases every domain and flushes the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend flush fails.
    pub fn close(&self) -> CoreResult<()> {
        self.domains.write().clear();
        self.kv.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stocksync_storage::InMemoryKv;

    fn products_schema() -> DomainSchema {
        DomainSchema::new("products", "code").with_indices(["name", "category"])
    }

    fn store() -> LocalStore {
        let store = LocalStore::new(Arc::new(InMemoryKv::new()));
        store.open_domain(&products_schema()).unwrap();
        store
    }

    fn product(code: &str, name: &str, category: &str) -> Record {
        Record::new()
            .with("code", code)
            .with("name", name)
            .with("category", category)
    }

    #[test]
    fn put_get_delete() {
        let store = store();
        let p1 = product("P1", "Bolt", "tools");

        store.put("products", p1.clone()).unwrap();
        assert_eq!(store.get("products", "P1").unwrap(), Some(p1));

        assert!(store.delete("products", "P1").unwrap());
        assert!(!store.delete("products", "P1").unwrap());
        assert_eq!(store.get("products", "P1").unwrap(), None);
    }

    #[test]
    fn put_replaces_and_reindexes() {
        let store = store();
        store.put("products", product("P1", "Bolt", "tools")).unwrap();
        store.put("products", product("P1", "Bolt", "hardware")).unwrap();

        assert!(store
            .query_by_index("products", "category", &json!("tools"))
            .unwrap()
            .is_empty());
        let hardware = store
            .query_by_index("products", "category", &json!("hardware"))
            .unwrap();
        assert_eq!(hardware.len(), 1);
        assert_eq!(store.count("products").unwrap(), 1);
    }

    #[test]
    fn query_by_index_returns_key_order() {
        let store = store();
        store.put("products", product("P2", "Nut", "tools")).unwrap();
        store.put("products", product("P1", "Bolt", "tools")).unwrap();
        store.put("products", product("P3", "Paint", "paint")).unwrap();

        let tools = store
            .query_by_index("products", "category", &json!("tools"))
            .unwrap();
        let codes: Vec<_> = tools.iter().map(|r| r.key_for("code").unwrap()).collect();
        assert_eq!(codes, vec!["P1", "P2"]);
    }

    #[test]
    fn unknown_index_is_an_error() {
        let store = store();
        let result = store.query_by_index("products", "brand", &json!("x"));
        assert!(matches!(result, Err(CoreError::UnknownIndex { .. })));
    }

    #[test]
    fn put_without_key_is_rejected() {
        let store = store();
        let result = store.put("products", Record::new().with("name", "Orphan"));
        assert!(matches!(result, Err(CoreError::InvalidRecord { .. })));
        assert_eq!(store.count("products").unwrap(), 0);
    }

    #[test]
    fn unopened_domain_is_an_error() {
        let store = store();
        let result = store.get("inventory", "I1");
        assert!(matches!(result, Err(CoreError::DomainNotOpen { .. })));
    }

    #[test]
    fn reopen_is_idempotent_and_rebuilds_indices() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKv::new());
        {
            let store = LocalStore::new(Arc::clone(&kv));
            store.open_domain(&products_schema()).unwrap();
            store.put("products", product("P1", "Bolt", "tools")).unwrap();
        }

        let store = LocalStore::new(kv);
        let change = store.open_domain(&products_schema()).unwrap();
        assert!(!change.needs_write());
        let change = store.open_domain(&products_schema()).unwrap();
        assert!(!change.needs_write());

        let tools = store
            .query_by_index("products", "category", &json!("tools"))
            .unwrap();
        assert_eq!(tools.len(), 1);
    }

    #[test]
    fn upgrade_indexes_existing_records() {
        let store = store();
        store
            .put("products", product("P1", "Bolt", "tools").with("brand", "Acme"))
            .unwrap();

        let v2 = products_schema().with_version(2).with_index("brand");
        let change = store.open_domain(&v2).unwrap();
        assert!(matches!(change, SchemaChange::Upgraded { from: 1, .. }));

        let acme = store
            .query_by_index("products", "brand", &json!("Acme"))
            .unwrap();
        assert_eq!(acme.len(), 1);
        assert_eq!(store.schema("products").unwrap().version, 2);
    }

    #[test]
    fn failed_upgrade_leaves_domain_closed() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKv::new());
        let store = LocalStore::new(kv);
        store
            .open_domain(&products_schema().with_version(2))
            .unwrap();
        store.close_domain("products");

        let result = store.open_domain(&products_schema());
        assert!(matches!(result, Err(CoreError::SchemaUpgradeFailed { .. })));
        assert!(!store.is_open("products"));
    }

    #[test]
    fn get_all_and_clear() {
        let store = store();
        store.put("products", product("P2", "Nut", "tools")).unwrap();
        store.put("products", product("P1", "Bolt", "tools")).unwrap();

        let all = store.get_all("products").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].key_for("code").as_deref(), Some("P1"));

        assert_eq!(store.clear("products").unwrap(), 2);
        assert_eq!(store.count("products").unwrap(), 0);
        assert!(store
            .query_by_index("products", "category", &json!("tools"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn delete_by_index_removes_matches_only() {
        let store = store();
        store.put("products", product("P1", "Bolt", "tools")).unwrap();
        store.put("products", product("P2", "Nut", "tools")).unwrap();
        store.put("products", product("P3", "Paint", "paint")).unwrap();

        let removed = store
            .delete_by_index("products", "category", &json!("tools"))
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count("products").unwrap(), 1);
        assert!(store
            .query_by_index("products", "name", &json!("Bolt"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn stored_schemas_and_close() {
        let store = store();
        store
            .open_domain(&DomainSchema::new("inventory", "code"))
            .unwrap();

        assert_eq!(store.domains(), vec!["inventory", "products"]);
        assert_eq!(store.stored_schemas().unwrap().len(), 2);

        store.close().unwrap();
        assert!(store.domains().is_empty());
        assert_eq!(store.stored_schemas().unwrap().len(), 2);
    }
}
