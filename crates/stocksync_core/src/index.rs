//! In-memory secondary indices.

use crate::record::Record;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Hash index from an attribute value to the keys of the records holding it.
///
/// Values are compared by their canonical JSON text, so `12` and `"12"` are
/// different index values. Records without the attribute, or with a `null`
/// value, are not indexed.
#[derive(Debug, Default)]
pub(crate) struct SecondaryIndex {
    attribute: String,
    entries: HashMap<String, BTreeSet<String>>,
}

impl SecondaryIndex {
    /// Creates an empty index on `attribute`.
    pub(crate) fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            entries: HashMap::new(),
        }
    }

    /// Canonical index value of an attribute value.
    pub(crate) fn index_value(value: &Value) -> Option<String> {
        match value {
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub(crate) fn insert(&mut self, key: &str, record: &Record) {
        if let Some(value) = record.get(&self.attribute).and_then(Self::index_value) {
            self.entries.entry(value).or_default().insert(key.to_string());
        }
    }

    pub(crate) fn remove(&mut self, key: &str, record: &Record) {
        let Some(value) = record.get(&self.attribute).and_then(Self::index_value) else {
            return;
        };
        if let Some(keys) = self.entries.get_mut(&value) {
            keys.remove(key);
            if keys.is_empty() {
                self.entries.remove(&value);
            }
        }
    }

    /// Keys of records whose attribute equals `value`, in key order.
    pub(crate) fn lookup(&self, value: &Value) -> Vec<String> {
        Self::index_value(value)
            .and_then(|v| self.entries.get(&v))
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of distinct indexed values.
    #[cfg(test)]
    pub(crate) fn distinct_values(&self) -> usize {
        self.entries.len()
    }
}
