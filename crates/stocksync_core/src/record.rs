//! Domain records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A domain entity: a flat set of named attributes.
///
/// Records are schemaless on purpose; the domain schema only names which
/// attribute is the natural key and which attributes are indexed. Products,
/// batches, inventory lines and so on are all plain `Record`s here.
///
/// # Example
///
/// ```rust
/// use stocksync_core::Record;
/// use serde_json::json;
///
/// let record = Record::from_value(json!({"code": "X1", "name": "Bolt"})).unwrap();
/// assert_eq!(record.key_for("code").as_deref(), Some("X1"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a record from a JSON object.
    ///
    /// Returns `None` if the value is not an object.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Returns the attribute value, if present.
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.0.get(attribute)
    }

    /// Returns true if the attribute is present (even if `null`).
    #[must_use]
    pub fn contains(&self, attribute: &str) -> bool {
        self.0.contains_key(attribute)
    }

    /// Sets an attribute, returning the previous value.
    pub fn insert(&mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(attribute.into(), value.into())
    }

    /// Builder form of [`Record::insert`].
    #[must_use]
    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(attribute, value);
        self
    }

    /// Removes an attribute, returning its value.
    pub fn remove(&mut self, attribute: &str) -> Option<Value> {
        self.0.remove(attribute)
    }

    /// Returns the natural key stored under `key_path`.
    ///
    /// Only strings and integers are usable as keys; any other value (or a
    /// missing attribute, or an empty string) yields `None`.
    #[must_use]
    pub fn key_for(&self, key_path: &str) -> Option<String> {
        match self.0.get(key_path)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
            _ => None,
        }
    }

    /// Returns the attributes as a JSON map.
    #[must_use]
    pub fn attributes(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the record has no attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Converts the record into a JSON object value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
