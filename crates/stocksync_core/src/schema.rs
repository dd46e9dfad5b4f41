//! Per-domain schemas and their upgrade rules.
//!
//! Each domain carries an independently versioned schema
//! `{version, key_path, indices}` stored in the reserved [`SCHEMA_COLLECTION`].
//! Opening a domain reconciles the stored schema with the requested one:
//!
//! - no stored schema: the requested one is created
//! - stored version lower: the upgrade step runs once (missing indices are added)
//! - stored version equal: nothing to upgrade; newly listed indices are still added
//! - stored version higher, or a different key path: the open fails
//!
//! Upgrades only ever add indices, so running one twice is harmless.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use stocksync_storage::validate_collection_name;

/// Reserved collection holding one stored schema per domain.
pub const SCHEMA_COLLECTION: &str = "_schema";

/// Schema of one domain's record collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSchema {
    /// Domain name (also the collection name).
    pub name: String,
    /// Schema version; bumping it triggers the upgrade step.
    pub version: u32,
    /// Attribute holding each record's natural key.
    pub key_path: String,
    /// Secondary indices; an index name is also the attribute it indexes.
    pub indices: Vec<String>,
}

impl DomainSchema {
    /// Creates a version 1 schema with no secondary indices.
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 1,
            key_path: key_path.into(),
            indices: Vec::new(),
        }
    }

    /// Sets the schema version.
    #[must_use]
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Adds a secondary index. Duplicates are ignored.
    #[must_use]
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        let index = index.into();
        if !self.indices.contains(&index) {
            self.indices.push(index);
        }
        self
    }

    /// Adds several secondary indices.
    #[must_use]
    pub fn with_indices<I, S>(self, indices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        indices.into_iter().fold(self, Self::with_index)
    }

    /// Returns true if the schema declares the index.
    #[must_use]
    pub fn has_index(&self, index: &str) -> bool {
        self.indices.iter().any(|i| i == index)
    }

    /// Checks that the schema can be created at all.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaUpgradeFailed`] for reserved or malformed
    /// names, an empty key path, or an empty index name.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.starts_with('_') {
            return Err(CoreError::schema_upgrade(
                &self.name,
                "domain names starting with '_' are reserved",
            ));
        }
        validate_collection_name(&self.name)
            .map_err(|e| CoreError::schema_upgrade(&self.name, e.to_string()))?;
        if self.version == 0 {
            return Err(CoreError::schema_upgrade(&self.name, "version must be at least 1"));
        }
        if self.key_path.is_empty() {
            return Err(CoreError::schema_upgrade(&self.name, "key path is empty"));
        }
        if self.indices.iter().any(String::is_empty) {
            return Err(CoreError::schema_upgrade(&self.name, "index name is empty"));
        }
        Ok(())
    }
}

/// What opening a domain did to its stored schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    /// No schema was stored; the requested one was created.
    Created,
    /// The stored schema had a lower version and was upgraded.
    Upgraded {
        /// Previous version.
        from: u32,
        /// Indices created by the upgrade.
        added_indices: Vec<String>,
    },
    /// The stored schema was reused.
    Unchanged {
        /// Indices that were listed but missing and have been created.
        added_indices: Vec<String>,
    },
}

impl SchemaChange {
    /// Returns true if the stored schema has to be rewritten.
    #[must_use]
    pub fn needs_write(&self) -> bool {
        match self {
            Self::Created | Self::Upgraded { .. } => true,
            Self::Unchanged { added_indices } => !added_indices.is_empty(),
        }
    }
}

/// Reconciles a stored schema with the requested one.
///
/// Returns the schema to use from now on and what changed.
pub(crate) fn reconcile(
    stored: Option<DomainSchema>,
    requested: &DomainSchema,
) -> CoreResult<(DomainSchema, SchemaChange)> {
    requested.validate()?;

    let Some(stored) = stored else {
        return Ok((requested.clone(), SchemaChange::Created));
    };

    if stored.version > requested.version {
        return Err(CoreError::schema_upgrade(
            &requested.name,
            format!(
                "stored version {} is newer than requested version {}",
                stored.version, requested.version
            ),
        ));
    }
    if stored.key_path != requested.key_path {
        return Err(CoreError::schema_upgrade(
            &requested.name,
            format!(
                "key path cannot change from {:?} to {:?}",
                stored.key_path, requested.key_path
            ),
        ));
    }

    let added_indices: Vec<String> = requested
        .indices
        .iter()
        .filter(|index| !stored.has_index(index))
        .cloned()
        .collect();

    let mut merged = stored.clone();
    merged.version = requested.version;
    merged.indices.extend(added_indices.iter().cloned());

    let change = if stored.version < requested.version {
        SchemaChange::Upgraded {
            from: stored.version,
            added_indices,
        }
    } else {
        SchemaChange::Unchanged { added_indices }
    };

    Ok((merged, change))
}
