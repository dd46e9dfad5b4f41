//! CLI command implementations.

pub mod inspect;
pub mod queue;
pub mod records;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use stocksync_core::{CoreError, DomainSchema, LocalStore};
use stocksync_storage::{FileKv, KeyValueStore, StorageError};
use thiserror::Error;

/// Errors reported by the CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The directory does not exist.
    #[error("no data directory at {}", .0.display())]
    NoData(PathBuf),

    /// The directory has no schema for this domain.
    #[error("unknown domain: {0}")]
    UnknownDomain(String),

    /// A mutation id could not be parsed.
    #[error("invalid mutation id {id}: {reason}")]
    InvalidId {
        /// The id as given.
        id: String,
        /// Parser message.
        reason: String,
    },

    /// No pending mutation has this id.
    #[error("no pending mutation {id} in {domain}")]
    MutationNotFound {
        /// Domain searched.
        domain: String,
        /// The id as given.
        id: String,
    },

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Store or queue error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Output encoding error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// An opened data directory.
pub struct DataDir {
    /// Backend holding the directory lock.
    pub kv: Arc<dyn KeyValueStore>,
    /// Store over the backend. Domains are opened on demand.
    pub store: LocalStore,
    /// Schemas found in the directory, sorted by domain.
    pub schemas: Vec<DomainSchema>,
}

impl DataDir {
    /// Opens an existing directory. Nothing is created.
    pub fn open(path: &Path) -> CliResult<Self> {
        if !path.is_dir() {
            return Err(CliError::NoData(path.to_path_buf()));
        }
        let kv: Arc<dyn KeyValueStore> = Arc::new(FileKv::open(path)?);
        let store = LocalStore::new(Arc::clone(&kv));
        let mut schemas = store.stored_schemas()?;
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self { kv, store, schemas })
    }

    /// Stored schema of a domain.
    pub fn schema(&self, domain: &str) -> CliResult<&DomainSchema> {
        self.schemas
            .iter()
            .find(|s| s.name == domain)
            .ok_or_else(|| CliError::UnknownDomain(domain.to_string()))
    }

    /// Opens a domain with its stored schema, which never rewrites it.
    pub fn open_domain(&self, domain: &str) -> CliResult<&DomainSchema> {
        let schema = self.schema(domain)?;
        self.store.open_domain(schema)?;
        Ok(schema)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use stocksync_core::{DomainSchema, LocalStore, Mutation, MutationQueue, Record};
    use stocksync_storage::{FileKv, KeyValueStore};
    use tempfile::TempDir;

    /// A directory with two products, one queued mutation and an empty
    /// inventory domain. The backend is dropped so commands can lock it.
    pub(crate) fn seeded_dir() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        {
            let kv: Arc<dyn KeyValueStore> = Arc::new(FileKv::open(dir.path()).unwrap());
            let store = LocalStore::new(Arc::clone(&kv));
            store
                .open_domain(
                    &DomainSchema::new("products", "code")
                        .with_version(2)
                        .with_index("category"),
                )
                .unwrap();
            store
                .open_domain(&DomainSchema::new("inventory", "code"))
                .unwrap();

            for (code, category) in [("P1", "tools"), ("P2", "paint")] {
                store
                    .put(
                        "products",
                        Record::new().with("code", code).with("category", category),
                    )
                    .unwrap();
            }

            let mut queue = MutationQueue::open(Arc::clone(&kv), "products").unwrap();
            queue
                .enqueue(Mutation::new(
                    "products",
                    Record::new().with("code", "P1").with("area_id", "area1"),
                    Some("area1".into()),
                ))
                .unwrap();
            store.close().unwrap();
        }
        dir
    }
}
