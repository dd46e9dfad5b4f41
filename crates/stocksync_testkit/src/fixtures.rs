//! Test fixtures: backends, schemas, records and engine wiring.

use crate::remote::MockRemote;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stocksync_core::{DomainSchema, Record};
use stocksync_storage::{FileKv, InMemoryKv, KeyValueStore};
use stocksync_sync_engine::{
    Notifier, StaticScope, SyncConfig, SyncEngine, SyncEvent, SyncOutcome,
};
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Scope id used by the fixtures.
pub const TEST_SCOPE: &str = "area1";

/// A key-value backend with automatic cleanup.
pub struct TestEnv {
    /// The backend.
    pub kv: Arc<dyn KeyValueStore>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestEnv {
    /// Creates an in-memory backend.
    pub fn memory() -> Self {
        Self {
            kv: Arc::new(InMemoryKv::new()),
            _temp_dir: None,
        }
    }

    /// Creates a file backend in a fresh temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let kv = FileKv::open(temp_dir.path()).expect("Failed to open file backend");
        Self {
            kv: Arc::new(kv),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the data directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().to_path_buf())
    }

    /// Simulates a restart: closes the file backend and opens it again.
    ///
    /// Every other handle to the backend must have been dropped. In-memory
    /// backends are kept as they are.
    pub fn reopen(&mut self) {
        let Some(path) = self.path() else {
            return;
        };
        // Release the directory lock before reopening.
        self.kv = Arc::new(InMemoryKv::new());
        self.kv = Arc::new(FileKv::open(&path).expect("Failed to reopen file backend"));
    }
}

/// Products keyed by `code`, indexed by `name` and `category`.
pub fn products_schema() -> DomainSchema {
    DomainSchema::new("products", "code").with_indices(["name", "category"])
}

/// Inventory lines keyed by `code`, indexed by `location`.
pub fn inventory_schema() -> DomainSchema {
    DomainSchema::new("inventory", "code").with_index("location")
}

/// A product record.
pub fn product(code: &str, name: &str) -> Record {
    Record::new().with("code", code).with("name", name)
}

/// Engine configuration for the products and inventory domains.
pub fn test_config() -> SyncConfig {
    SyncConfig::new()
        .with_domain(products_schema())
        .with_domain(inventory_schema())
        .with_shutdown_timeout(Duration::from_secs(2))
}

/// A notifier that records every outcome.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    outcomes: Mutex<Vec<SyncOutcome>>,
}

impl RecordingNotifier {
    /// Outcomes received so far.
    pub fn outcomes(&self) -> Vec<SyncOutcome> {
        self.outcomes.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn on_sync_outcome(&self, outcome: &SyncOutcome) {
        self.outcomes.lock().push(outcome.clone());
    }
}

/// An engine wired to a mock remote, a settable scope and a recording notifier.
pub struct TestEngine {
    /// The engine under test.
    pub engine: SyncEngine<MockRemote>,
    /// The remote it talks to.
    pub remote: Arc<MockRemote>,
    /// The scope provider.
    pub scope: Arc<StaticScope>,
    /// The notifier.
    pub notifier: Arc<RecordingNotifier>,
}

impl TestEngine {
    /// Builds an engine over `kv` with [`TEST_SCOPE`] as its scope.
    pub fn new(config: SyncConfig, kv: Arc<dyn KeyValueStore>) -> Self {
        Self::with_remote(config, kv, Arc::new(MockRemote::new()))
    }

    /// Builds an engine over `kv` talking to an existing remote.
    pub fn with_remote(
        config: SyncConfig,
        kv: Arc<dyn KeyValueStore>,
        remote: Arc<MockRemote>,
    ) -> Self {
        let scope = Arc::new(StaticScope::new(TEST_SCOPE));
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = SyncEngine::new(
            config,
            kv,
            Arc::clone(&remote),
            scope.clone(),
            notifier.clone(),
        );
        Self {
            engine,
            remote,
            scope,
            notifier,
        }
    }
}

/// Waits until an event matching `predicate` arrives.
///
/// Returns `None` after `timeout` or if the channel closes.
pub async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<SyncEvent>,
    timeout: Duration,
    mut predicate: F,
) -> Option<SyncEvent>
where
    F: FnMut(&SyncEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Polls `condition` until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_env_reopens() {
        let mut env = TestEnv::file();
        env.kv.put("products", "P1", b"x").unwrap();
        env.reopen();
        assert_eq!(env.kv.get("products", "P1").unwrap(), Some(b"x".to_vec()));
    }

    #[test]
    fn memory_env_has_no_path() {
        let env = TestEnv::memory();
        assert!(env.path().is_none());
    }

    #[test]
    fn config_has_both_domains() {
        let config = test_config();
        assert!(config.domain("products").is_some());
        assert!(config.domain("inventory").is_some());
    }
}
