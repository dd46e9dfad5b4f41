//! Collaborator interfaces the engine consumes but does not implement.
//!
//! - [`RemoteBackend`]: the server side (idempotent upsert, change feed)
//! - [`ScopeProvider`]: the current tenant or area id
//! - [`Notifier`]: a presentation layer told about drain outcomes

use crate::error::SyncResult;
use async_trait::async_trait;
use parking_lot::RwLock;
use stocksync_core::{ChangeEvent, Record};
use tokio::sync::mpsc;

/// Acknowledgement of a remote upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ack {
    /// Server-side identifier of the written record, if the backend has one.
    pub remote_id: Option<String>,
}

/// Restricts a subscription to one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeFilter {
    /// Attribute carrying the scope id.
    pub field: String,
    /// Scope id to match.
    pub scope_id: String,
}

impl ScopeFilter {
    /// Creates a filter on `field == scope_id`.
    pub fn new(field: impl Into<String>, scope_id: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            scope_id: scope_id.into(),
        }
    }

    /// Returns true if the record belongs to the scope.
    pub fn matches(&self, record: &Record) -> bool {
        record
            .get(&self.field)
            .and_then(|v| v.as_str())
            .is_some_and(|s| s == self.scope_id)
    }
}

/// Where a backend delivers change events for one subscription.
///
/// Dropping every clone of the sink ends the subscription; the engine then
/// reports it as lost.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl EventSink {
    /// Creates a sink and the receiving end the engine reads from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ChangeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Delivers an event. Returns `false` if the engine no longer listens.
    pub fn send(&self, event: ChangeEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Returns true if the engine no longer listens.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Identifies an active subscription on a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    /// Backend-assigned id.
    pub id: u64,
    /// Subscribed domain.
    pub domain: String,
}

impl SubscriptionHandle {
    /// Creates a handle.
    pub fn new(id: u64, domain: impl Into<String>) -> Self {
        Self {
            id,
            domain: domain.into(),
        }
    }
}

/// The remote side of the sync.
///
/// # Invariants
///
/// - `upsert` is idempotent: sending the same record twice is harmless,
///   because delivery is at-least-once
/// - Events for a subscription are delivered through its [`EventSink`];
///   no ordering is assumed across resubscriptions
///
/// # Implementors
///
/// - `stocksync_testkit::MockRemote`: in-memory backend for tests
#[async_trait]
pub trait RemoteBackend: Send + Sync + 'static {
    /// Writes one record of a domain.
    ///
    /// # Errors
    ///
    /// Any error leaves the mutation at the head of its queue.
    async fn upsert(&self, domain: &str, record: &Record) -> SyncResult<Ack>;

    /// Subscribes to a domain's changes within a scope.
    async fn subscribe(
        &self,
        domain: &str,
        filter: ScopeFilter,
        sink: EventSink,
    ) -> SyncResult<SubscriptionHandle>;

    /// Cancels a subscription. Unknown handles are ignored.
    async fn unsubscribe(&self, handle: SubscriptionHandle) -> SyncResult<()>;
}

/// Supplies the current scope (tenant or area) id.
pub trait ScopeProvider: Send + Sync {
    /// The current scope id, or `None` before one is known.
    fn scope_id(&self) -> Option<String>;
}

/// A scope provider backed by a settable value.
#[derive(Debug, Default)]
pub struct StaticScope {
    scope: RwLock<Option<String>>,
}

impl StaticScope {
    /// Creates a provider returning `scope`.
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: RwLock::new(Some(scope.into())),
        }
    }

    /// Creates a provider with no scope yet.
    pub fn unset() -> Self {
        Self::default()
    }

    /// Replaces the scope id.
    pub fn set(&self, scope: Option<String>) {
        *self.scope.write() = scope;
    }
}

impl ScopeProvider for StaticScope {
    fn scope_id(&self) -> Option<String> {
        self.scope.read().clone().filter(|s| !s.is_empty())
    }
}

/// Outcome of one drain cycle, as reported to the [`Notifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The cycle ran to completion (queue empty or connectivity lost).
    Drained {
        /// Domain drained.
        domain: String,
        /// Mutations delivered in this cycle.
        processed: usize,
        /// Mutations still pending.
        remaining: usize,
    },
    /// The cycle stopped at a failed upsert.
    Failed {
        /// Domain drained.
        domain: String,
        /// Mutations delivered before the failure.
        processed: usize,
        /// Mutations still pending, including the failed one.
        remaining: usize,
        /// Error message.
        error: String,
    },
}

/// Receives drain outcomes. Calls are best-effort and must not block.
pub trait Notifier: Send + Sync {
    /// Called after every drain cycle that delivered something or failed.
    fn on_sync_outcome(&self, outcome: &SyncOutcome);
}

/// A notifier that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn on_sync_outcome(&self, _outcome: &SyncOutcome) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_filter_matches_field() {
        let filter = ScopeFilter::new("area_id", "area1");
        assert!(filter.matches(&Record::new().with("area_id", "area1")));
        assert!(!filter.matches(&Record::new().with("area_id", "area2")));
        assert!(!filter.matches(&Record::new().with("code", "P1")));
    }

    #[test]
    fn static_scope_can_change() {
        let scope = StaticScope::unset();
        assert_eq!(scope.scope_id(), None);
        scope.set(Some("area1".into()));
        assert_eq!(scope.scope_id().as_deref(), Some("area1"));
        scope.set(Some(String::new()));
        assert_eq!(scope.scope_id(), None);
    }

    #[tokio::test]
    async fn sink_reports_closed_receiver() {
        let (sink, mut rx) = EventSink::channel();
        assert!(sink.send(ChangeEvent::insert("products", Record::new())));
        assert!(rx.recv().await.is_some());
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.send(ChangeEvent::insert("products", Record::new())));
    }
}
