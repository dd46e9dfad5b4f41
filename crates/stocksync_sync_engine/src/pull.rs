//! Pull side: applies remote change feeds to the local store.
//!
//! The remote copy always wins. Inserts and updates write the event's new
//! state with no version comparison; deletes remove the record by the key of
//! its previous state. Applying the same event twice leaves the store as
//! applying it once.
//!
//! Each domain has one handler task reading its feed, so changes to the same
//! domain are applied one at a time, in arrival order.

use crate::domain::DomainRuntime;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::remote::{EventSink, RemoteBackend, ScopeFilter, ScopeProvider, SubscriptionHandle};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use stocksync_core::{ChangeEvent, ChangeType, CoreError, LocalStore};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Applies one remote change to the local store.
///
/// Returns the key of the affected record.
///
/// # Errors
///
/// Returns an error if the event belongs to another domain, lacks the record
/// state its type requires, or the store rejects the write.
pub fn apply_change(store: &LocalStore, domain: &str, event: &ChangeEvent) -> SyncResult<String> {
    if event.domain != domain {
        return Err(CoreError::DomainMismatch {
            expected: domain.to_string(),
            actual: event.domain.clone(),
        }
        .into());
    }

    let subject = event.subject().ok_or_else(|| {
        CoreError::invalid_record(domain, format!("{} event without record state", event.change_type))
    })?;
    let key = store.key_of(domain, subject)?;

    match event.change_type {
        ChangeType::Insert | ChangeType::Update => {
            store.put(domain, subject.clone())?;
        }
        ChangeType::Delete => {
            store.delete(domain, &key)?;
        }
    }
    Ok(key)
}

/// Active subscription of one domain.
#[derive(Debug, Default)]
pub(crate) struct PullFeed {
    handle: Option<SubscriptionHandle>,
    task: Option<JoinHandle<()>>,
}

/// What the pull side needs from the engine.
pub(crate) struct PullContext<R> {
    pub(crate) store: Arc<LocalStore>,
    pub(crate) remote: Arc<R>,
    pub(crate) scope: Arc<dyn ScopeProvider>,
    pub(crate) scope_field: String,
    pub(crate) events: EventBus,
}

impl<R: RemoteBackend> PullContext<R> {
    /// Subscribes the domain's feed, replacing any existing subscription.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ScopeMissing`] if no scope id is known yet, or the
    /// backend's error. The domain is left unsubscribed.
    pub(crate) async fn subscribe(&self, runtime: &Arc<DomainRuntime>) -> SyncResult<()> {
        let mut feed = runtime.feed.lock().await;
        self.teardown(&mut feed, runtime).await;

        let scope_id = self
            .scope
            .scope_id()
            .ok_or_else(|| SyncError::ScopeMissing {
                domain: runtime.name.clone(),
            })?;

        let (sink, rx) = EventSink::channel();
        let filter = ScopeFilter::new(self.scope_field.clone(), scope_id);
        let handle = self.remote.subscribe(&runtime.name, filter, sink).await?;

        let task = tokio::spawn(handle_events(
            Arc::clone(&self.store),
            self.events.clone(),
            Arc::clone(runtime),
            rx,
        ));
        debug!(domain = %runtime.name, subscription = handle.id, "subscribed to remote changes");
        feed.handle = Some(handle);
        feed.task = Some(task);
        runtime.subscribed.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Cancels the domain's feed, if any.
    pub(crate) async fn unsubscribe(&self, runtime: &DomainRuntime) {
        let mut feed = runtime.feed.lock().await;
        self.teardown(&mut feed, runtime).await;
    }

    async fn teardown(&self, feed: &mut PullFeed, runtime: &DomainRuntime) {
        // Stop the handler first so the closing feed is not reported as lost.
        if let Some(task) = feed.task.take() {
            task.abort();
            // Wait until the handler is dropped, along with its store handle.
            let _ = task.await;
        }
        runtime.subscribed.store(false, Ordering::SeqCst);
        if let Some(handle) = feed.handle.take() {
            if let Err(e) = self.remote.unsubscribe(handle).await {
                debug!(domain = %runtime.name, error = %e, "unsubscribe failed");
            }
        }
    }
}

async fn handle_events(
    store: Arc<LocalStore>,
    events: EventBus,
    runtime: Arc<DomainRuntime>,
    mut rx: mpsc::UnboundedReceiver<ChangeEvent>,
) {
    let domain = runtime.name.as_str();
    while let Some(event) = rx.recv().await {
        match apply_change(&store, domain, &event) {
            Ok(key) => {
                runtime.applied.fetch_add(1, Ordering::Relaxed);
                debug!(domain, key = %key, change = %event.change_type, "applied remote change");
                events.emit(SyncEvent::RemoteChangeApplied {
                    domain: domain.to_string(),
                    change_type: event.change_type,
                    key,
                });
            }
            Err(e) => {
                warn!(domain, change = %event.change_type, error = %e, "rejected remote change");
                events.emit(SyncEvent::RemoteChangeRejected {
                    domain: domain.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    runtime.subscribed.store(false, Ordering::SeqCst);
    warn!(domain, "remote subscription lost");
    events.emit(SyncEvent::SubscriptionLost {
        domain: domain.to_string(),
    });
}
