//! Events published by the engine to local observers.

use crate::state::EngineState;
use stocksync_core::{ChangeType, DropReason};
use tokio::sync::broadcast;

/// Something observers of the engine may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The engine changed lifecycle state.
    StateChanged {
        /// Previous state.
        from: EngineState,
        /// New state.
        to: EngineState,
    },
    /// A drain cycle ended without a failed upsert.
    DrainCompleted {
        /// Domain drained.
        domain: String,
        /// Mutations delivered.
        processed: usize,
        /// Mutations still pending.
        remaining: usize,
    },
    /// A drain cycle stopped at a failed upsert.
    DrainFailed {
        /// Domain drained.
        domain: String,
        /// Mutations delivered before the failure.
        processed: usize,
        /// Mutations still pending.
        remaining: usize,
        /// Error message.
        error: String,
    },
    /// A remote change was written to the local store.
    RemoteChangeApplied {
        /// Domain of the record.
        domain: String,
        /// Kind of change.
        change_type: ChangeType,
        /// Key of the record.
        key: String,
    },
    /// A remote change could not be applied.
    RemoteChangeRejected {
        /// Domain of the subscription.
        domain: String,
        /// Error message.
        error: String,
    },
    /// A local write was stored but not queued for sync.
    MutationDropped {
        /// Domain of the record.
        domain: String,
        /// Why it was dropped.
        reason: DropReason,
    },
    /// A remote change feed ended.
    SubscriptionLost {
        /// Domain of the feed.
        domain: String,
    },
    /// A remote change feed was re-established.
    Resubscribed {
        /// Domain of the feed.
        domain: String,
    },
    /// Connectivity changed.
    ConnectivityChanged {
        /// New connectivity.
        online: bool,
    },
}

/// Fan-out of [`SyncEvent`]s to any number of receivers.
///
/// Publishing never blocks; a receiver that falls behind by more than the
/// channel capacity loses the oldest events.
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        // No receivers is fine.
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}
