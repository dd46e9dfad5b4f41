//! Per-domain runtime state shared by the push worker and the pull feed.

use crate::pull::PullFeed;
use crate::state::DomainStats;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use stocksync_core::MutationQueue;

/// Everything the engine tracks about one synced domain.
///
/// The queue mutex is never held across an `.await`.
pub(crate) struct DomainRuntime {
    pub(crate) name: String,
    pub(crate) queue: Mutex<MutationQueue>,
    pub(crate) last_drain_ms: Mutex<Option<u64>>,
    pub(crate) delivered: AtomicU64,
    pub(crate) applied: AtomicU64,
    pub(crate) subscribed: AtomicBool,
    pub(crate) feed: tokio::sync::Mutex<PullFeed>,
}

impl DomainRuntime {
    pub(crate) fn new(queue: MutationQueue) -> Self {
        Self {
            name: queue.domain().to_string(),
            queue: Mutex::new(queue),
            last_drain_ms: Mutex::new(None),
            delivered: AtomicU64::new(0),
            applied: AtomicU64::new(0),
            subscribed: AtomicBool::new(false),
            feed: tokio::sync::Mutex::new(PullFeed::default()),
        }
    }

    pub(crate) fn stats(&self) -> DomainStats {
        DomainStats {
            domain: self.name.clone(),
            queue: self.queue.lock().stats(),
            subscribed: self.subscribed.load(Ordering::SeqCst),
            last_drain_ms: *self.last_drain_ms.lock(),
            delivered: self.delivered.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
        }
    }
}
