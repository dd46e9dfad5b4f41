//! Push side: drains a domain's mutation queue to the remote backend.
//!
//! Each domain has exactly one [`PushWorker`] task. Triggers arrive on a
//! channel; triggers that pile up while a cycle runs are folded into the
//! next cycle. Because only the worker pops from the queue, at most one
//! upsert per domain is ever in flight.
//!
//! A drain cycle delivers mutations strictly in queue order and stops at the
//! first failure, putting the failed mutation back at the head. Later
//! mutations are not attempted until a following cycle gets past it.

use crate::domain::DomainRuntime;
use crate::error::SyncError;
use crate::events::{EventBus, SyncEvent};
use crate::remote::{Notifier, RemoteBackend, SyncOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use stocksync_core::now_ms;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of one drain cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Domain drained.
    pub domain: String,
    /// Mutations delivered.
    pub processed: usize,
    /// Mutations still pending.
    pub remaining: usize,
    /// Error that stopped the cycle.
    pub error: Option<String>,
    /// The cycle stopped early because the engine went offline or is stopping.
    pub interrupted: bool,
}

impl DrainReport {
    /// Returns true if no upsert failed.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Converts the report into the shape given to the notifier.
    pub fn outcome(&self) -> SyncOutcome {
        match &self.error {
            None => SyncOutcome::Drained {
                domain: self.domain.clone(),
                processed: self.processed,
                remaining: self.remaining,
            },
            Some(error) => SyncOutcome::Failed {
                domain: self.domain.clone(),
                processed: self.processed,
                remaining: self.remaining,
                error: error.clone(),
            },
        }
    }
}

/// A request to run a drain cycle, optionally waiting for its report.
#[derive(Debug, Default)]
pub(crate) struct DrainRequest {
    pub(crate) reply: Option<oneshot::Sender<DrainReport>>,
}

/// The single push worker of one domain.
pub(crate) struct PushWorker<R> {
    pub(crate) runtime: Arc<DomainRuntime>,
    pub(crate) remote: Arc<R>,
    pub(crate) online: watch::Receiver<bool>,
    pub(crate) events: EventBus,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) stopping: Arc<AtomicBool>,
}

impl<R: RemoteBackend> PushWorker<R> {
    /// Starts the worker. It runs until every trigger sender is dropped.
    pub(crate) fn spawn(self, capacity: usize) -> (mpsc::Sender<DrainRequest>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(self.run(rx));
        (tx, handle)
    }

    async fn run(self, mut rx: mpsc::Receiver<DrainRequest>) {
        while let Some(first) = rx.recv().await {
            let mut replies: Vec<_> = first.reply.into_iter().collect();
            while let Ok(more) = rx.try_recv() {
                replies.extend(more.reply);
            }

            let report = self.drain_cycle().await;
            for reply in replies {
                let _ = reply.send(report.clone());
            }
        }
        debug!(domain = %self.runtime.name, "push worker stopped");
    }

    fn should_stop(&self) -> bool {
        let online = *self.online.borrow();
        !online || self.stopping.load(Ordering::SeqCst)
    }

    /// Runs one drain cycle and publishes its outcome.
    pub(crate) async fn drain_cycle(&self) -> DrainReport {
        let domain = self.runtime.name.as_str();
        let mut processed = 0usize;
        let mut failure: Option<SyncError> = None;
        let mut interrupted = false;

        loop {
            if self.should_stop() {
                interrupted = !self.runtime.queue.lock().is_empty();
                break;
            }

            let next = self.runtime.queue.lock().pop_front();
            let mutation = match next {
                Ok(Some(mutation)) => mutation,
                Ok(None) => break,
                Err(e) => {
                    failure = Some(e.into());
                    break;
                }
            };
            let id = mutation.id();

            if !mutation.has_scope() {
                // Filtered at enqueue; only reachable with a hand-edited queue.
                warn!(domain, mutation = %id, "skipping queued mutation without scope id");
                let acked = self.runtime.queue.lock().acknowledge(id);
                if let Err(e) = acked {
                    self.runtime.queue.lock().release_in_flight();
                    failure = Some(e.into());
                    break;
                }
                continue;
            }

            let result = self.remote.upsert(domain, mutation.record()).await;
            match result {
                Ok(_) => {
                    let acked = self.runtime.queue.lock().acknowledge(id);
                    if let Err(e) = acked {
                        error!(domain, mutation = %id, error = %e, "failed to persist acknowledgement");
                        self.runtime.queue.lock().release_in_flight();
                        failure = Some(e.into());
                        break;
                    }
                    processed += 1;
                    self.runtime.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!(domain, mutation = %id, "delivered mutation");
                }
                Err(e) => {
                    warn!(
                        domain,
                        mutation = %id,
                        error = %e,
                        retryable = e.is_retryable(),
                        "upsert failed, stopping drain"
                    );
                    let mut queue = self.runtime.queue.lock();
                    if let Err(persist) = queue.requeue_front(mutation) {
                        error!(domain, mutation = %id, error = %persist, "failed to persist requeue");
                        queue.release_in_flight();
                    }
                    failure = Some(e);
                    break;
                }
            }
        }

        let remaining = {
            let queue = self.runtime.queue.lock();
            if let Err(e) = queue.persist() {
                error!(domain, error = %e, "failed to persist queue after drain");
            }
            queue.len()
        };

        let report = DrainReport {
            domain: domain.to_string(),
            processed,
            remaining,
            error: failure.as_ref().map(ToString::to_string),
            interrupted,
        };

        match &report.error {
            None => {
                // A cycle cut short by going offline has not synced the queue.
                if !interrupted {
                    *self.runtime.last_drain_ms.lock() = Some(now_ms());
                }
                if processed > 0 {
                    info!(domain, processed, remaining, "drain completed");
                }
                self.events.emit(SyncEvent::DrainCompleted {
                    domain: report.domain.clone(),
                    processed,
                    remaining,
                });
            }
            Some(error) => {
                info!(domain, processed, remaining, error = %error, "drain stopped at failure");
                self.events.emit(SyncEvent::DrainFailed {
                    domain: report.domain.clone(),
                    processed,
                    remaining,
                    error: error.clone(),
                });
            }
        }

        if processed > 0 || report.error.is_some() {
            self.notifier.on_sync_outcome(&report.outcome());
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_outcome() {
        let ok = DrainReport {
            domain: "products".into(),
            processed: 2,
            remaining: 0,
            error: None,
            interrupted: false,
        };
        assert!(ok.is_success());
        assert_eq!(
            ok.outcome(),
            SyncOutcome::Drained {
                domain: "products".into(),
                processed: 2,
                remaining: 0
            }
        );

        let failed = DrainReport {
            error: Some("remote unavailable: 503".into()),
            remaining: 3,
            processed: 0,
            ..ok
        };
        assert!(!failed.is_success());
        assert!(matches!(failed.outcome(), SyncOutcome::Failed { remaining: 3, .. }));
    }
}
