//! The sync coordinator.

use crate::config::SyncConfig;
use crate::domain::DomainRuntime;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::pull::PullContext;
use crate::push::{DrainReport, DrainRequest, PushWorker};
use crate::remote::{Notifier, RemoteBackend, ScopeProvider};
use crate::state::{EngineState, SyncStats};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use stocksync_core::{EnqueueOutcome, LocalStore, Mutation, MutationQueue, Record};
use stocksync_storage::KeyValueStore;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pending triggers per domain beyond which new ones are folded away.
const TRIGGER_CAPACITY: usize = 16;

struct Inner<R: RemoteBackend> {
    config: SyncConfig,
    kv: Arc<dyn KeyValueStore>,
    store: Arc<LocalStore>,
    remote: Arc<R>,
    scope: Arc<dyn ScopeProvider>,
    notifier: Arc<dyn Notifier>,
    events: EventBus,
    pull: PullContext<R>,
    state: RwLock<EngineState>,
    online: watch::Sender<bool>,
    stopping: Arc<AtomicBool>,
    domains: RwLock<BTreeMap<String, Arc<DomainRuntime>>>,
    triggers: RwLock<HashMap<String, mpsc::Sender<DrainRequest>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

/// Keeps a set of domains in sync with a remote backend.
///
/// Local writes land in the [`LocalStore`] immediately and are queued for
/// delivery; each domain's queue is drained by its own worker whenever the
/// engine is online. Remote changes stream in through per-domain
/// subscriptions and overwrite the local copy.
///
/// # Lifecycle
///
/// `Uninitialized → Initializing → Ready`, or `Degraded` if a domain fails
/// to open. [`SyncEngine::shutdown`] moves through `ShuttingDown` to
/// `Stopped`. Every transition is published as [`SyncEvent::StateChanged`].
///
/// # Connectivity
///
/// The engine does not probe the network. Call [`SyncEngine::set_online`];
/// an offline to online transition drains every queue and resubscribes every
/// feed. Missed remote changes are not backfilled.
///
/// # Example
///
/// ```rust,ignore
/// let engine = SyncEngine::new(config, kv, remote, scope, Arc::new(NoopNotifier));
/// engine.start().await?;
/// engine.set_online(true);
/// engine.write("products", Record::new().with("code", "X1"))?;
/// let report = engine.drain("products").await?;
/// ```
pub struct SyncEngine<R: RemoteBackend> {
    inner: Arc<Inner<R>>,
}

impl<R: RemoteBackend> Clone for SyncEngine<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: RemoteBackend> SyncEngine<R> {
    /// Creates an engine. Nothing is opened until [`SyncEngine::start`].
    pub fn new(
        config: SyncConfig,
        kv: Arc<dyn KeyValueStore>,
        remote: Arc<R>,
        scope: Arc<dyn ScopeProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let store = Arc::new(LocalStore::new(Arc::clone(&kv)));
        let events = EventBus::new(config.event_capacity);
        let (online, _) = watch::channel(config.initially_online);
        let pull = PullContext {
            store: Arc::clone(&store),
            remote: Arc::clone(&remote),
            scope: Arc::clone(&scope),
            scope_field: config.outbound.scope_field.clone(),
            events: events.clone(),
        };
        Self {
            inner: Arc::new(Inner {
                config,
                kv,
                store,
                remote,
                scope,
                notifier,
                events,
                pull,
                state: RwLock::new(EngineState::Uninitialized),
                online,
                stopping: Arc::new(AtomicBool::new(false)),
                domains: RwLock::new(BTreeMap::new()),
                triggers: RwLock::new(HashMap::new()),
                workers: Mutex::new(Vec::new()),
                background: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> EngineState {
        *self.inner.state.read()
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// The local store. Reads and local-only writes go here directly.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.inner.store
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Returns the current connectivity.
    pub fn is_online(&self) -> bool {
        *self.inner.online.borrow()
    }

    fn transition(&self, next: EngineState) -> SyncResult<()> {
        let from = {
            let mut state = self.inner.state.write();
            if !state.can_transition_to(next) {
                return Err(SyncError::InvalidStateTransition {
                    from: state.to_string(),
                    to: next.to_string(),
                });
            }
            std::mem::replace(&mut *state, next)
        };
        info!(from = %from, to = %next, "engine state changed");
        self.inner
            .events
            .emit(SyncEvent::StateChanged { from, to: next });
        Ok(())
    }

    fn ensure_ready(&self) -> SyncResult<()> {
        let state = self.state();
        if state.is_ready() {
            Ok(())
        } else {
            Err(SyncError::NotReady(state.to_string()))
        }
    }

    fn runtime(&self, domain: &str) -> SyncResult<Arc<DomainRuntime>> {
        self.inner
            .domains
            .read()
            .get(domain)
            .cloned()
            .ok_or_else(|| SyncError::UnknownDomain(domain.to_string()))
    }

    fn runtimes(&self) -> Vec<Arc<DomainRuntime>> {
        self.inner.domains.read().values().cloned().collect()
    }

    /// Opens every domain, starts the workers and subscribes the feeds.
    ///
    /// If online, one drain cycle per domain is triggered right away.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SchemaUpgradeFailed`] if a domain cannot be
    /// opened; the engine is then `Degraded` and `start` may be retried.
    /// Subscription failures are not errors: they are logged and retried on
    /// the next reconnect.
    pub async fn start(&self) -> SyncResult<()> {
        self.transition(EngineState::Initializing)?;

        let mut opened = BTreeMap::new();
        for schema in &self.inner.config.domains {
            let queue = self
                .inner
                .store
                .open_domain(schema)
                .and_then(|_| MutationQueue::open(Arc::clone(&self.inner.kv), schema.name.clone()));
            match queue {
                Ok(queue) => {
                    opened.insert(schema.name.clone(), Arc::new(DomainRuntime::new(queue)));
                }
                Err(source) => {
                    error!(domain = %schema.name, error = %source, "failed to open domain");
                    self.transition(EngineState::Degraded)?;
                    return Err(SyncError::SchemaUpgradeFailed {
                        domain: schema.name.clone(),
                        source,
                    });
                }
            }
        }

        {
            let mut triggers = self.inner.triggers.write();
            let mut workers = self.inner.workers.lock();
            for runtime in opened.values() {
                let worker = PushWorker {
                    runtime: Arc::clone(runtime),
                    remote: Arc::clone(&self.inner.remote),
                    online: self.inner.online.subscribe(),
                    events: self.inner.events.clone(),
                    notifier: Arc::clone(&self.inner.notifier),
                    stopping: Arc::clone(&self.inner.stopping),
                };
                let (tx, handle) = worker.spawn(TRIGGER_CAPACITY);
                triggers.insert(runtime.name.clone(), tx);
                workers.push(handle);
            }
        }
        *self.inner.domains.write() = opened;

        self.transition(EngineState::Ready)?;
        self.spawn_background();

        for runtime in self.runtimes() {
            if let Err(e) = self.inner.pull.subscribe(&runtime).await {
                warn!(domain = %runtime.name, error = %e, "could not subscribe to remote changes");
            }
        }
        if self.is_online() {
            self.trigger_all();
        }
        Ok(())
    }

    fn spawn_background(&self) {
        let mut background = self.inner.background.lock();

        let weak = Arc::downgrade(&self.inner);
        // Read the starting value here: a change made before the task first
        // runs must still be seen as a change.
        let mut rx = self.inner.online.subscribe();
        let was_online = *rx.borrow_and_update();
        background.push(tokio::spawn(connectivity_listener(weak, rx, was_online)));

        if let Some(period) = self.inner.config.drain_interval {
            let weak = Arc::downgrade(&self.inner);
            background.push(tokio::spawn(drain_timer(weak, period)));
        }
    }

    /// Writes a record locally and queues it for delivery.
    ///
    /// The local write happens first and its errors are returned directly.
    /// Without a scope id the record stays local: the outcome is
    /// [`EnqueueOutcome::Dropped`] and [`SyncEvent::MutationDropped`] is
    /// published.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotReady`] unless the engine is `Ready`,
    /// [`SyncError::UnknownDomain`], or the store or queue error.
    pub fn write(&self, domain: &str, record: Record) -> SyncResult<EnqueueOutcome> {
        self.ensure_ready()?;
        let runtime = self.runtime(domain)?;

        self.inner.store.put(domain, record.clone())?;

        let scope_id = self.inner.scope.scope_id();
        let outbound = self
            .inner
            .config
            .outbound
            .prepare(&record, scope_id.as_deref());
        let outcome = runtime
            .queue
            .lock()
            .enqueue(Mutation::new(domain, outbound, scope_id))?;

        match outcome {
            EnqueueOutcome::Dropped(reason) => {
                self.inner.events.emit(SyncEvent::MutationDropped {
                    domain: domain.to_string(),
                    reason,
                });
            }
            EnqueueOutcome::Enqueued(_) => {
                if self.is_online() {
                    self.trigger_push(domain)?;
                }
            }
        }
        Ok(outcome)
    }

    /// Updates connectivity. Going from offline to online drains every queue
    /// and resubscribes every feed.
    pub fn set_online(&self, online: bool) {
        self.inner.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    /// Asks for a drain cycle without waiting for it.
    ///
    /// Triggers that arrive while a cycle is running are folded into the next
    /// one.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotReady`], [`SyncError::UnknownDomain`], or
    /// [`SyncError::Cancelled`] if the worker has stopped.
    pub fn trigger_push(&self, domain: &str) -> SyncResult<()> {
        self.ensure_ready()?;
        let tx = self.sender(domain)?;
        match tx.try_send(DrainRequest::default()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SyncError::Cancelled),
        }
    }

    fn sender(&self, domain: &str) -> SyncResult<mpsc::Sender<DrainRequest>> {
        self.inner
            .triggers
            .read()
            .get(domain)
            .cloned()
            .ok_or_else(|| SyncError::UnknownDomain(domain.to_string()))
    }

    fn trigger_all(&self) {
        trigger_all(&self.inner);
    }

    /// Runs a drain cycle for one domain and waits for its report.
    ///
    /// If a cycle is already running, the report is that of the next one.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotReady`], [`SyncError::UnknownDomain`], or
    /// [`SyncError::Cancelled`] if the engine shuts down first. A failed
    /// upsert is not an error here; it is reported in the [`DrainReport`].
    pub async fn drain(&self, domain: &str) -> SyncResult<DrainReport> {
        self.ensure_ready()?;
        let tx = self.sender(domain)?;
        let (reply, rx) = oneshot::channel();
        tx.send(DrainRequest { reply: Some(reply) })
            .await
            .map_err(|_| SyncError::Cancelled)?;
        rx.await.map_err(|_| SyncError::Cancelled)
    }

    /// Drains every domain concurrently. Reports are sorted by domain.
    ///
    /// # Errors
    ///
    /// Same as [`SyncEngine::drain`].
    pub async fn drain_all(&self) -> SyncResult<Vec<DrainReport>> {
        self.ensure_ready()?;
        let senders: Vec<_> = {
            let triggers = self.inner.triggers.read();
            let mut senders: Vec<_> = triggers
                .iter()
                .map(|(domain, tx)| (domain.clone(), tx.clone()))
                .collect();
            senders.sort_by(|a, b| a.0.cmp(&b.0));
            senders
        };

        // Workers run independently, so sending every request before
        // awaiting any reply is what makes the drains concurrent.
        let mut pending = Vec::with_capacity(senders.len());
        for (_, tx) in senders {
            let (reply, rx) = oneshot::channel();
            tx.send(DrainRequest { reply: Some(reply) })
                .await
                .map_err(|_| SyncError::Cancelled)?;
            pending.push(rx);
        }

        let mut reports = Vec::with_capacity(pending.len());
        for rx in pending {
            reports.push(rx.await.map_err(|_| SyncError::Cancelled)?);
        }
        Ok(reports)
    }

    /// Current statistics.
    pub fn stats(&self) -> SyncStats {
        SyncStats {
            state: self.state(),
            online: self.is_online(),
            domains: self.runtimes().iter().map(|r| r.stats()).collect(),
        }
    }

    /// Stops the engine.
    ///
    /// New triggers are refused, feeds are unsubscribed, and running drains
    /// get up to `shutdown_timeout` to finish their current upsert before
    /// they are abandoned. An abandoned mutation stays at the head of its
    /// queue. Queues are persisted and the backend flushed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidStateTransition`] if already stopping or
    /// stopped, or the flush error.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.transition(EngineState::ShuttingDown)?;
        self.inner.stopping.store(true, Ordering::SeqCst);

        let background: Vec<_> = self.inner.background.lock().drain(..).collect();
        for task in background {
            task.abort();
            let _ = task.await;
        }
        self.inner.triggers.write().clear();

        let runtimes = self.runtimes();
        for runtime in &runtimes {
            self.inner.pull.unsubscribe(runtime).await;
        }

        let mut workers: Vec<_> = self.inner.workers.lock().drain(..).collect();
        let timeout = self.inner.config.shutdown_timeout;
        let finished = tokio::time::timeout(timeout, async {
            while let Some(worker) = workers.last_mut() {
                let _ = worker.await;
                workers.pop();
            }
        })
        .await;
        if finished.is_err() {
            warn!(timeout_ms = timeout.as_millis() as u64, "abandoning unfinished drains");
            for worker in workers {
                worker.abort();
                let _ = worker.await;
            }
        }

        for runtime in &runtimes {
            let mut queue = runtime.queue.lock();
            if let Some(id) = queue.release_in_flight() {
                debug!(domain = %runtime.name, mutation = %id, "abandoned in-flight mutation");
            }
            if let Err(e) = queue.persist() {
                error!(domain = %runtime.name, error = %e, "failed to persist queue on shutdown");
            }
        }

        self.inner.domains.write().clear();
        let closed = self.inner.store.close();
        self.transition(EngineState::Stopped)?;
        closed?;
        info!("engine stopped");
        Ok(())
    }
}

fn trigger_all<R: RemoteBackend>(inner: &Inner<R>) {
    for (domain, tx) in inner.triggers.read().iter() {
        if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(DrainRequest::default()) {
            debug!(domain = %domain, "push worker already stopped");
        }
    }
}

async fn connectivity_listener<R: RemoteBackend>(
    inner: Weak<Inner<R>>,
    mut rx: watch::Receiver<bool>,
    mut was_online: bool,
) {
    while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if online == was_online {
            continue;
        }
        was_online = online;

        info!(online, "connectivity changed");
        inner
            .events
            .emit(SyncEvent::ConnectivityChanged { online });

        if !online || !inner.state.read().is_ready() {
            continue;
        }
        trigger_all(&inner);

        let runtimes: Vec<_> = inner.domains.read().values().cloned().collect();
        for runtime in runtimes {
            match inner.pull.subscribe(&runtime).await {
                Ok(()) => inner.events.emit(SyncEvent::Resubscribed {
                    domain: runtime.name.clone(),
                }),
                Err(e) => {
                    warn!(domain = %runtime.name, error = %e, "resubscribe failed");
                }
            }
        }
    }
}

async fn drain_timer<R: RemoteBackend>(inner: Weak<Inner<R>>, period: std::time::Duration) {
    let mut interval = tokio::time::interval(period);
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if *inner.online.borrow() && inner.state.read().is_ready() {
            trigger_all(&inner);
        }
    }
}
