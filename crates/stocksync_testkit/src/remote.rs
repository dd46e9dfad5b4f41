//! In-memory remote backend with failure injection.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use stocksync_core::{ChangeEvent, Record};
use stocksync_sync_engine::{
    Ack, EventSink, RemoteBackend, ScopeFilter, SubscriptionHandle, SyncError, SyncResult,
};

struct Subscription {
    domain: String,
    filter: ScopeFilter,
    sink: EventSink,
}

/// A remote backend that records everything and fails on request.
///
/// - Successful upserts are kept in order and applied to a server-side copy
/// - `fail_next(n)` makes the next `n` upserts fail with a retryable error
/// - `reject_key(k)` makes every upsert of record `k` fail with a fatal error
/// - `set_latency(d)` delays every upsert, to observe concurrency
/// - `emit(event)` pushes a change to matching subscribers
pub struct MockRemote {
    key_field: String,
    upserts: Mutex<Vec<(String, Record)>>,
    attempts: Mutex<Vec<(String, String)>>,
    fail_next: AtomicUsize,
    rejected_keys: Mutex<HashSet<String>>,
    latency: Mutex<Option<Duration>>,
    in_flight: Mutex<HashMap<String, usize>>,
    max_in_flight: Mutex<HashMap<String, usize>>,
    records: Mutex<BTreeMap<(String, String), Record>>,
    subscriptions: Mutex<HashMap<u64, Subscription>>,
    next_subscription: AtomicU64,
    subscribe_calls: AtomicUsize,
    refuse_subscribe: AtomicBool,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemote {
    /// Creates a backend keyed by the `code` attribute.
    pub fn new() -> Self {
        Self::with_key_field("code")
    }

    /// Creates a backend keyed by another attribute.
    pub fn with_key_field(key_field: impl Into<String>) -> Self {
        Self {
            key_field: key_field.into(),
            upserts: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
            fail_next: AtomicUsize::new(0),
            rejected_keys: Mutex::new(HashSet::new()),
            latency: Mutex::new(None),
            in_flight: Mutex::new(HashMap::new()),
            max_in_flight: Mutex::new(HashMap::new()),
            records: Mutex::new(BTreeMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            subscribe_calls: AtomicUsize::new(0),
            refuse_subscribe: AtomicBool::new(false),
        }
    }

    fn key_of(&self, record: &Record) -> String {
        record.key_for(&self.key_field).unwrap_or_default()
    }

    /// Makes the next `n` upserts fail.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Makes every upsert of the record with this key fail.
    pub fn reject_key(&self, key: impl Into<String>) {
        self.rejected_keys.lock().insert(key.into());
    }

    /// Clears every injected failure.
    pub fn heal(&self) {
        self.fail_next.store(0, Ordering::SeqCst);
        self.rejected_keys.lock().clear();
    }

    /// Delays every upsert by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Makes `subscribe` fail until turned off again.
    pub fn refuse_subscriptions(&self, refuse: bool) {
        self.refuse_subscribe.store(refuse, Ordering::SeqCst);
    }

    /// Successful upserts, in the order they were accepted.
    pub fn upserts(&self) -> Vec<(String, Record)> {
        self.upserts.lock().clone()
    }

    /// Keys of the successful upserts of one domain, in order.
    pub fn upserted_keys(&self, domain: &str) -> Vec<String> {
        self.upserts
            .lock()
            .iter()
            .filter(|(d, _)| d == domain)
            .map(|(_, r)| self.key_of(r))
            .collect()
    }

    /// Number of upsert calls, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Keys of every upsert call for a domain, failed ones included, in order.
    pub fn attempted_keys(&self, domain: &str) -> Vec<String> {
        self.attempts
            .lock()
            .iter()
            .filter(|(d, _)| d == domain)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Highest number of concurrent upserts seen for a domain.
    pub fn max_concurrency(&self, domain: &str) -> usize {
        self.max_in_flight.lock().get(domain).copied().unwrap_or(0)
    }

    /// Server-side copy of a record.
    pub fn server_record(&self, domain: &str, key: &str) -> Option<Record> {
        self.records
            .lock()
            .get(&(domain.to_string(), key.to_string()))
            .cloned()
    }

    /// Number of `subscribe` calls so far.
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions for a domain.
    pub fn active_subscriptions(&self, domain: &str) -> usize {
        self.subscriptions
            .lock()
            .values()
            .filter(|s| s.domain == domain && !s.sink.is_closed())
            .count()
    }

    /// Delivers a change to every matching subscriber of its domain.
    ///
    /// Records without the scope attribute match every scope. Returns how
    /// many subscribers received it.
    pub fn emit(&self, event: ChangeEvent) -> usize {
        let subscriptions = self.subscriptions.lock();
        subscriptions
            .values()
            .filter(|s| s.domain == event.domain)
            .filter(|s| {
                event.subject().is_some_and(|record| {
                    !record.contains(&s.filter.field) || s.filter.matches(record)
                })
            })
            .filter(|s| s.sink.send(event.clone()))
            .count()
    }

    /// Drops every subscription of a domain, as a lost connection would.
    pub fn drop_subscriptions(&self, domain: &str) {
        self.subscriptions.lock().retain(|_, s| s.domain != domain);
    }

    fn enter(&self, domain: &str) {
        let mut in_flight = self.in_flight.lock();
        let current = in_flight.entry(domain.to_string()).or_insert(0);
        *current += 1;
        let mut max = self.max_in_flight.lock();
        let seen = max.entry(domain.to_string()).or_insert(0);
        *seen = (*seen).max(*current);
    }

    fn leave(&self, domain: &str) {
        if let Some(current) = self.in_flight.lock().get_mut(domain) {
            *current = current.saturating_sub(1);
        }
    }

    fn check_failures(&self, key: &str) -> SyncResult<()> {
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SyncError::remote_retryable("injected failure"));
        }
        if self.rejected_keys.lock().contains(key) {
            return Err(SyncError::remote_fatal(format!("record {key} rejected")));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for MockRemote {
    async fn upsert(&self, domain: &str, record: &Record) -> SyncResult<Ack> {
        let key = self.key_of(record);
        self.attempts
            .lock()
            .push((domain.to_string(), key.clone()));
        self.enter(domain);

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let result = self.check_failures(&key).map(|()| {
            self.upserts
                .lock()
                .push((domain.to_string(), record.clone()));
            self.records
                .lock()
                .insert((domain.to_string(), key.clone()), record.clone());
            Ack {
                remote_id: Some(key),
            }
        });

        self.leave(domain);
        result
    }

    async fn subscribe(
        &self,
        domain: &str,
        filter: ScopeFilter,
        sink: EventSink,
    ) -> SyncResult<SubscriptionHandle> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.refuse_subscribe.load(Ordering::SeqCst) {
            return Err(SyncError::remote_retryable("subscriptions unavailable"));
        }
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.lock().insert(
            id,
            Subscription {
                domain: domain.to_string(),
                filter,
                sink,
            },
        );
        Ok(SubscriptionHandle::new(id, domain))
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> SyncResult<()> {
        self.subscriptions.lock().remove(&handle.id);
        Ok(())
    }
}
