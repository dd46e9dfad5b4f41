//! Durable per-domain mutation queue.
//!
//! The queue is a FIFO of [`Mutation`]s that survives restarts. Its whole
//! content is rewritten to the backend on every structural change, under the
//! key `sync_queue.<domain>` of the reserved [`QUEUE_COLLECTION`].
//!
//! Delivery is two-phase. [`MutationQueue::pop_front`] moves the head into an
//! in-flight slot, but the persisted array still starts with it; only
//! [`MutationQueue::acknowledge`] removes it for good. A crash between the two
//! therefore redelivers the mutation on the next start (at-least-once).

use crate::codec::{from_cbor, to_cbor};
use crate::error::{CoreError, CoreResult};
use crate::mutation::{DropReason, EnqueueOutcome, Mutation};
use std::collections::VecDeque;
use std::sync::Arc;
use stocksync_storage::KeyValueStore;
use tracing::{debug, warn};
use uuid::Uuid;

/// Reserved collection holding every domain's persisted queue.
pub const QUEUE_COLLECTION: &str = "_queue";

/// Queue statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Pending mutations, including the one in flight.
    pub len: usize,
    /// Enqueue time of the oldest pending mutation.
    pub oldest_enqueued_at_ms: Option<u64>,
    /// Whether a mutation is being delivered.
    pub in_flight: bool,
}

/// Ordered, durable queue of pending mutations for one domain.
///
/// # Invariants
///
/// - Mutations leave in the order they were enqueued
/// - A requeued mutation goes back to the head, ahead of everything else
/// - At most one mutation is in flight
/// - The persisted array equals `[in_flight, items...]` after every call
///   that returns `Ok`
pub struct MutationQueue {
    domain: String,
    kv: Arc<dyn KeyValueStore>,
    items: VecDeque<Mutation>,
    in_flight: Option<Mutation>,
}

impl MutationQueue {
    /// Storage key of a domain's queue.
    #[must_use]
    pub fn storage_key(domain: &str) -> String {
        format!("sync_queue.{domain}")
    }

    /// Opens the queue of `domain`, reloading any persisted mutations.
    ///
    /// A mutation that was in flight when the process stopped is back at the
    /// head.
    ///
    /// # Errors
    ///
    /// Returns storage or codec errors if the persisted queue cannot be read.
    pub fn open(kv: Arc<dyn KeyValueStore>, domain: impl Into<String>) -> CoreResult<Self> {
        let domain = domain.into();
        let items: VecDeque<Mutation> = match kv.get(QUEUE_COLLECTION, &Self::storage_key(&domain))? {
            Some(bytes) => from_cbor::<Vec<Mutation>>(&bytes)?.into(),
            None => VecDeque::new(),
        };
        if !items.is_empty() {
            debug!(domain = %domain, pending = items.len(), "reloaded mutation queue");
        }
        Ok(Self {
            domain,
            kv,
            items,
            in_flight: None,
        })
    }

    /// Domain this queue belongs to.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Appends a mutation and persists the queue.
    ///
    /// A mutation without a scope id is dropped: the queue is left untouched
    /// and a warning is logged.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DomainMismatch`] for a mutation of another domain,
    /// or the persistence error (the mutation is then not enqueued).
    pub fn enqueue(&mut self, mutation: Mutation) -> CoreResult<EnqueueOutcome> {
        self.check_domain(&mutation)?;
        if !mutation.has_scope() {
            warn!(
                domain = %self.domain,
                mutation = %mutation.id(),
                "dropping mutation without scope id"
            );
            return Ok(EnqueueOutcome::Dropped(DropReason::ScopeMissing));
        }

        let id = mutation.id();
        self.items.push_back(mutation);
        if let Err(e) = self.persist() {
            self.items.pop_back();
            return Err(e);
        }
        debug!(domain = %self.domain, mutation = %id, pending = self.len(), "enqueued mutation");
        Ok(EnqueueOutcome::Enqueued(id))
    }

    /// Returns the next mutation to deliver without removing it.
    #[must_use]
    pub fn peek_front(&self) -> Option<&Mutation> {
        self.in_flight.as_ref().or_else(|| self.items.front())
    }

    /// Takes the head mutation for delivery.
    ///
    /// The mutation stays persisted until it is acknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DeliveryInProgress`] if another mutation is
    /// already in flight, or the persistence error.
    pub fn pop_front(&mut self) -> CoreResult<Option<Mutation>> {
        if let Some(current) = &self.in_flight {
            return Err(CoreError::DeliveryInProgress {
                domain: self.domain.clone(),
                in_flight: current.id(),
            });
        }
        let Some(head) = self.items.pop_front() else {
            return Ok(None);
        };
        self.in_flight = Some(head.clone());
        if let Err(e) = self.persist() {
            self.in_flight = None;
            self.items.push_front(head);
            return Err(e);
        }
        Ok(Some(head))
    }

    /// Confirms delivery of the in-flight mutation and forgets it.
    ///
    /// Returns `false` if `id` is not the in-flight mutation.
    ///
    /// # Errors
    ///
    /// Returns the persistence error; the mutation then stays in flight.
    pub fn acknowledge(&mut self, id: Uuid) -> CoreResult<bool> {
        match &self.in_flight {
            Some(current) if current.id() == id => {}
            _ => return Ok(false),
        }
        let acked = self.in_flight.take();
        if let Err(e) = self.persist() {
            self.in_flight = acked;
            return Err(e);
        }
        debug!(domain = %self.domain, mutation = %id, pending = self.len(), "acknowledged mutation");
        Ok(true)
    }

    /// Puts a mutation back at the head of the queue, unchanged.
    ///
    /// Used after a failed delivery. If `mutation` is the in-flight one the
    /// slot is released.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DomainMismatch`] for a mutation of another domain,
    /// or the persistence error.
    pub fn requeue_front(&mut self, mutation: Mutation) -> CoreResult<()> {
        self.check_domain(&mutation)?;
        let released = match &self.in_flight {
            Some(current) if current.id() == mutation.id() => self.in_flight.take(),
            _ => None,
        };
        let id = mutation.id();
        self.items.push_front(mutation);
        if let Err(e) = self.persist() {
            self.items.pop_front();
            self.in_flight = released;
            return Err(e);
        }
        debug!(domain = %self.domain, mutation = %id, "requeued mutation at head");
        Ok(())
    }

    /// Moves the in-flight mutation back to the head without writing.
    ///
    /// The persisted array already starts with the in-flight mutation, so
    /// this only reconciles memory with it. Returns the released id.
    pub fn release_in_flight(&mut self) -> Option<Uuid> {
        let released = self.in_flight.take()?;
        let id = released.id();
        self.items.push_front(released);
        Some(id)
    }

    /// Removes a pending mutation by id. Returns `true` if it was found.
    ///
    /// This is the manual way out for a mutation the remote keeps rejecting.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DeliveryInProgress`] if `id` is in flight, or the
    /// persistence error.
    pub fn remove_by_id(&mut self, id: Uuid) -> CoreResult<bool> {
        if self.in_flight.as_ref().is_some_and(|m| m.id() == id) {
            return Err(CoreError::DeliveryInProgress {
                domain: self.domain.clone(),
                in_flight: id,
            });
        }
        let Some(position) = self.items.iter().position(|m| m.id() == id) else {
            return Ok(false);
        };
        let removed = self.items.remove(position);
        if let Err(e) = self.persist() {
            if let Some(removed) = removed {
                self.items.insert(position, removed);
            }
            return Err(e);
        }
        warn!(domain = %self.domain, mutation = %id, "removed pending mutation");
        Ok(true)
    }

    /// Drops every pending mutation that is not in flight.
    ///
    /// Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns the persistence error; the queue is then unchanged.
    pub fn clear(&mut self) -> CoreResult<usize> {
        let removed = std::mem::take(&mut self.items);
        if let Err(e) = self.persist() {
            self.items = removed;
            return Err(e);
        }
        Ok(removed.len())
    }

    /// Pending mutations in delivery order, in-flight first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Mutation> {
        self.in_flight
            .iter()
            .chain(self.items.iter())
            .cloned()
            .collect()
    }

    /// Pending mutations, including the one in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len() + usize::from(self.in_flight.is_some())
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if a mutation is being delivered.
    #[must_use]
    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            len: self.len(),
            oldest_enqueued_at_ms: self.peek_front().map(Mutation::enqueued_at_ms),
            in_flight: self.in_flight.is_some(),
        }
    }

    /// Writes the whole queue to the backend.
    ///
    /// # Errors
    ///
    /// Returns storage or codec errors.
    pub fn persist(&self) -> CoreResult<()> {
        let key = Self::storage_key(&self.domain);
        if self.is_empty() {
            self.kv.delete(QUEUE_COLLECTION, &key)?;
            return Ok(());
        }
        let bytes = to_cbor(&self.snapshot())?;
        self.kv.put(QUEUE_COLLECTION, &key, &bytes)?;
        Ok(())
    }

    fn check_domain(&self, mutation: &Mutation) -> CoreResult<()> {
        if mutation.domain() == self.domain {
            Ok(())
        } else {
            Err(CoreError::DomainMismatch {
                expected: self.domain.clone(),
                actual: mutation.domain().to_string(),
            })
        }
    }
}

impl std::fmt::Debug for MutationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationQueue")
            .field("domain", &self.domain)
            .field("pending", &self.items.len())
            .field("in_flight", &self.in_flight.as_ref().map(Mutation::id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use stocksync_storage::{InMemoryKv, StorageError, StorageResult};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn mutation(code: &str) -> Mutation {
        Mutation::new(
            "products",
            Record::new().with("code", code),
            Some("area1".to_string()),
        )
    }

    fn codes(queue: &MutationQueue) -> Vec<String> {
        queue
            .snapshot()
            .iter()
            .map(|m| m.record().key_for("code").unwrap())
            .collect()
    }

    fn queue() -> (Arc<dyn KeyValueStore>, MutationQueue) {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKv::new());
        let queue = MutationQueue::open(Arc::clone(&kv), "products").unwrap();
        (kv, queue)
    }

    #[test]
    fn fifo_order() {
        let (_, mut q) = queue();
        for code in ["A", "B", "C"] {
            q.enqueue(mutation(code)).unwrap();
        }
        let mut delivered = Vec::new();
        while let Some(m) = q.pop_front().unwrap() {
            delivered.push(m.record().key_for("code").unwrap());
            assert!(q.acknowledge(m.id()).unwrap());
        }
        assert_eq!(delivered, vec!["A", "B", "C"]);
        assert!(q.is_empty());
    }

    #[test]
    fn requeue_goes_to_head() {
        let (_, mut q) = queue();
        for code in ["A", "B", "C"] {
            q.enqueue(mutation(code)).unwrap();
        }
        let head = q.pop_front().unwrap().unwrap();
        let id = head.id();
        q.requeue_front(head).unwrap();

        assert_eq!(codes(&q), vec!["A", "B", "C"]);
        assert!(!q.has_in_flight());
        assert_eq!(q.peek_front().unwrap().id(), id);
    }

    #[test]
    fn scope_less_mutation_is_dropped() {
        let (_, mut q) = queue();
        let m = Mutation::new("products", Record::new().with("code", "A"), None);
        let outcome = q.enqueue(m).unwrap();
        assert_eq!(outcome, EnqueueOutcome::Dropped(DropReason::ScopeMissing));
        assert!(q.is_empty());
    }

    #[test]
    fn wrong_domain_is_rejected() {
        let (_, mut q) = queue();
        let m = Mutation::new("inventory", Record::new().with("code", "A"), Some("a".into()));
        assert!(matches!(q.enqueue(m), Err(CoreError::DomainMismatch { .. })));
    }

    #[test]
    fn single_in_flight() {
        let (_, mut q) = queue();
        q.enqueue(mutation("A")).unwrap();
        q.enqueue(mutation("B")).unwrap();
        let _a = q.pop_front().unwrap().unwrap();
        assert!(matches!(
            q.pop_front(),
            Err(CoreError::DeliveryInProgress { .. })
        ));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn in_flight_survives_reopen() {
        let (kv, mut q) = queue();
        q.enqueue(mutation("A")).unwrap();
        q.enqueue(mutation("B")).unwrap();
        let a = q.pop_front().unwrap().unwrap();
        drop(q);

        let reopened = MutationQueue::open(kv, "products").unwrap();
        assert_eq!(codes(&reopened), vec!["A", "B"]);
        assert_eq!(reopened.peek_front().unwrap().id(), a.id());
    }

    #[test]
    fn release_in_flight_restores_head() {
        let (_, mut q) = queue();
        q.enqueue(mutation("A")).unwrap();
        q.enqueue(mutation("B")).unwrap();
        let a = q.pop_front().unwrap().unwrap();

        assert_eq!(q.release_in_flight(), Some(a.id()));
        assert_eq!(q.release_in_flight(), None);
        assert_eq!(codes(&q), vec!["A", "B"]);
        assert_eq!(q.pop_front().unwrap().unwrap().id(), a.id());
    }

    #[test]
    fn acknowledge_ignores_unknown_ids() {
        let (_, mut q) = queue();
        q.enqueue(mutation("A")).unwrap();
        assert!(!q.acknowledge(Uuid::new_v4()).unwrap());
        let a = q.pop_front().unwrap().unwrap();
        assert!(!q.acknowledge(Uuid::new_v4()).unwrap());
        assert!(q.acknowledge(a.id()).unwrap());
    }

    #[test]
    fn remove_by_id_and_clear() {
        let (kv, mut q) = queue();
        let b = mutation("B");
        let b_id = b.id();
        q.enqueue(mutation("A")).unwrap();
        q.enqueue(b).unwrap();
        q.enqueue(mutation("C")).unwrap();

        assert!(q.remove_by_id(b_id).unwrap());
        assert!(!q.remove_by_id(b_id).unwrap());
        assert_eq!(codes(&q), vec!["A", "C"]);

        assert_eq!(q.clear().unwrap(), 2);
        assert!(kv
            .get(QUEUE_COLLECTION, &MutationQueue::storage_key("products"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn stats_report_oldest() {
        let (_, mut q) = queue();
        assert_eq!(q.stats(), QueueStats::default());
        let a = mutation("A");
        let at = a.enqueued_at_ms();
        q.enqueue(a).unwrap();
        q.enqueue(mutation("B")).unwrap();
        q.pop_front().unwrap();

        let stats = q.stats();
        assert_eq!(stats.len, 2);
        assert_eq!(stats.oldest_enqueued_at_ms, Some(at));
        assert!(stats.in_flight);
    }

    /// Backend whose writes can be made to fail.
    struct FlakyKv {
        inner: InMemoryKv,
        fail: AtomicBool,
    }

    impl FlakyKv {
        fn check(&self) -> StorageResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                Err(StorageError::Io(std::io::Error::other("disk full")))
            } else {
                Ok(())
            }
        }
    }

    impl KeyValueStore for FlakyKv {
        fn get(&self, c: &str, k: &str) -> StorageResult<Option<Vec<u8>>> {
            self.inner.get(c, k)
        }
        fn put(&self, c: &str, k: &str, v: &[u8]) -> StorageResult<()> {
            self.check()?;
            self.inner.put(c, k, v)
        }
        fn delete(&self, c: &str, k: &str) -> StorageResult<bool> {
            self.check()?;
            self.inner.delete(c, k)
        }
        fn scan(&self, c: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
            self.inner.scan(c)
        }
        fn clear(&self, c: &str) -> StorageResult<usize> {
            self.check()?;
            self.inner.clear(c)
        }
        fn collections(&self) -> StorageResult<Vec<String>> {
            self.inner.collections()
        }
        fn flush(&self) -> StorageResult<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_persist_rolls_back() {
        let kv = Arc::new(FlakyKv {
            inner: InMemoryKv::new(),
            fail: AtomicBool::new(false),
        });
        let mut q = MutationQueue::open(kv.clone(), "products").unwrap();
        q.enqueue(mutation("A")).unwrap();

        kv.fail.store(true, Ordering::SeqCst);
        assert!(q.enqueue(mutation("B")).is_err());
        assert_eq!(codes(&q), vec!["A"]);

        assert!(q.pop_front().is_err());
        assert!(!q.has_in_flight());

        kv.fail.store(false, Ordering::SeqCst);
        let a = q.pop_front().unwrap().unwrap();
        kv.fail.store(true, Ordering::SeqCst);
        assert!(q.acknowledge(a.id()).is_err());
        assert!(q.has_in_flight());
        assert!(q.requeue_front(a).is_err());
        assert!(q.has_in_flight());
    }
}
