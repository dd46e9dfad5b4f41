//! Mutations: pending remote writes.

use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A pending write of one record to the remote backend.
///
/// A mutation is created once and never modified. A failed delivery puts
/// the same value, with the same id, back at the head of its queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    id: Uuid,
    domain: String,
    scope_id: Option<String>,
    record: Record,
    enqueued_at_ms: u64,
}

impl Mutation {
    /// Creates a mutation stamped with a fresh id and the current time.
    ///
    /// An empty scope id is treated as missing.
    pub fn new(domain: impl Into<String>, record: Record, scope_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            domain: domain.into(),
            scope_id: scope_id.filter(|s| !s.is_empty()),
            record,
            enqueued_at_ms: now_ms(),
        }
    }

    /// Unique mutation id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Domain of the record.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Scope (tenant or area) id, if any.
    #[must_use]
    pub fn scope_id(&self) -> Option<&str> {
        self.scope_id.as_deref().filter(|s| !s.is_empty())
    }

    /// Returns true if the mutation carries a non-empty scope id.
    #[must_use]
    pub fn has_scope(&self) -> bool {
        self.scope_id().is_some()
    }

    /// Record snapshot to send.
    #[must_use]
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// When the mutation was created, in epoch milliseconds.
    #[must_use]
    pub fn enqueued_at_ms(&self) -> u64 {
        self.enqueued_at_ms
    }
}

/// Why a mutation was not enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No scope id was available.
    ScopeMissing,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ScopeMissing => write!(f, "scope id missing"),
        }
    }
}

/// Result of offering a mutation to a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The mutation was appended and persisted.
    Enqueued(Uuid),
    /// The mutation was discarded; the queue is unchanged.
    Dropped(DropReason),
}

impl EnqueueOutcome {
    /// Returns true if the mutation was enqueued.
    #[must_use]
    pub fn is_enqueued(&self) -> bool {
        matches!(self, Self::Enqueued(_))
    }
}

/// How a local record is turned into the record that is sent upstream.
///
/// Local-only attributes are stripped and the scope attribute is stamped
/// when the record lacks one. The local copy is never touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPolicy {
    /// Attribute carrying the scope id on the remote side.
    pub scope_field: String,
    /// Attributes that only make sense locally.
    pub local_only_fields: Vec<String>,
}

impl Default for OutboundPolicy {
    fn default() -> Self {
        Self {
            scope_field: "area_id".to_string(),
            local_only_fields: vec![
                "areaName".to_string(),
                "is_temp_id".to_string(),
                "_localTimestamp".to_string(),
            ],
        }
    }
}

impl OutboundPolicy {
    /// Sets the scope attribute name.
    #[must_use]
    pub fn with_scope_field(mut self, field: impl Into<String>) -> Self {
        self.scope_field = field.into();
        self
    }

    /// Adds a local-only attribute.
    #[must_use]
    pub fn with_local_only(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        if !self.local_only_fields.contains(&field) {
            self.local_only_fields.push(field);
        }
        self
    }

    /// Builds the outbound copy of `record`.
    #[must_use]
    pub fn prepare(&self, record: &Record, scope_id: Option<&str>) -> Record {
        let mut outbound = record.clone();
        for field in &self.local_only_fields {
            outbound.remove(field);
        }
        let has_scope = outbound
            .get(&self.scope_field)
            .is_some_and(|v| !v.is_null() && v.as_str() != Some(""));
        if !has_scope {
            if let Some(scope) = scope_id.filter(|s| !s.is_empty()) {
                outbound.insert(self.scope_field.clone(), scope);
            }
        }
        outbound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_scope_is_missing() {
        let record = Record::new().with("code", "X1");
        assert!(!Mutation::new("products", record.clone(), Some(String::new())).has_scope());
        assert!(!Mutation::new("products", record.clone(), None).has_scope());

        let m = Mutation::new("products", record, Some("area1".into()));
        assert_eq!(m.scope_id(), Some("area1"));
        assert_eq!(m.domain(), "products");
    }

    #[test]
    fn ids_are_unique() {
        let record = Record::new().with("code", "X1");
        let a = Mutation::new("products", record.clone(), None);
        let b = Mutation::new("products", record, None);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn prepare_strips_and_stamps() {
        let policy = OutboundPolicy::default();
        let local = Record::new()
            .with("code", "X1")
            .with("areaName", "North")
            .with("is_temp_id", true)
            .with("_localTimestamp", 17);

        let outbound = policy.prepare(&local, Some("area1"));
        assert_eq!(
            outbound.into_value(),
            json!({"code": "X1", "area_id": "area1"})
        );
        assert!(local.contains("areaName"));
    }

    #[test]
    fn prepare_keeps_existing_scope() {
        let policy = OutboundPolicy::default().with_scope_field("tenant");
        let local = Record::new().with("code", "X1").with("tenant", "t9");

        let outbound = policy.prepare(&local, Some("t1"));
        assert_eq!(outbound.get("tenant"), Some(&json!("t9")));

        let bare = policy.prepare(&Record::new().with("code", "X2"), None);
        assert!(!bare.contains("tenant"));
    }
}
