//! Remote-origin change events.
//!
//! A [`ChangeEvent`] is what a remote subscription delivers: one record of
//! one domain was inserted, updated or deleted on the server. Applying it to
//! the [`LocalStore`](crate::LocalStore) is idempotent: inserts and updates
//! become a `put` of the new state, deletes become a `delete` by key.

use crate::record::Record;
use serde::{Deserialize, Serialize};

/// Type of change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Record was created remotely.
    Insert,
    /// Record was modified remotely.
    Update,
    /// Record was removed remotely.
    Delete,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A single remote change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Domain the record belongs to.
    pub domain: String,
    /// Type of change.
    pub change_type: ChangeType,
    /// Previous state. Required for deletes, optional otherwise.
    pub before: Option<Record>,
    /// New state. Required for inserts and updates, `None` for deletes.
    pub after: Option<Record>,
}

impl ChangeEvent {
    /// Creates an insert event.
    pub fn insert(domain: impl Into<String>, after: Record) -> Self {
        Self {
            domain: domain.into(),
            change_type: ChangeType::Insert,
            before: None,
            after: Some(after),
        }
    }

    /// Creates an update event.
    pub fn update(domain: impl Into<String>, before: Option<Record>, after: Record) -> Self {
        Self {
            domain: domain.into(),
            change_type: ChangeType::Update,
            before,
            after: Some(after),
        }
    }

    /// Creates a delete event.
    pub fn delete(domain: impl Into<String>, before: Record) -> Self {
        Self {
            domain: domain.into(),
            change_type: ChangeType::Delete,
            before: Some(before),
            after: None,
        }
    }

    /// The record state that identifies the change.
    ///
    /// `after` for inserts and updates; `before` for deletes, falling back
    /// to `after` when a server sends the deleted state there.
    #[must_use]
    pub fn subject(&self) -> Option<&Record> {
        match self.change_type {
            ChangeType::Insert | ChangeType::Update => self.after.as_ref(),
            ChangeType::Delete => self.before.as_ref().or(self.after.as_ref()),
        }
    }
}
