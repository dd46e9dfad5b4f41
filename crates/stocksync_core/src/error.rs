//! Error types for stocksync core.

use thiserror::Error;
use uuid::Uuid;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in local store and queue operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] stocksync_storage::StorageError),

    /// CBOR encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The domain was never opened, or has been closed.
    #[error("domain not open: {domain}")]
    DomainNotOpen {
        /// Name of the domain.
        domain: String,
    },

    /// The domain has no index with that name.
    #[error("unknown index {index} on domain {domain}")]
    UnknownIndex {
        /// Name of the domain.
        domain: String,
        /// Name of the index.
        index: String,
    },

    /// A record cannot be stored in the domain.
    #[error("invalid record for domain {domain}: {message}")]
    InvalidRecord {
        /// Name of the domain.
        domain: String,
        /// Why the record was rejected.
        message: String,
    },

    /// The domain schema could not be created or upgraded.
    #[error("schema upgrade failed for domain {domain}: {message}")]
    SchemaUpgradeFailed {
        /// Name of the domain.
        domain: String,
        /// Description of the failure.
        message: String,
    },

    /// A mutation is already being delivered from this queue.
    #[error("mutation {in_flight} of domain {domain} is already in flight")]
    DeliveryInProgress {
        /// Name of the domain.
        domain: String,
        /// The mutation currently in flight.
        in_flight: Uuid,
    },

    /// A mutation does not belong to this queue's domain.
    #[error("mutation for domain {actual} offered to queue of domain {expected}")]
    DomainMismatch {
        /// Domain of the queue.
        expected: String,
        /// Domain carried by the mutation.
        actual: String,
    },
}

impl CoreError {
    /// Creates an invalid record error.
    pub fn invalid_record(domain: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            domain: domain.into(),
            message: message.into(),
        }
    }

    /// Creates a schema upgrade error.
    pub fn schema_upgrade(domain: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaUpgradeFailed {
            domain: domain.into(),
            message: message.into(),
        }
    }

    /// Creates a domain-not-open error.
    pub fn domain_not_open(domain: impl Into<String>) -> Self {
        Self::DomainNotOpen {
            domain: domain.into(),
        }
    }
}
