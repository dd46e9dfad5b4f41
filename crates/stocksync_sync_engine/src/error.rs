//! Error types for the sync engine.

use stocksync_core::CoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No scope id is available for a mutation or subscription.
    #[error("scope id missing for domain {domain}")]
    ScopeMissing {
        /// Domain of the rejected operation.
        domain: String,
    },

    /// The remote backend could not be reached or refused the call.
    #[error("remote unavailable: {message}")]
    RemoteUnavailable {
        /// Error message.
        message: String,
        /// Whether trying again later may succeed.
        retryable: bool,
    },

    /// A domain's local schema could not be created or upgraded.
    #[error("schema upgrade failed for domain {domain}: {source}")]
    SchemaUpgradeFailed {
        /// Domain being opened.
        domain: String,
        /// Underlying store error.
        #[source]
        source: CoreError,
    },

    /// A remote change subscription dropped.
    #[error("subscription lost for domain {domain}")]
    SubscriptionLost {
        /// Domain of the subscription.
        domain: String,
    },

    /// Local store or queue error.
    #[error("store error: {0}")]
    Store(#[from] CoreError),

    /// The domain is not configured on this engine.
    #[error("unknown domain: {0}")]
    UnknownDomain(String),

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// The engine has not been started, or is degraded.
    #[error("engine not ready (state {0})")]
    NotReady(String),

    /// The operation was abandoned because the engine is shutting down.
    #[error("sync cancelled")]
    Cancelled,

    /// Timeout.
    #[error("operation timed out")]
    Timeout,
}

impl SyncError {
    /// Creates a retryable remote error.
    pub fn remote_retryable(message: impl Into<String>) -> Self {
        Self::RemoteUnavailable {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable remote error, e.g. a validation rejection.
    pub fn remote_fatal(message: impl Into<String>) -> Self {
        Self::RemoteUnavailable {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    ///
    /// This is informational. The push worker treats every failure the same
    /// way: the mutation goes back to the head and the cycle stops.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::RemoteUnavailable { retryable, .. } => *retryable,
            SyncError::SubscriptionLost { .. } | SyncError::Timeout => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::remote_retryable("connection lost").is_retryable());
        assert!(!SyncError::remote_fatal("validation failed").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::SubscriptionLost {
            domain: "products".into()
        }
        .is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::ScopeMissing {
            domain: "products".into()
        }
        .is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::remote_retryable("503");
        assert_eq!(err.to_string(), "remote unavailable: 503");

        let err = SyncError::SchemaUpgradeFailed {
            domain: "inventory".into(),
            source: CoreError::schema_upgrade("inventory", "downgrade"),
        };
        assert!(err.to_string().contains("inventory"));
        assert!(err.to_string().contains("downgrade"));
    }
}
