//! Engine lifecycle state and statistics.

use stocksync_core::QueueStats;

/// The lifecycle state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// Created, not started.
    Uninitialized,
    /// Opening domains and subscribing.
    Initializing,
    /// Accepting writes and syncing.
    Ready,
    /// A domain failed to open; the engine is unusable until restarted.
    Degraded,
    /// Shutdown in progress; no new triggers are accepted.
    ShuttingDown,
    /// Shut down.
    Stopped,
}

impl EngineState {
    /// Returns true if the engine accepts writes and triggers.
    pub fn is_ready(&self) -> bool {
        matches!(self, EngineState::Ready)
    }

    /// Returns true if `next` is a legal transition from this state.
    pub fn can_transition_to(&self, next: EngineState) -> bool {
        use EngineState::*;
        matches!(
            (self, next),
            (Uninitialized, Initializing)
                | (Initializing, Ready)
                | (Initializing, Degraded)
                | (Degraded, Initializing)
                | (Uninitialized | Ready | Degraded, ShuttingDown)
                | (ShuttingDown, Stopped)
        )
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Initializing => "initializing",
            EngineState::Ready => "ready",
            EngineState::Degraded => "degraded",
            EngineState::ShuttingDown => "shutting down",
            EngineState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Statistics about one synced domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainStats {
    /// Domain name.
    pub domain: String,
    /// Queue statistics.
    pub queue: QueueStats,
    /// Whether the remote change feed is active.
    pub subscribed: bool,
    /// End of the last drain cycle that neither failed nor stopped early for
    /// being offline, in epoch milliseconds.
    pub last_drain_ms: Option<u64>,
    /// Mutations delivered since the engine started.
    pub delivered: u64,
    /// Remote changes applied since the engine started.
    pub applied: u64,
}

/// Statistics about the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
    /// Lifecycle state.
    pub state: EngineState,
    /// Current connectivity.
    pub online: bool,
    /// Per-domain statistics, sorted by domain name.
    pub domains: Vec<DomainStats>,
}

impl SyncStats {
    /// Pending mutations across all domains.
    pub fn pending_total(&self) -> usize {
        self.domains.iter().map(|d| d.queue.len).sum()
    }

    /// Returns the statistics of one domain.
    pub fn domain(&self, name: &str) -> Option<&DomainStats> {
        self.domains.iter().find(|d| d.domain == name)
    }
}
