//! Configuration for the sync engine.

use std::time::Duration;
use stocksync_core::{DomainSchema, OutboundPolicy};

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Domains to store locally and keep in sync.
    pub domains: Vec<DomainSchema>,
    /// How local records are prepared before being sent upstream.
    pub outbound: OutboundPolicy,
    /// Period of the automatic drain timer; `None` disables it.
    pub drain_interval: Option<Duration>,
    /// How long shutdown waits for in-flight drains before abandoning them.
    pub shutdown_timeout: Duration,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Whether the engine starts out assuming it is online.
    pub initially_online: bool,
}

impl SyncConfig {
    /// Creates a configuration with no domains.
    pub fn new() -> Self {
        Self {
            domains: Vec::new(),
            outbound: OutboundPolicy::default(),
            drain_interval: None,
            shutdown_timeout: Duration::from_secs(10),
            event_capacity: 256,
            initially_online: false,
        }
    }

    /// Adds a domain. A later schema with the same name replaces the earlier one.
    pub fn with_domain(mut self, schema: DomainSchema) -> Self {
        self.domains.retain(|d| d.name != schema.name);
        self.domains.push(schema);
        self
    }

    /// Sets the outbound policy.
    pub fn with_outbound(mut self, outbound: OutboundPolicy) -> Self {
        self.outbound = outbound;
        self
    }

    /// Enables the periodic drain timer.
    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = Some(interval);
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the event channel capacity (at least 1).
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Sets the initial connectivity assumption.
    pub fn with_initially_online(mut self, online: bool) -> Self {
        self.initially_online = online;
        self
    }

    /// Returns the schema of a configured domain.
    pub fn domain(&self, name: &str) -> Option<&DomainSchema> {
        self.domains.iter().find(|d| d.name == name)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
