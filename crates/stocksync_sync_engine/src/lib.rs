//! # stocksync sync engine
//!
//! Offline-first synchronization of local domain records with a remote
//! backend.
//!
//! This crate provides:
//! - [`SyncEngine`] - the coordinator (lifecycle, connectivity, workers)
//! - Push sync - per-domain FIFO delivery of queued mutations
//! - Pull sync - remote-authoritative application of change feeds
//! - [`RemoteBackend`], [`ScopeProvider`], [`Notifier`] - the collaborator
//!   interfaces the engine runs against
//!
//! ## Architecture
//!
//! ```text
//!  write ──► LocalStore ──► MutationQueue ──► push worker ──► RemoteBackend::upsert
//!                ▲                                                   │
//!                └──────── pull handler ◄── EventSink ◄── RemoteBackend::subscribe
//! ```
//!
//! ## Key Invariants
//!
//! - Within a domain, the remote never observes a mutation before one that
//!   was enqueued earlier, across any number of failures and retries
//! - At most one upsert per domain is in flight
//! - A failed upsert leaves the queue exactly as it was before the cycle
//!   started, minus what was already delivered
//! - Applying a remote change twice is the same as applying it once
//! - Push and pull errors never escape their task; they surface as
//!   [`SyncEvent`]s and [`Notifier`] calls

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod domain;
mod engine;
mod error;
mod events;
mod pull;
mod push;
mod remote;
mod state;

pub use config::SyncConfig;
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use events::SyncEvent;
pub use pull::apply_change;
pub use push::DrainReport;
pub use remote::{
    Ack, EventSink, NoopNotifier, Notifier, RemoteBackend, ScopeFilter, ScopeProvider,
    StaticScope, SubscriptionHandle, SyncOutcome,
};
pub use state::{DomainStats, EngineState, SyncStats};
