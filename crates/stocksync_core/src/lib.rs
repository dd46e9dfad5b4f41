//! # stocksync core
//!
//! Local, offline-usable state for stocksync.
//!
//! This crate provides:
//! - [`Record`] - a domain entity addressed by a natural key
//! - [`LocalStore`] - per-domain record collections with secondary indices
//! - [`MutationQueue`] - a durable, ordered queue of pending remote writes
//! - [`ChangeEvent`] - the shape of remote-origin changes
//!
//! Everything is persisted through a [`stocksync_storage::KeyValueStore`],
//! so the same code runs against the in-memory backend in tests and the
//! file backend in production.
//!
//! ## Key Invariants
//!
//! - A record's key is unique within its domain
//! - `put`/`delete` are atomic per call and keep indices consistent
//! - Opening a domain twice with the same schema is a no-op
//! - A mutation is never edited after creation; a failed delivery puts the
//!   same mutation back at the head of its queue
//! - Every structural queue change is persisted before it returns

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod codec;
mod error;
mod index;
mod mutation;
mod queue;
mod record;
mod schema;
mod store;

pub use change::{ChangeEvent, ChangeType};
pub use codec::{from_cbor, to_cbor};
pub use error::{CoreError, CoreResult};
pub use mutation::{now_ms, DropReason, EnqueueOutcome, Mutation, OutboundPolicy};
pub use queue::{MutationQueue, QueueStats, QUEUE_COLLECTION};
pub use record::Record;
pub use schema::{DomainSchema, SchemaChange, SCHEMA_COLLECTION};
pub use store::LocalStore;

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
