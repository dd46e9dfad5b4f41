//! # stocksync storage
//!
//! Key-value storage backends for stocksync.
//!
//! This crate provides the lowest-level persistence abstraction used by the
//! local record store and the mutation queue. Backends are **opaque byte
//! stores** organised in named collections: they do not interpret the values
//! they hold.
//!
//! ## Design Principles
//!
//! - Collections are flat maps from `String` keys to byte values
//! - Every call is atomic on its own; there are no multi-call transactions
//! - No knowledge of records, schemas or queues
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`InMemoryKv`] - For testing and ephemeral storage
//! - [`FileKv`] - For persistent storage in a locked data directory
//!
//! ## Example
//!
//! ```rust
//! use stocksync_storage::{InMemoryKv, KeyValueStore};
//!
//! let kv = InMemoryKv::new();
//! kv.put("products", "P1", b"hello").unwrap();
//! assert_eq!(kv.get("products", "P1").unwrap().as_deref(), Some(&b"hello"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod kv;
mod memory;

pub use error::{StorageError, StorageResult};
pub use file::FileKv;
pub use kv::{validate_collection_name, KeyValueStore};
pub use memory::InMemoryKv;
