//! # stocksync Testkit
//!
//! Test utilities for stocksync.
//!
//! This crate provides:
//! - [`MockRemote`] - an in-memory remote backend with failure injection
//! - Test fixtures: temporary backends, schemas, a wired-up engine
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stocksync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn drains_after_reconnect() {
//!     let env = TestEnv::memory();
//!     let t = TestEngine::new(test_config(), env.kv.clone());
//!     t.engine.start().await.unwrap();
//!     t.engine.write("products", product("X1", "Bolt")).unwrap();
//!     t.engine.set_online(true);
//!     t.engine.drain("products").await.unwrap();
//!     assert_eq!(t.remote.upserted_keys("products"), vec!["X1"]);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod remote;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::remote::*;
}

pub use fixtures::*;
pub use generators::*;
pub use remote::MockRemote;
