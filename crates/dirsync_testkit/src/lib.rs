//! # dirsync Testkit
//!
//! Test utilities for dirsync.
//!
//! This crate provides:
//! - Wired local/remote directory fixtures with a live changelog feed
//! - Temp checkpoint-file helpers
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dirsync_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_topology() {
//!     let topo = TestTopology::standard();
//!     topo.seed_remote("cn=alice, o=remote", &[("uid", "alice")]);
//!     // ... drive the replication engine against topo
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
