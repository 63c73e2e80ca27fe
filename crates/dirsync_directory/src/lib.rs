//! # dirsync Directory
//!
//! An in-memory directory server for validating the replication engine.
//!
//! This crate provides:
//! - `MemoryDirectory`: a DN-keyed entry tree with search/add/modify/delete
//! - `MemoryChangelog`: an append-only change feed with monotonic change
//!   numbers and resumable, DN-scoped subscriptions
//!
//! The server speaks no wire protocol; callers hold it directly. It reports
//! failures with the same result codes a protocol client would surface, so
//! the engine exercises its real error paths against it.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod feed;
mod store;

pub use feed::{ChangelogSubscription, FeedEvent, MemoryChangelog};
pub use store::MemoryDirectory;
