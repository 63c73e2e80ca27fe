//! # dirsync Engine
//!
//! Changelog-driven directory replication.
//!
//! This crate provides:
//! - Ordered changelog consumption with durable, crash-resumable checkpoints
//! - Per-entry handler chains for add/modify/delete convergence
//! - Bounded connection pools with RAII release
//! - A bounded entry queue serializing chain execution
//! - The replicator driving all of the above
//!
//! ## Architecture
//!
//! A producer thread drains the remote changelog subscription into a bounded
//! queue; a single worker thread pops one entry at a time and runs the
//! handler chain matching the entry's operation. The checkpoint is written
//! only after a chain applies its mutation, so a restart resumes strictly
//! after the last durably-applied change.
//!
//! ## Key Invariants
//!
//! - Entries are applied in non-decreasing change-number order
//! - The checkpoint never advances past an unapplied change
//! - Entries at or below the checkpoint are never reprocessed
//! - Every pooled connection is returned on every exit path

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod chain;
mod checkpoint;
mod config;
mod directory;
mod error;
mod handlers;
mod pool;
mod queue;
mod replicator;

pub use chain::{ChainOutcome, ChainSet, Flow, Handler, HandlerChain, ReplicationContext, ReplicatorEnv};
pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use config::{DirectoryUrl, PoolConfig, ReplConfig, RetryConfig};
pub use directory::{
    ChangelogSource, ChangelogStream, Directory, DirectoryConnector, MockCall, MockChangelogSource,
    MockDirectory, StreamEvent,
};
pub use error::{ReplError, ReplResult};
pub use pool::{ConnectionPool, PooledConnection};
pub use queue::{entry_queue, EntryProducer, EntryQueue, QueueEvent, TryEnqueueError};
pub use replicator::{ReplicationStats, Replicator};
