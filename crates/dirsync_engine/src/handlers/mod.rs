//! Operation handler sets.
//!
//! The add, modify and delete chains share a common prefix (checkpoint
//! guard, DN translation) and suffix (checkpoint write); the middle steps
//! carry the per-operation convergence logic.

mod add;
mod common;
mod delete;
mod modify;

pub use add::ApplyAdd;
pub use common::{CheckpointGuard, LocalProbe, TranslateDn, WriteCheckpoint};
pub use delete::{DetermineDelete, LocalSearch};
pub use modify::ApplyModify;
