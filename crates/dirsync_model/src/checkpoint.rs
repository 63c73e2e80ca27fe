//! Checkpoint records.

use serde::{Deserialize, Serialize};

/// Durable record of the last change number fully applied locally.
///
/// On restart the changelog subscription resumes strictly after
/// `change_number`; entries at or below it are never reprocessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The last fully-applied change number.
    pub change_number: u64,
    /// Write time, milliseconds since the Unix epoch.
    pub written_at_ms: u64,
}

impl Checkpoint {
    /// Creates a checkpoint record.
    pub fn new(change_number: u64, written_at_ms: u64) -> Self {
        Self {
            change_number,
            written_at_ms,
        }
    }
}
