//! Checkpoint command implementation.

use super::CliError;
use dirsync_engine::{CheckpointStore, FileCheckpointStore};
use serde::Serialize;
use std::path::Path;

/// Checkpoint inspection result.
#[derive(Debug, Serialize)]
struct CheckpointView {
    /// Checkpoint file path.
    path: String,
    /// Recorded change number, absent on a first run.
    change_number: Option<u64>,
}

/// Runs the checkpoint show command.
pub fn show(path: &Path, format: &str) -> Result<(), CliError> {
    let store = FileCheckpointStore::open(path)?;
    let view = CheckpointView {
        path: path.display().to_string(),
        change_number: store.read()?,
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&view)?),
        _ => match view.change_number {
            Some(n) => println!("checkpoint at change number {n}"),
            None => println!("no checkpoint recorded"),
        },
    }

    Ok(())
}

/// Runs the checkpoint reset command.
///
/// Removes the file, then rewrites it when a target change number is given;
/// removing first sidesteps the store's monotonicity guard, which would
/// reject a lower value.
pub fn reset(path: &Path, to: Option<u64>) -> Result<(), CliError> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }

    match to {
        Some(n) => {
            let store = FileCheckpointStore::open(path)?;
            store.write(n)?;
            println!("checkpoint reset to change number {n}");
        }
        None => println!("checkpoint cleared"),
    }

    Ok(())
}
