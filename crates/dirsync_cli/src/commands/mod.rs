//! CLI command implementations.

pub mod checkpoint;
pub mod run;

use dirsync_engine::ReplError;
use dirsync_model::DirectoryError;
use thiserror::Error;

/// Errors surfaced by CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    /// The replication run failed or could not be configured.
    #[error("{0}")]
    Replication(#[from] ReplError),

    /// A directory operation failed while seeding.
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// The configuration file was unusable.
    #[error("config error: {0}")]
    Config(String),

    /// Filesystem access failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
