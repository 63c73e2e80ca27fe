//! Error types for the replication engine.

use dirsync_model::{DirectoryError, DnError, FilterParseError};
use thiserror::Error;

/// Result type for replication operations.
pub type ReplResult<T> = Result<T, ReplError>;

/// Errors that can occur during a replication run.
///
/// Apart from the expected conditions the handlers absorb themselves
/// (no-such-object probes, filter mismatches), every error here is fatal to
/// the run: the replicator stops with the checkpoint at its last durable
/// value and a restart resumes from there.
#[derive(Error, Debug)]
pub enum ReplError {
    /// A directory operation failed.
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// The checkpoint store failed to read or write.
    #[error("checkpoint store error: {0}")]
    Checkpoint(String),

    /// A checkpoint write would move the marker backwards.
    #[error("checkpoint would regress from {current} to {requested}")]
    CheckpointRegression {
        /// The currently recorded change number.
        current: u64,
        /// The rejected, lower change number.
        requested: u64,
    },

    /// No pooled connection became available within the acquire timeout.
    #[error("connection pool for {target} exhausted after {waited_ms} ms")]
    PoolExhausted {
        /// The pool's directory label.
        target: String,
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// Establishing a directory connection failed after the retry budget.
    #[error("unable to connect to {target} after {attempts} attempts: {message}")]
    ConnectFailed {
        /// The directory label.
        target: String,
        /// Connection attempts made.
        attempts: u32,
        /// Last underlying failure.
        message: String,
    },

    /// An entry exists by DN but a catch-all search returned nothing.
    #[error("{dn} exists but did not match the catch-all filter")]
    InvariantViolation {
        /// The DN that triggered the violation.
        dn: String,
    },

    /// The changelog subscription failed and could not be re-established.
    #[error("changelog subscription error: {0}")]
    Subscription(String),

    /// The entry queue was closed while entries remained.
    #[error("entry queue closed")]
    QueueClosed,

    /// The configuration was rejected.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A directory URL could not be parsed.
    #[error("invalid directory URL {url:?}: {message}")]
    Url {
        /// The offending URL string.
        url: String,
        /// What was wrong with it.
        message: String,
    },

    /// A filter expression could not be parsed.
    #[error("invalid filter: {0}")]
    Filter(#[from] FilterParseError),

    /// A DN could not be parsed.
    #[error("invalid DN: {0}")]
    Dn(#[from] DnError),

    /// A handler observed state that only a pipeline bug can produce.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReplError {
    /// Creates a checkpoint store error.
    pub fn checkpoint(message: impl Into<String>) -> Self {
        Self::Checkpoint(message.into())
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an internal pipeline error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_error_converts() {
        let err: ReplError = DirectoryError::no_such_object("cn=x, o=y").into();
        assert!(matches!(err, ReplError::Directory(_)));
    }

    #[test]
    fn error_display() {
        let err = ReplError::PoolExhausted {
            target: "local".into(),
            waited_ms: 5000,
        };
        assert_eq!(
            err.to_string(),
            "connection pool for local exhausted after 5000 ms"
        );

        let err = ReplError::CheckpointRegression {
            current: 10,
            requested: 7,
        };
        assert!(err.to_string().contains("10"));
        assert!(err.to_string().contains("7"));
    }
}
