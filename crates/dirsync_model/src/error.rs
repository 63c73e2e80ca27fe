//! Directory result codes and errors.

use thiserror::Error;

/// LDAP-style result codes carried by directory errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    /// Operations error.
    OperationsError,
    /// Protocol error.
    ProtocolError,
    /// The target DN does not exist.
    NoSuchObject,
    /// The server is unavailable.
    Unavailable,
    /// The entry already exists.
    EntryAlreadyExists,
    /// Any other failure.
    Other,
}

impl ResultCode {
    /// Returns the numeric protocol code.
    pub fn code(&self) -> u16 {
        match self {
            ResultCode::OperationsError => 1,
            ResultCode::ProtocolError => 2,
            ResultCode::NoSuchObject => 32,
            ResultCode::Unavailable => 52,
            ResultCode::EntryAlreadyExists => 68,
            ResultCode::Other => 80,
        }
    }
}

/// Errors returned by directory operations.
///
/// `NoSuchObject` is the one code the replication pipeline treats as an
/// expected, non-fatal outcome; everything else escalates.
#[derive(Error, Debug, Clone)]
pub enum DirectoryError {
    /// The target DN does not exist (code 32).
    #[error("no such object: {dn}")]
    NoSuchObject {
        /// The DN that was not found.
        dn: String,
    },

    /// The entry already exists (code 68).
    #[error("entry already exists: {dn}")]
    EntryAlreadyExists {
        /// The DN that collided.
        dn: String,
    },

    /// The directory is unreachable or refusing service (code 52).
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    /// The connection failed or dropped mid-operation.
    #[error("connection error: {0}")]
    Connection(String),

    /// Any other protocol-level failure.
    #[error("protocol error (code {code}): {message}")]
    Protocol {
        /// The numeric result code reported by the server.
        code: u16,
        /// Server-provided diagnostic.
        message: String,
    },
}

impl DirectoryError {
    /// Creates a no-such-object error for a DN.
    pub fn no_such_object(dn: impl Into<String>) -> Self {
        Self::NoSuchObject { dn: dn.into() }
    }

    /// Creates an already-exists error for a DN.
    pub fn already_exists(dn: impl Into<String>) -> Self {
        Self::EntryAlreadyExists { dn: dn.into() }
    }

    /// Returns the protocol result code for this error.
    pub fn result_code(&self) -> u16 {
        match self {
            DirectoryError::NoSuchObject { .. } => ResultCode::NoSuchObject.code(),
            DirectoryError::EntryAlreadyExists { .. } => ResultCode::EntryAlreadyExists.code(),
            DirectoryError::Unavailable(_) => ResultCode::Unavailable.code(),
            DirectoryError::Connection(_) => ResultCode::Unavailable.code(),
            DirectoryError::Protocol { code, .. } => *code,
        }
    }

    /// Returns true for the expected no-such-object outcome.
    pub fn is_no_such_object(&self) -> bool {
        matches!(self, DirectoryError::NoSuchObject { .. })
    }
}
