//! Error types for beenthere-core
//!
//! Failures are split along the system's fault lines: local persistence
//! (`StorageError`), the remote record API (`RemoteError`), and input
//! checks performed before any write (`ValidationError`). The umbrella
//! [`Error`] adds the one cross-cutting case: a remote operation was
//! attempted without a signed-in session.

use thiserror::Error;

use crate::models::CountryCode;

/// Result type alias defaulting to the crate-level [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Local persistence faults (database unavailable, quota, corruption)
#[derive(Error, Debug)]
pub enum StorageError {
    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row could not be decoded back into a model
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Remote record API faults (network, server error, bad payload)
#[derive(Error, Debug)]
pub enum RemoteError {
    /// HTTP transport failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status
    #[error("Remote API error: {0}")]
    Api(String),

    /// A record the operation depends on does not exist
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Response body did not match the expected shape
    #[error("Invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Pre-write input checks; these block a mutation entirely
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Code is not in the country catalog
    #[error("Unknown country code: {0}")]
    UnknownCode(String),

    /// Selecting the current homeland is rejected
    #[error("{0} is the current homeland and cannot be marked visited")]
    HomelandConflict(CountryCode),

    /// Free-form invalid input (empty user id, malformed URL, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Errors that can occur in beenthere-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local store fault; non-fatal for the UI, the caller may retry
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Remote store fault; never retried implicitly
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A remote operation requires a signed-in session
    #[error("Authentication required")]
    AuthRequired,

    /// Input rejected before any write happened
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl From<libsql::Error> for Error {
    fn from(err: libsql::Error) -> Self {
        Self::Storage(StorageError::LibSql(err))
    }
}
