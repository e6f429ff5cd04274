//! Common error types for FRAS
//!
//! One taxonomy shared by the storage layer and the reconciliation engine.
//! Read paths treat `NotFound` as an empty result; everything else is
//! surfaced to the caller.

use thiserror::Error;

/// Common result type for FRAS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across FRAS components
#[derive(Error, Debug)]
pub enum Error {
    /// Storage access denied or revoked
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Requested partition, file, or container does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A write could not complete; prior content is intact
    #[error("Storage error: {0}")]
    Storage(String),

    /// An external roster, readiness, capture, or save call failed
    #[error("Network error: {0}")]
    Network(String),

    /// Operation attempted without its required preconditions
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Partition text could not be decoded against its schema
    #[error("Codec error: {0}")]
    Codec(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation error outside the storage boundary
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Re-classify an I/O failure raised while touching `what`
    ///
    /// Used at the handle boundary so callers only ever see the storage
    /// taxonomy, never raw `io::Error`.
    pub fn from_io(err: std::io::Error, what: impl std::fmt::Display) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(what.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                Error::Permission(format!("{}: {}", what, err))
            }
            _ => Error::Storage(format!("{}: {}", what, err)),
        }
    }

    /// True for the "absent" outcome that read paths absorb
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(err.to_string())
    }
}
