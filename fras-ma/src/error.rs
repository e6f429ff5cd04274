//! Error types for fras-ma
//!
//! Service-level failures (configuration). Domain failures
//! from storage and the engine are [`fras_common::Error`] and pass through
//! the `Common` variant.

use thiserror::Error;

/// Main error type for the fras-ma service
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage, engine, and collaborator errors
    #[error(transparent)]
    Common(#[from] fras_common::Error),
}

/// Convenience Result type using the fras-ma Error
pub type Result<T> = std::result::Result<T, Error>;
