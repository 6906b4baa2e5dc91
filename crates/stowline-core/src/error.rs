//! Error types for stowline-core

use thiserror::Error;

use crate::backend::BackendError;

/// Result type alias using stowline-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in stowline-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local store was used before `init` completed
    #[error("Local store is not initialized")]
    NotInitialized,

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Media write rejected because it would exceed the storage quota
    #[error("Media quota exceeded: {usage} bytes used + {requested} requested > {quota} quota")]
    QuotaExceeded {
        usage: u64,
        requested: u64,
        quota: u64,
    },

    /// Backend call failed
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Conflict needs an explicit local/server/merge choice
    #[error("Conflict {0} requires a manual resolution choice")]
    ManualResolutionRequired(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error comes from a store that has not been opened yet.
    pub const fn is_not_initialized(&self) -> bool {
        matches!(self, Self::NotInitialized)
    }
}
