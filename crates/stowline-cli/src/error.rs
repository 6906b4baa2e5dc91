use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] stowline_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Identifier cannot be empty")]
    EmptyIdentifier,
    #[error("No {kind} found for id/prefix: {query}")]
    NotFound { kind: &'static str, query: String },
    #[error("{0}")]
    AmbiguousId(String),
    #[error("No account scope. Pass --account or run `stowline context set --account <ID>`.")]
    MissingScope,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Backend is not configured. Run `stowline config init --base-url <URL> \
         --api-key <KEY>` or set STOWLINE_BACKEND_URL and STOWLINE_API_KEY."
    )]
    BackendNotConfigured,
}
