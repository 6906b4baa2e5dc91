//! Backend entity API boundary.
//!
//! The engine talks to the relational backend only through [`Backend`]. Rows
//! travel in the backend's native snake_case naming; [`mapping`] translates
//! them to and from the typed local models field by field.

pub mod mapping;
pub mod memory;
pub mod rest;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{EntityData, EntityKind, Scope};

pub use memory::{BackendCall, CallAction, MemoryBackend};
pub use rest::{BackendConfig, RestBackend};

/// A backend row in its native column naming
pub type RemoteRow = Map<String, Value>;

/// Result type for backend calls
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Failures surfaced by a backend call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Network failure, timeout, or server-side error; worth retrying
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Validation or authorization rejection
    #[error("Backend rejected request: {0}")]
    Rejected(String),

    /// Stale version or concurrent write detected by the backend
    #[error("Backend version conflict: {0}")]
    VersionConflict(String),

    /// Remote record does not exist
    #[error("Remote record not found: {0}")]
    NotFound(String),

    /// Backend payload could not be decoded
    #[error("Invalid backend payload: {0}")]
    Decode(String),
}

impl BackendError {
    /// Whether a later retry can reasonably succeed without intervention.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Per-entity-kind CRUD operations on the backend.
///
/// Creates must be idempotent on the business key: replaying a create with
/// the same key returns the existing row instead of inserting a duplicate.
#[allow(async_fn_in_trait)]
pub trait Backend {
    /// List all rows of a kind inside a scope
    async fn list(&self, kind: EntityKind, scope: &Scope) -> BackendResult<Vec<RemoteRow>>;

    /// Fetch one row by business identifier
    async fn fetch(
        &self,
        kind: EntityKind,
        account_id: &str,
        business_id: &str,
    ) -> BackendResult<Option<RemoteRow>>;

    /// Insert a row, keyed for replay detection by `idempotency_key`
    async fn create(
        &self,
        kind: EntityKind,
        row: RemoteRow,
        idempotency_key: &str,
    ) -> BackendResult<RemoteRow>;

    /// Update the row identified by its business identifier
    async fn update(
        &self,
        kind: EntityKind,
        account_id: &str,
        business_id: &str,
        row: RemoteRow,
    ) -> BackendResult<RemoteRow>;

    /// Delete the row identified by its business identifier
    async fn delete(
        &self,
        kind: EntityKind,
        account_id: &str,
        business_id: &str,
    ) -> BackendResult<()>;
}

/// Backend row decoded into the local model plus its control fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntity {
    pub data: EntityData,
    pub version: i64,
    pub last_updated: DateTime<Utc>,
}

impl RemoteEntity {
    pub fn from_row(kind: EntityKind, row: &RemoteRow) -> BackendResult<Self> {
        Ok(Self {
            data: mapping::entity_from_row(kind, row)?,
            version: mapping::row_version(row),
            last_updated: mapping::row_timestamp(kind, row)?,
        })
    }
}
