//! Outbox operation model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::entity::{EntityData, EntityKind};

/// A unique identifier for an operation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Reference to an entity targeted by a delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub kind: EntityKind,
    pub business_id: String,
    pub account_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl EntityRef {
    pub fn of(data: &EntityData) -> Self {
        Self {
            kind: data.kind(),
            business_id: data.business_id().to_string(),
            account_id: data.account_id().to_string(),
            project_id: data.project_id().map(ToString::to_string),
        }
    }
}

/// Intended mutation carried by an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum Mutation {
    Create(EntityData),
    Update(EntityData),
    Delete(EntityRef),
}

impl Mutation {
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Create(data) | Self::Update(data) => data.kind(),
            Self::Delete(target) => target.kind,
        }
    }

    pub fn business_id(&self) -> &str {
        match self {
            Self::Create(data) | Self::Update(data) => data.business_id(),
            Self::Delete(target) => &target.business_id,
        }
    }

    pub fn account_id(&self) -> &str {
        match self {
            Self::Create(data) | Self::Update(data) => data.account_id(),
            Self::Delete(target) => &target.account_id,
        }
    }

    pub const fn operation_type(&self) -> OperationType {
        match (self, self.kind()) {
            (Self::Create(_), EntityKind::Item) => OperationType::CreateItem,
            (Self::Update(_), EntityKind::Item) => OperationType::UpdateItem,
            (Self::Delete(_), EntityKind::Item) => OperationType::DeleteItem,
            (Self::Create(_), EntityKind::Transaction) => OperationType::CreateTransaction,
            (Self::Update(_), EntityKind::Transaction) => OperationType::UpdateTransaction,
            (Self::Delete(_), EntityKind::Transaction) => OperationType::DeleteTransaction,
            (Self::Create(_), EntityKind::Project) => OperationType::CreateProject,
            (Self::Update(_), EntityKind::Project) => OperationType::UpdateProject,
            (Self::Delete(_), EntityKind::Project) => OperationType::DeleteProject,
        }
    }
}

/// Mutation kind persisted in the outbox `type` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    CreateItem,
    UpdateItem,
    DeleteItem,
    CreateTransaction,
    UpdateTransaction,
    DeleteTransaction,
    CreateProject,
    UpdateProject,
    DeleteProject,
}

impl OperationType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateItem => "CREATE_ITEM",
            Self::UpdateItem => "UPDATE_ITEM",
            Self::DeleteItem => "DELETE_ITEM",
            Self::CreateTransaction => "CREATE_TRANSACTION",
            Self::UpdateTransaction => "UPDATE_TRANSACTION",
            Self::DeleteTransaction => "DELETE_TRANSACTION",
            Self::CreateProject => "CREATE_PROJECT",
            Self::UpdateProject => "UPDATE_PROJECT",
            Self::DeleteProject => "DELETE_PROJECT",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_value(serde_json::Value::String(s.trim().to_string()))
            .map_err(|_| Error::InvalidInput(format!("unknown operation type '{s}'")))
    }
}

/// Classification of the last failed delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network or server-side failure, retried indefinitely
    Transient,
    /// Backend rejected the operation; retried up to a ceiling
    Permanent,
}

impl FailureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "transient" => Some(Self::Transient),
            "permanent" => Some(Self::Permanent),
            _ => None,
        }
    }
}

/// Scope and ordering data supplied when enqueueing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationMeta {
    pub account_id: String,
    pub version: i64,
    pub timestamp: DateTime<Utc>,
}

/// A pending mutation in the outbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: OperationId,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub account_id: String,
    pub data: Mutation,
    pub version: i64,
    pub timestamp: DateTime<Utc>,
    /// Failed delivery attempts of either kind
    pub retry_count: u32,
    /// Backend rejections only; the retry ceiling applies to this count
    #[serde(default)]
    pub permanent_failures: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub failure_kind: Option<FailureKind>,
}

impl Operation {
    /// Build a fresh operation with zero retries.
    pub fn new(data: Mutation, meta: OperationMeta) -> Self {
        Self {
            id: OperationId::new(),
            op_type: data.operation_type(),
            account_id: meta.account_id,
            data,
            version: meta.version,
            timestamp: meta.timestamp,
            retry_count: 0,
            permanent_failures: 0,
            last_error: None,
            failure_kind: None,
        }
    }

    pub const fn entity_kind(&self) -> EntityKind {
        self.data.kind()
    }

    pub fn business_id(&self) -> &str {
        self.data.business_id()
    }

    /// Permanently rejected often enough that it needs manual intervention.
    pub const fn is_stalled(&self, max_permanent_retries: u32) -> bool {
        self.permanent_failures >= max_permanent_retries && self.permanent_failures > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Item;

    fn meta() -> OperationMeta {
        OperationMeta {
            account_id: "acct".to_string(),
            version: 2,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn new_operation_starts_clean() {
        let item = Item::new("acct", None, "Sofa");
        let op = Operation::new(Mutation::Update(EntityData::Item(item)), meta());

        assert_eq!(op.op_type, OperationType::UpdateItem);
        assert_eq!(op.retry_count, 0);
        assert!(op.last_error.is_none());
        assert!(!op.is_stalled(1));
    }

    #[test]
    fn operation_type_round_trips_through_str() {
        let parsed: OperationType = "DELETE_TRANSACTION".parse().unwrap();
        assert_eq!(parsed, OperationType::DeleteTransaction);
        assert_eq!(parsed.to_string(), "DELETE_TRANSACTION");
        assert!("UPSERT_ITEM".parse::<OperationType>().is_err());
    }

    #[test]
    fn stalled_only_after_permanent_failures_reach_ceiling() {
        let item = Item::new("acct", None, "Sofa");
        let mut op = Operation::new(Mutation::Create(EntityData::Item(item)), meta());

        op.retry_count = 7;
        op.failure_kind = Some(FailureKind::Transient);
        assert!(!op.is_stalled(5));

        // Transient attempts do not count toward the ceiling.
        op.retry_count = 8;
        op.permanent_failures = 1;
        op.failure_kind = Some(FailureKind::Permanent);
        assert!(!op.is_stalled(5));

        op.retry_count = 12;
        op.permanent_failures = 5;
        assert!(op.is_stalled(5));
        assert!(!op.is_stalled(6));
    }

    #[test]
    fn delete_targets_keep_scope() {
        let item = Item::new("acct", Some("proj".to_string()), "Sofa");
        let target = EntityRef::of(&EntityData::Item(item.clone()));
        let mutation = Mutation::Delete(target);

        assert_eq!(mutation.operation_type(), OperationType::DeleteItem);
        assert_eq!(mutation.business_id(), item.item_id);
        assert_eq!(mutation.account_id(), "acct");
    }
}
