//! Sync conflict model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::entity::{EntityData, EntityKind};

/// A unique identifier for a conflict record, using UUID v7
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictId(Uuid);

impl ConflictId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Which divergence signal produced the conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    Version,
    Timestamp,
    Content,
}

impl ConflictType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Version => "version",
            Self::Timestamp => "timestamp",
            Self::Content => "content",
        }
    }
}

impl FromStr for ConflictType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "version" => Ok(Self::Version),
            "timestamp" => Ok(Self::Timestamp),
            "content" => Ok(Self::Content),
            other => Err(Error::InvalidInput(format!("unknown conflict type '{other}'"))),
        }
    }
}

/// Full snapshot of one side of a conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSide {
    pub data: EntityData,
    pub timestamp: DateTime<Utc>,
    pub version: i64,
}

/// Strategy chosen to settle a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    KeepLocal,
    KeepServer,
    Merge,
    /// No automatic rule applies; a caller must choose
    Manual,
}

impl ResolutionStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeepLocal => "keep_local",
            Self::KeepServer => "keep_server",
            Self::Merge => "merge",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Local,
    Server,
}

impl Side {
    pub const fn other(self) -> Self {
        match self {
            Self::Local => Self::Server,
            Self::Server => Self::Local,
        }
    }
}

/// Field-level merge request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeInstructions {
    /// Side whose values form the base of the merged entity
    pub prefer: Side,
    /// Fields (local names) taken from the other side regardless of value
    #[serde(default)]
    pub take_other: Vec<String>,
}

impl MergeInstructions {
    pub const fn prefer(prefer: Side) -> Self {
        Self {
            prefer,
            take_other: Vec::new(),
        }
    }
}

/// Caller-supplied choice for a conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "choice", rename_all = "snake_case")]
pub enum ResolutionChoice {
    Local,
    Server,
    Merge(MergeInstructions),
}

impl ResolutionChoice {
    pub const fn strategy(&self) -> ResolutionStrategy {
        match self {
            Self::Local => ResolutionStrategy::KeepLocal,
            Self::Server => ResolutionStrategy::KeepServer,
            Self::Merge(_) => ResolutionStrategy::Merge,
        }
    }
}

/// Outcome recorded on a resolved conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub strategy: ResolutionStrategy,
    /// Chosen by policy rather than by a caller
    pub automatic: bool,
    pub resolved_at: DateTime<Utc>,
    /// Version written to both sides
    pub version: i64,
}

/// Detected divergence between a local entity and its backend counterpart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: ConflictId,
    /// Business identifier of the diverging entity
    pub item_id: String,
    pub entity_kind: EntityKind,
    pub account_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    /// First differing allow-listed field
    #[serde(default)]
    pub field: Option<String>,
    pub local: ConflictSide,
    pub server: ConflictSide,
    pub resolved: bool,
    #[serde(default)]
    pub resolution: Option<Resolution>,
    pub created_at: DateTime<Utc>,
}

impl Conflict {
    pub const fn side(&self, side: Side) -> &ConflictSide {
        match side {
            Side::Local => &self.local,
            Side::Server => &self.server,
        }
    }
}
