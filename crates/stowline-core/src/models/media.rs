//! Media blob model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for a stored media blob, using UUID v7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaId(Uuid);

impl MediaId {
    /// Create a new unique media ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID.
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for MediaId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MediaId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Binary attachment held locally until it can be uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaBlob {
    /// Unique media identifier.
    pub id: MediaId,
    /// Owning account.
    pub account_id: String,
    /// Original file name.
    pub filename: String,
    /// Content MIME type.
    pub mime_type: String,
    /// Raw bytes.
    #[serde(skip)]
    pub data: Vec<u8>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl MediaBlob {
    /// Create a new media blob.
    pub fn new(
        account_id: impl Into<String>,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Result<Self> {
        let account_id = account_id.into().trim().to_string();
        let filename = filename.into().trim().to_string();
        let mime_type = mime_type.into().trim().to_string();

        if account_id.is_empty() {
            return Err(Error::InvalidInput(
                "Media account_id cannot be empty".to_string(),
            ));
        }
        if filename.is_empty() {
            return Err(Error::InvalidInput(
                "Media filename cannot be empty".to_string(),
            ));
        }
        if mime_type.is_empty() {
            return Err(Error::InvalidInput(
                "Media mime_type cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            id: MediaId::new(),
            account_id,
            filename,
            mime_type,
            data,
            created_at: Utc::now(),
        })
    }

    /// Size in bytes counted against the quota.
    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Summed blob sizes against the configured quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaUsage {
    pub used_bytes: u64,
    pub quota_bytes: u64,
}

impl MediaUsage {
    pub const fn remaining_bytes(&self) -> u64 {
        self.quota_bytes.saturating_sub(self.used_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_id_unique() {
        let id1 = MediaId::new();
        let id2 = MediaId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_media_id_parse() {
        let id = MediaId::new();
        let parsed: MediaId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_media_new() {
        let blob = MediaBlob::new("acct", "receipt.png", "image/png", vec![0; 1234]).unwrap();

        assert_eq!(blob.filename, "receipt.png");
        assert_eq!(blob.mime_type, "image/png");
        assert_eq!(blob.size_bytes(), 1234);
    }

    #[test]
    fn test_media_validation() {
        assert!(MediaBlob::new("", "file", "image/png", vec![1]).is_err());
        assert!(MediaBlob::new("acct", "", "image/png", vec![1]).is_err());
        assert!(MediaBlob::new("acct", "file", " ", vec![1]).is_err());
    }

    #[test]
    fn test_remaining_saturates() {
        let usage = MediaUsage {
            used_bytes: 60,
            quota_bytes: 50,
        };
        assert_eq!(usage.remaining_bytes(), 0);
    }
}
