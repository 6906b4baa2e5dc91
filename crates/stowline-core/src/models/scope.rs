//! Account/project scope model

use serde::{Deserialize, Serialize};

/// Account/project boundary partitioning queries, draining, and detection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub account_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl Scope {
    pub fn account(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            project_id: None,
        }
    }

    pub fn project(account_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            project_id: Some(project_id.into()),
        }
    }
}

/// Active identifiers supplied by the host application, persisted for offline start-up
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeContext {
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl ScopeContext {
    /// Scope for the active account and project, if an account is known.
    pub fn scope(&self) -> Option<Scope> {
        self.account_id.as_ref().map(|account_id| Scope {
            account_id: account_id.clone(),
            project_id: self.project_id.clone(),
        })
    }
}
