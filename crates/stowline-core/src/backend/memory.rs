//! In-process backend used by tests and offline demos.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::{EntityKind, Scope};

use super::mapping::row_version;
use super::{Backend, BackendError, BackendResult, RemoteRow};

/// Backend call kinds recorded for inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallAction {
    List,
    Fetch,
    Create,
    Update,
    Delete,
}

/// One recorded backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCall {
    pub action: CallAction,
    pub kind: EntityKind,
    pub business_id: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    online: bool,
    rows: HashMap<(EntityKind, String), RemoteRow>,
    idempotency_keys: HashSet<String>,
    calls: Vec<BackendCall>,
    next_failures: VecDeque<BackendError>,
    rejections: HashMap<String, BackendError>,
    latency: HashMap<String, Duration>,
}

/// Thread-safe in-memory implementation of [`Backend`].
///
/// Clones share state, so a test can keep a handle while the queue owns another.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                online: true,
                ..State::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate losing or regaining connectivity.
    pub fn set_online(&self, online: bool) {
        self.state().online = online;
    }

    /// Fail the next mutating call with `error`.
    pub fn fail_next(&self, error: BackendError) {
        self.state().next_failures.push_back(error);
    }

    /// Fail every mutating call for `business_id` until cleared.
    pub fn reject(&self, business_id: impl Into<String>, error: BackendError) {
        self.state().rejections.insert(business_id.into(), error);
    }

    pub fn clear_rejections(&self) {
        self.state().rejections.clear();
    }

    /// Delay every call scoped to `account_id`.
    pub fn set_latency(&self, account_id: impl Into<String>, latency: Duration) {
        self.state().latency.insert(account_id.into(), latency);
    }

    /// Seed or overwrite a row directly, bypassing call accounting.
    pub fn insert_row(&self, kind: EntityKind, row: RemoteRow) {
        let Some(business_id) = row
            .get(kind.business_key())
            .and_then(Value::as_str)
            .map(ToString::to_string)
        else {
            return;
        };
        self.state().rows.insert((kind, business_id), row);
    }

    pub fn row(&self, kind: EntityKind, business_id: &str) -> Option<RemoteRow> {
        self.state()
            .rows
            .get(&(kind, business_id.to_string()))
            .cloned()
    }

    pub fn row_count(&self, kind: EntityKind) -> usize {
        self.state()
            .rows
            .keys()
            .filter(|(row_kind, _)| *row_kind == kind)
            .count()
    }

    /// Whether a create carrying `key` was ever applied.
    pub fn saw_idempotency_key(&self, key: &str) -> bool {
        self.state().idempotency_keys.contains(key)
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state().calls.clone()
    }

    /// Number of create/update/delete calls received.
    pub fn mutation_count(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| {
                matches!(
                    call.action,
                    CallAction::Create | CallAction::Update | CallAction::Delete
                )
            })
            .count()
    }

    async fn enter(
        &self,
        action: CallAction,
        kind: EntityKind,
        account_id: &str,
        business_id: Option<&str>,
    ) -> BackendResult<()> {
        let latency = {
            let mut state = self.state();
            state.calls.push(BackendCall {
                action,
                kind,
                business_id: business_id.map(ToString::to_string),
            });
            if !state.online {
                return Err(BackendError::Unavailable("network is offline".to_string()));
            }
            state.latency.get(account_id).copied()
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if matches!(action, CallAction::List | CallAction::Fetch) {
            return Ok(());
        }

        let mut state = self.state();
        if let Some(error) = business_id.and_then(|id| state.rejections.get(id).cloned()) {
            return Err(error);
        }
        if let Some(error) = state.next_failures.pop_front() {
            return Err(error);
        }
        Ok(())
    }
}

fn column<'a>(row: &'a RemoteRow, name: &str) -> Option<&'a str> {
    row.get(name).and_then(Value::as_str)
}

impl Backend for MemoryBackend {
    async fn list(&self, kind: EntityKind, scope: &Scope) -> BackendResult<Vec<RemoteRow>> {
        self.enter(CallAction::List, kind, &scope.account_id, None)
            .await?;

        let state = self.state();
        let mut rows: Vec<RemoteRow> = state
            .rows
            .iter()
            .filter(|((row_kind, _), row)| {
                *row_kind == kind
                    && column(row, "account_id") == Some(scope.account_id.as_str())
                    && scope
                        .project_id
                        .as_deref()
                        .is_none_or(|project_id| column(row, "project_id") == Some(project_id))
            })
            .map(|(_, row)| row.clone())
            .collect();
        rows.sort_by(|a, b| column(a, kind.business_key()).cmp(&column(b, kind.business_key())));
        Ok(rows)
    }

    async fn fetch(
        &self,
        kind: EntityKind,
        account_id: &str,
        business_id: &str,
    ) -> BackendResult<Option<RemoteRow>> {
        self.enter(CallAction::Fetch, kind, account_id, Some(business_id))
            .await?;

        Ok(self
            .state()
            .rows
            .get(&(kind, business_id.to_string()))
            .filter(|row| column(row, "account_id") == Some(account_id))
            .cloned())
    }

    async fn create(
        &self,
        kind: EntityKind,
        row: RemoteRow,
        idempotency_key: &str,
    ) -> BackendResult<RemoteRow> {
        let business_id = column(&row, kind.business_key())
            .ok_or_else(|| {
                BackendError::Rejected(format!("{kind} create is missing a business key"))
            })?
            .to_string();
        let account_id = column(&row, "account_id").unwrap_or_default().to_string();
        self.enter(CallAction::Create, kind, &account_id, Some(&business_id))
            .await?;

        let mut state = self.state();
        let key = (kind, business_id);
        if let Some(existing) = state.rows.get(&key) {
            return Ok(existing.clone());
        }
        state.idempotency_keys.insert(idempotency_key.to_string());

        let mut stored = row;
        stored
            .entry("id")
            .or_insert_with(|| json!(Uuid::now_v7().to_string()));
        state.rows.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        kind: EntityKind,
        account_id: &str,
        business_id: &str,
        row: RemoteRow,
    ) -> BackendResult<RemoteRow> {
        self.enter(CallAction::Update, kind, account_id, Some(business_id))
            .await?;

        let mut state = self.state();
        let existing = state
            .rows
            .get_mut(&(kind, business_id.to_string()))
            .filter(|existing| column(existing, "account_id") == Some(account_id))
            .ok_or_else(|| BackendError::NotFound(format!("{kind} {business_id}")))?;

        let current = row_version(existing);
        let incoming = row_version(&row);
        if incoming < current {
            return Err(BackendError::VersionConflict(format!(
                "{kind} {business_id} is at version {current}, write carried {incoming}"
            )));
        }

        for (name, value) in row {
            existing.insert(name, value);
        }
        Ok(existing.clone())
    }

    async fn delete(
        &self,
        kind: EntityKind,
        account_id: &str,
        business_id: &str,
    ) -> BackendResult<()> {
        self.enter(CallAction::Delete, kind, account_id, Some(business_id))
            .await?;

        let mut state = self.state();
        let key = (kind, business_id.to_string());
        if state
            .rows
            .get(&key)
            .is_some_and(|row| column(row, "account_id") == Some(account_id))
        {
            state.rows.remove(&key);
        }
        Ok(())
    }
}
