//! Operation Queue: durable outbox with ordered, at-least-once replay.
//!
//! Each account's operations are applied strictly in `(timestamp, id)`
//! order and a drain stops at the first failure, so an update is never
//! sent before the create it depends on. Different accounts drain
//! concurrently. An operation leaves the outbox only after the backend
//! confirms it.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;

use crate::backend::{Backend, BackendError};
use crate::config::{EngineConfig, DEFAULT_MAX_PERMANENT_RETRIES};
use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::models::{FailureKind, Mutation, Operation, OperationId, OperationMeta};
use crate::network::NetworkStatus;

/// Retry policy for permanently rejected operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    /// Permanent failures tolerated before an operation stalls
    pub max_permanent_retries: u32,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            max_permanent_retries: DEFAULT_MAX_PERMANENT_RETRIES,
        }
    }
}

impl From<&EngineConfig> for QueuePolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_permanent_retries: config.max_permanent_retries,
        }
    }
}

/// A delivery attempt that failed during a drain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedOperation {
    pub operation_id: OperationId,
    pub account_id: String,
    pub kind: FailureKind,
    pub error: String,
    /// Retry count after this failure
    pub retry_count: u32,
}

/// Outcome of one `process_queue` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Nothing was attempted because the network is down
    pub offline: bool,
    /// Operations confirmed by the backend and removed from the outbox
    pub applied: Vec<OperationId>,
    pub failed: Vec<FailedOperation>,
    /// Stalled operations holding up their account
    pub blocked: Vec<OperationId>,
    /// Accounts skipped because another drain already owns them
    pub coalesced: Vec<String>,
}

impl DrainReport {
    /// True when nothing failed, stalled, or was deferred.
    pub fn is_clean(&self) -> bool {
        !self.offline
            && self.failed.is_empty()
            && self.blocked.is_empty()
            && self.coalesced.is_empty()
    }

    fn absorb(&mut self, other: Self) {
        self.applied.extend(other.applied);
        self.failed.extend(other.failed);
        self.blocked.extend(other.blocked);
        self.coalesced.extend(other.coalesced);
    }
}

/// Durable outbox bound to one backend and network signal.
pub struct OperationQueue<B, N> {
    store: LocalStore,
    backend: B,
    network: N,
    policy: QueuePolicy,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl<B: Backend, N: NetworkStatus> OperationQueue<B, N> {
    pub fn new(store: LocalStore, backend: B, network: N, policy: QueuePolicy) -> Self {
        Self {
            store,
            backend,
            network,
            policy,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub const fn policy(&self) -> QueuePolicy {
        self.policy
    }

    pub const fn network(&self) -> &N {
        &self.network
    }

    /// Persist a new operation and return its id.
    ///
    /// The operation is durable before this returns; a store failure is
    /// returned to the caller.
    pub async fn add(&self, mutation: Mutation, meta: OperationMeta) -> Result<OperationId> {
        if mutation.account_id() != meta.account_id {
            return Err(Error::InvalidInput(format!(
                "operation for account '{}' enqueued under '{}'",
                mutation.account_id(),
                meta.account_id
            )));
        }

        let operation = Operation::new(mutation, meta);
        self.store.put_operation(&operation).await?;
        tracing::debug!(
            operation_id = %operation.id,
            account_id = %operation.account_id,
            op_type = %operation.op_type,
            version = operation.version,
            "Enqueued operation"
        );
        Ok(operation.id)
    }

    /// Drain pending operations for one account, or all of them.
    ///
    /// Safe to call repeatedly and concurrently: an account already being
    /// drained is skipped and reported in [`DrainReport::coalesced`].
    pub async fn process_queue(&self, account_id: Option<&str>) -> Result<DrainReport> {
        if !self.network.is_online() {
            tracing::debug!("Offline, deferring queue drain");
            return Ok(DrainReport {
                offline: true,
                ..DrainReport::default()
            });
        }

        let accounts: BTreeSet<String> = match account_id {
            Some(account_id) => BTreeSet::from([account_id.to_string()]),
            None => self
                .store
                .list_operations(None)
                .await?
                .into_iter()
                .map(|op| op.account_id)
                .collect(),
        };

        let results = join_all(accounts.iter().map(|account| self.drain_account(account))).await;

        let mut report = DrainReport::default();
        let mut first_error = None;
        for result in results {
            match result {
                Ok(drained) => report.absorb(drained),
                Err(error) => {
                    tracing::error!("Queue drain aborted: {error}");
                    first_error.get_or_insert(error);
                }
            }
        }
        if let Some(error) = first_error {
            return Err(error);
        }

        if !report.applied.is_empty() || !report.failed.is_empty() {
            tracing::info!(
                applied = report.applied.len(),
                failed = report.failed.len(),
                blocked = report.blocked.len(),
                "Queue drain finished"
            );
        }
        Ok(report)
    }

    async fn drain_account(&self, account_id: &str) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, account_id) else {
            tracing::debug!(account_id, "Drain already in progress, coalescing");
            report.coalesced.push(account_id.to_string());
            return Ok(report);
        };

        // Re-read under the guard so nothing applied by a finished drain is resent.
        for operation in self.store.list_operations(Some(account_id)).await? {
            if operation.is_stalled(self.policy.max_permanent_retries) {
                tracing::warn!(
                    operation_id = %operation.id,
                    account_id,
                    permanent_failures = operation.permanent_failures,
                    "Stalled operation blocks account queue"
                );
                report.blocked.push(operation.id);
                break;
            }
            if !self.network.is_online() {
                break;
            }

            match self.apply(&operation).await {
                Ok(()) => {
                    self.confirm(&operation).await?;
                    report.applied.push(operation.id);
                }
                Err(error) => {
                    report.failed.push(self.record_failure(&operation, &error).await?);
                    break;
                }
            }
        }
        Ok(report)
    }

    async fn apply(&self, operation: &Operation) -> std::result::Result<(), BackendError> {
        let kind = operation.entity_kind();
        match &operation.data {
            Mutation::Create(data) => {
                let row = data.to_remote_create(operation.version, &operation.timestamp);
                self.backend
                    .create(kind, row, &operation.id.as_str())
                    .await?;
            }
            Mutation::Update(data) => {
                let row = data.to_remote_update(operation.version, &operation.timestamp);
                self.backend
                    .update(kind, data.account_id(), data.business_id(), row)
                    .await?;
            }
            Mutation::Delete(target) => {
                self.backend
                    .delete(kind, &target.account_id, &target.business_id)
                    .await?;
            }
        }
        Ok(())
    }

    async fn confirm(&self, operation: &Operation) -> Result<()> {
        self.store.delete_operation(&operation.id).await?;

        let kind = operation.entity_kind();
        let business_id = operation.business_id();
        match operation.data {
            Mutation::Delete(_) => {
                self.store.delete_entity(kind, business_id).await?;
            }
            Mutation::Create(_) | Mutation::Update(_) => {
                // A newer local write keeps its own pending state.
                self.store
                    .mark_entity_synced(kind, business_id, Some(operation.version))
                    .await?;
            }
        }

        tracing::debug!(
            operation_id = %operation.id,
            account_id = %operation.account_id,
            item_id = business_id,
            version = operation.version,
            "Applied operation"
        );
        Ok(())
    }

    async fn record_failure(
        &self,
        operation: &Operation,
        error: &BackendError,
    ) -> Result<FailedOperation> {
        let kind = if error.is_transient() {
            FailureKind::Transient
        } else {
            FailureKind::Permanent
        };
        let message = error.to_string();
        let updated = self
            .store
            .record_operation_failure(&operation.id, &message, kind)
            .await?;

        tracing::warn!(
            operation_id = %operation.id,
            account_id = %operation.account_id,
            failure = kind.as_str(),
            retry_count = updated.retry_count,
            permanent_failures = updated.permanent_failures,
            "Operation failed: {message}"
        );

        Ok(FailedOperation {
            operation_id: operation.id,
            account_id: operation.account_id.clone(),
            kind,
            error: message,
            retry_count: updated.retry_count,
        })
    }

    /// Clear an operation's retry state so the next drain attempts it again.
    pub async fn retry(&self, id: &OperationId) -> Result<()> {
        if self.store.reset_operation_retries(id).await? {
            tracing::info!(operation_id = %id, "Operation reset for retry");
            Ok(())
        } else {
            Err(Error::NotFound(format!("operation {id}")))
        }
    }

    /// Drop an operation without applying it; returns what was removed.
    pub async fn discard(&self, id: &OperationId) -> Result<Operation> {
        let operation = self
            .store
            .get_operation(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("operation {id}")))?;
        self.store.delete_operation(id).await?;
        tracing::warn!(
            operation_id = %id,
            account_id = %operation.account_id,
            op_type = %operation.op_type,
            "Discarded operation"
        );
        Ok(operation)
    }

    pub async fn pending(&self, account_id: Option<&str>) -> Result<Vec<Operation>> {
        self.store.list_operations(account_id).await
    }

    /// Operations waiting on manual intervention.
    pub async fn stalled(&self, account_id: Option<&str>) -> Result<Vec<Operation>> {
        let max = self.policy.max_permanent_retries;
        Ok(self
            .store
            .list_operations(account_id)
            .await?
            .into_iter()
            .filter(|operation| operation.is_stalled(max))
            .collect())
    }
}

/// Marks an account as being drained until dropped.
struct InFlightGuard {
    accounts: Arc<Mutex<HashSet<String>>>,
    account_id: String,
}

impl InFlightGuard {
    fn acquire(accounts: &Arc<Mutex<HashSet<String>>>, account_id: &str) -> Option<Self> {
        let inserted = accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account_id.to_string());
        inserted.then(|| Self {
            accounts: Arc::clone(accounts),
            account_id: account_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.account_id);
    }
}
