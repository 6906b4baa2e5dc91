//! Optimistic mutation facade over the store, outbox, and conflict pipeline.

use crate::backend::Backend;
use crate::config::EngineConfig;
use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::models::{
    Conflict, ConflictId, EntityData, EntityKind, EntityRecord, EntityRef, EntityWrite, Mutation,
    OperationId, OperationMeta, ResolutionChoice, Scope,
};
use crate::network::NetworkStatus;

use super::detector::{ConflictDetector, DetectionWindows};
use super::queue::{DrainReport, OperationQueue, QueuePolicy};
use super::resolver::{ConflictResolver, ResolveReport};

/// Entry point used by applications: every local write is enqueued first,
/// then applied optimistically under the same version.
pub struct SyncEngine<B, N> {
    store: LocalStore,
    queue: OperationQueue<B, N>,
    detector: ConflictDetector<B>,
    resolver: ConflictResolver<B>,
}

impl<B: Backend + Clone, N: NetworkStatus> SyncEngine<B, N> {
    pub fn new(store: LocalStore, backend: B, network: N, config: &EngineConfig) -> Self {
        Self {
            queue: OperationQueue::new(
                store.clone(),
                backend.clone(),
                network,
                QueuePolicy::from(config),
            ),
            detector: ConflictDetector::new(
                store.clone(),
                backend.clone(),
                DetectionWindows::from(config),
            ),
            resolver: ConflictResolver::new(store.clone(), backend, config),
            store,
        }
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub const fn queue(&self) -> &OperationQueue<B, N> {
        &self.queue
    }

    pub const fn resolver(&self) -> &ConflictResolver<B> {
        &self.resolver
    }

    /// Record a new entity locally at version 1 and enqueue its create.
    pub async fn create(&self, data: EntityData) -> Result<EntityRecord> {
        if self
            .store
            .get_entity(data.kind(), data.business_id())
            .await?
            .is_some()
        {
            return Err(Error::InvalidInput(format!(
                "{} {} already exists",
                data.kind(),
                data.business_id()
            )));
        }
        self.enqueue_and_apply(Mutation::Create(data.clone()), data, 1)
            .await
    }

    /// Replace an entity's mutable state and enqueue the update.
    pub async fn update(&self, data: EntityData) -> Result<EntityRecord> {
        let existing = self.existing(data.kind(), data.business_id()).await?;
        if existing.data.account_id() != data.account_id() {
            return Err(Error::InvalidInput(format!(
                "{} {} belongs to another account",
                data.kind(),
                data.business_id()
            )));
        }
        let version = existing.version + 1;
        self.enqueue_and_apply(Mutation::Update(data.clone()), data, version)
            .await
    }

    /// Enqueue a delete and drop the local copy.
    pub async fn delete(
        &self,
        kind: EntityKind,
        account_id: &str,
        business_id: &str,
    ) -> Result<OperationId> {
        let existing = self.existing(kind, business_id).await?;
        if existing.data.account_id() != account_id {
            return Err(Error::NotFound(format!("{kind} {business_id}")));
        }

        let meta = OperationMeta {
            account_id: account_id.to_string(),
            version: existing.version + 1,
            timestamp: self.store.now(),
        };
        let id = self
            .queue
            .add(Mutation::Delete(EntityRef::of(&existing.data)), meta)
            .await?;
        self.store.delete_entity(kind, business_id).await?;
        Ok(id)
    }

    pub async fn drain(&self, account_id: Option<&str>) -> Result<DrainReport> {
        self.queue.process_queue(account_id).await
    }

    pub async fn detect(&self, scope: &Scope) -> Result<Vec<Conflict>> {
        self.detector.detect(scope).await
    }

    pub async fn resolve(
        &self,
        id: &ConflictId,
        choice: Option<ResolutionChoice>,
    ) -> Result<EntityRecord> {
        self.resolver.resolve(id, choice).await
    }

    pub async fn resolve_all_automatic(&self, account_id: Option<&str>) -> Result<ResolveReport> {
        self.resolver.resolve_all_automatic(account_id).await
    }

    async fn existing(&self, kind: EntityKind, business_id: &str) -> Result<EntityRecord> {
        self.store
            .get_entity(kind, business_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{kind} {business_id}")))
    }

    async fn enqueue_and_apply(
        &self,
        mutation: Mutation,
        data: EntityData,
        version: i64,
    ) -> Result<EntityRecord> {
        let now = self.store.now();
        let meta = OperationMeta {
            account_id: data.account_id().to_string(),
            version,
            timestamp: now,
        };
        self.queue.add(mutation, meta).await?;
        self.store
            .upsert_entity(EntityWrite::new(data, now).with_version(version))
            .await
    }
}
