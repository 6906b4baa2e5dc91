//! Local Store: the single durable persistence boundary.
//!
//! One libSQL connection sits behind an async mutex; every call takes the
//! lock for the duration of its own statements only. Calls made before
//! [`LocalStore::init`] fail with [`Error::NotInitialized`].

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, OnceCell};

use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, DEFAULT_MEDIA_QUOTA_BYTES};
use crate::error::{Error, Result};
use crate::models::{
    CacheEntry, Conflict, ConflictId, EntityKind, EntityRecord, EntityWrite, FailureKind,
    MediaBlob, MediaId, MediaUsage, Operation, OperationId, Resolution, Scope, ScopeContext,
};
use crate::util::format_timestamp;

use super::cache_repository::LibSqlCacheRepository;
use super::conflict_repository::LibSqlConflictRepository;
use super::connection::{begin, finish, Database};
use super::context_repository::{ContextRepository, LibSqlContextRepository};
use super::entity_repository::LibSqlEntityRepository;
use super::media_repository::LibSqlMediaRepository;
use super::operation_repository::LibSqlOperationRepository;

/// Thread-safe handle to the local database; clones share one connection.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<OnceCell<Mutex<Database>>>,
    clock: Arc<dyn Clock>,
    media_quota_bytes: u64,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore {
    /// Create an uninitialised store with default settings.
    pub fn new() -> Self {
        Self {
            db: Arc::new(OnceCell::new()),
            clock: Arc::new(SystemClock),
            media_quota_bytes: DEFAULT_MEDIA_QUOTA_BYTES,
        }
    }

    /// Create an uninitialised store using the quota from `config`.
    pub fn with_config(config: &EngineConfig) -> Self {
        Self {
            media_quota_bytes: config.media_quota_bytes,
            ..Self::new()
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Open (or create) the database file and run migrations.
    ///
    /// Safe to call again; later calls are no-ops once initialised.
    pub async fn init(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        self.db
            .get_or_try_init(|| async move {
                tracing::info!("Opening local store at {}", path.display());
                Database::open(&path).await.map(Mutex::new)
            })
            .await?;
        Ok(())
    }

    /// Initialise against an in-memory database.
    pub async fn init_in_memory(&self) -> Result<()> {
        self.db
            .get_or_try_init(|| async { Database::open_in_memory().await.map(Mutex::new) })
            .await?;
        Ok(())
    }

    /// Convenience: new store with `config`, initialised at `path`.
    pub async fn open(path: impl AsRef<Path>, config: &EngineConfig) -> Result<Self> {
        let store = Self::with_config(config);
        store.init(path).await?;
        Ok(store)
    }

    /// Convenience: default store initialised in memory (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let store = Self::new();
        store.init_in_memory().await?;
        Ok(store)
    }

    pub fn is_initialized(&self) -> bool {
        self.db.initialized()
    }

    pub const fn media_quota_bytes(&self) -> u64 {
        self.media_quota_bytes
    }

    /// Current time from the store's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) async fn database(&self) -> Result<MutexGuard<'_, Database>> {
        let db = self.db.get().ok_or(Error::NotInitialized)?;
        Ok(db.lock().await)
    }

    // ---------------------------------------------------------------------
    // Entities
    // ---------------------------------------------------------------------

    /// Store a full record. The stored version never decreases.
    pub async fn put_entity(&self, record: &EntityRecord) -> Result<()> {
        let db = self.database().await?;
        LibSqlEntityRepository::new(db.connection())
            .put(record)
            .await
    }

    /// Merge a write into the existing record.
    ///
    /// `version` and `last_synced_at` are preserved unless the write supplies
    /// them; a supplied version lower than the stored one is ignored. New
    /// records start at version 1.
    pub async fn upsert_entity(&self, write: EntityWrite) -> Result<EntityRecord> {
        let db = self.database().await?;
        let conn = db.connection();
        let repo = LibSqlEntityRepository::new(conn);

        begin(conn).await?;
        let result = async {
            let existing = repo
                .get(write.data.kind(), write.data.business_id())
                .await?;
            let record = match existing {
                Some(existing) => EntityRecord {
                    version: write
                        .version
                        .map_or(existing.version, |version| version.max(existing.version)),
                    last_synced_at: write.last_synced_at.or(existing.last_synced_at),
                    data: write.data,
                    last_updated: write.last_updated,
                },
                None => EntityRecord {
                    version: write.version.unwrap_or(1).max(1),
                    last_synced_at: write.last_synced_at,
                    data: write.data,
                    last_updated: write.last_updated,
                },
            };
            repo.put(&record).await?;
            Ok(record)
        }
        .await;
        finish(conn, result).await
    }

    pub async fn get_entity(
        &self,
        kind: EntityKind,
        business_id: &str,
    ) -> Result<Option<EntityRecord>> {
        let db = self.database().await?;
        LibSqlEntityRepository::new(db.connection())
            .get(kind, business_id)
            .await
    }

    pub async fn list_entities(
        &self,
        kind: EntityKind,
        scope: &Scope,
    ) -> Result<Vec<EntityRecord>> {
        let db = self.database().await?;
        LibSqlEntityRepository::new(db.connection())
            .list(kind, scope)
            .await
    }

    pub async fn delete_entity(&self, kind: EntityKind, business_id: &str) -> Result<bool> {
        let db = self.database().await?;
        LibSqlEntityRepository::new(db.connection())
            .delete(kind, business_id)
            .await
    }

    /// Stamp `last_synced_at` with the current time.
    ///
    /// With `expected_version`, only a record still at that version is
    /// stamped; returns whether a record was updated.
    pub async fn mark_entity_synced(
        &self,
        kind: EntityKind,
        business_id: &str,
        expected_version: Option<i64>,
    ) -> Result<bool> {
        let now = format_timestamp(&self.now());
        let db = self.database().await?;
        LibSqlEntityRepository::new(db.connection())
            .mark_synced(kind, business_id, expected_version, &now)
            .await
    }

    // ---------------------------------------------------------------------
    // Operations
    // ---------------------------------------------------------------------

    pub async fn put_operation(&self, operation: &Operation) -> Result<()> {
        let db = self.database().await?;
        LibSqlOperationRepository::new(db.connection())
            .put(operation)
            .await
    }

    pub async fn get_operation(&self, id: &OperationId) -> Result<Option<Operation>> {
        let db = self.database().await?;
        LibSqlOperationRepository::new(db.connection())
            .get(id)
            .await
    }

    /// Pending operations sorted by `(account_id, timestamp, id)`.
    pub async fn list_operations(&self, account_id: Option<&str>) -> Result<Vec<Operation>> {
        let db = self.database().await?;
        LibSqlOperationRepository::new(db.connection())
            .list(account_id)
            .await
    }

    /// Bump the retry count and record the error; returns the updated operation.
    pub async fn record_operation_failure(
        &self,
        id: &OperationId,
        error: &str,
        kind: FailureKind,
    ) -> Result<Operation> {
        let db = self.database().await?;
        let repo = LibSqlOperationRepository::new(db.connection());
        if !repo.record_failure(id, error, kind).await? {
            return Err(Error::NotFound(format!("operation {id}")));
        }
        repo.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("operation {id}")))
    }

    pub async fn delete_operation(&self, id: &OperationId) -> Result<bool> {
        let db = self.database().await?;
        LibSqlOperationRepository::new(db.connection())
            .delete(id)
            .await
    }

    /// Atomically replace one account's outbox, leaving other accounts untouched.
    pub async fn replace_operations_for_account(
        &self,
        account_id: &str,
        operations: &[Operation],
    ) -> Result<()> {
        if let Some(stray) = operations.iter().find(|op| op.account_id != account_id) {
            return Err(Error::InvalidInput(format!(
                "operation {} belongs to account '{}', not '{account_id}'",
                stray.id, stray.account_id
            )));
        }

        let db = self.database().await?;
        let conn = db.connection();
        let repo = LibSqlOperationRepository::new(conn);

        begin(conn).await?;
        let result = async {
            repo.delete_for_account(account_id).await?;
            for operation in operations {
                repo.put(operation).await?;
            }
            Ok(())
        }
        .await;
        finish(conn, result).await
    }

    /// Clear retry state so the operation is attempted again.
    pub async fn reset_operation_retries(&self, id: &OperationId) -> Result<bool> {
        let db = self.database().await?;
        LibSqlOperationRepository::new(db.connection())
            .reset_retries(id)
            .await
    }

    pub async fn count_operations(&self, account_id: Option<&str>) -> Result<u64> {
        let db = self.database().await?;
        LibSqlOperationRepository::new(db.connection())
            .count(account_id)
            .await
    }

    // ---------------------------------------------------------------------
    // Conflicts
    // ---------------------------------------------------------------------

    /// Write a batch of conflicts; all or none become visible.
    pub async fn put_conflicts(&self, conflicts: &[Conflict]) -> Result<()> {
        let db = self.database().await?;
        let conn = db.connection();
        let repo = LibSqlConflictRepository::new(conn);

        begin(conn).await?;
        let result = async {
            for conflict in conflicts {
                repo.put(conflict).await?;
            }
            Ok(())
        }
        .await;
        finish(conn, result).await
    }

    pub async fn get_conflict(&self, id: &ConflictId) -> Result<Option<Conflict>> {
        let db = self.database().await?;
        LibSqlConflictRepository::new(db.connection())
            .get(id)
            .await
    }

    pub async fn list_conflicts(
        &self,
        account_id: Option<&str>,
        unresolved_only: bool,
    ) -> Result<Vec<Conflict>> {
        let db = self.database().await?;
        LibSqlConflictRepository::new(db.connection())
            .list(account_id, unresolved_only)
            .await
    }

    pub async fn clear_conflicts_for_scope(
        &self,
        account_id: &str,
        project_id: Option<&str>,
        item_ids: &[String],
    ) -> Result<u64> {
        let db = self.database().await?;
        LibSqlConflictRepository::new(db.connection())
            .clear_for_scope(account_id, project_id, item_ids)
            .await
    }

    /// Clear a scope's conflicts and write a fresh batch in one transaction.
    ///
    /// Readers see either the previous detection pass or the new one.
    pub async fn replace_conflicts_for_scope(
        &self,
        scope: &Scope,
        item_ids: &[String],
        conflicts: &[Conflict],
    ) -> Result<u64> {
        let db = self.database().await?;
        let conn = db.connection();
        let repo = LibSqlConflictRepository::new(conn);

        begin(conn).await?;
        let result = async {
            let cleared = repo
                .clear_for_scope(&scope.account_id, scope.project_id.as_deref(), item_ids)
                .await?;
            for conflict in conflicts {
                repo.put(conflict).await?;
            }
            Ok(cleared)
        }
        .await;
        finish(conn, result).await
    }

    pub async fn mark_conflict_resolved(
        &self,
        id: &ConflictId,
        resolution: &Resolution,
    ) -> Result<()> {
        let db = self.database().await?;
        if LibSqlConflictRepository::new(db.connection())
            .mark_resolved(id, resolution)
            .await?
        {
            Ok(())
        } else {
            Err(Error::NotFound(format!("conflict {id}")))
        }
    }

    pub async fn purge_resolved_conflicts(&self, account_id: Option<&str>) -> Result<u64> {
        let db = self.database().await?;
        LibSqlConflictRepository::new(db.connection())
            .purge_resolved(account_id)
            .await
    }

    // ---------------------------------------------------------------------
    // Cache
    // ---------------------------------------------------------------------

    /// Read a fresh cached value; an expired entry is deleted and reads as absent.
    pub async fn cache_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let now = self.now();
        let db = self.database().await?;
        let repo = LibSqlCacheRepository::new(db.connection());

        let Some(entry) = repo.get(key).await? else {
            return Ok(None);
        };
        if entry.is_expired(now) {
            repo.delete(key).await?;
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(entry.data)?))
    }

    /// Read an entry without evicting it, expired or not.
    pub async fn cache_peek(&self, key: &str) -> Result<Option<CacheEntry>> {
        let db = self.database().await?;
        LibSqlCacheRepository::new(db.connection()).get(key).await
    }

    pub async fn cache_set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let now = self.now();
        let entry = CacheEntry {
            key: key.to_string(),
            data: serde_json::to_value(value)?,
            timestamp: now,
            expires_at: ttl.map(|ttl| now + ttl),
        };
        let db = self.database().await?;
        LibSqlCacheRepository::new(db.connection())
            .put(&entry)
            .await
    }

    pub async fn cache_delete(&self, key: &str) -> Result<bool> {
        let db = self.database().await?;
        LibSqlCacheRepository::new(db.connection())
            .delete(key)
            .await
    }

    pub async fn purge_expired_cache(&self) -> Result<u64> {
        let now = format_timestamp(&self.now());
        let db = self.database().await?;
        LibSqlCacheRepository::new(db.connection())
            .purge_expired(&now)
            .await
    }

    // ---------------------------------------------------------------------
    // Context
    // ---------------------------------------------------------------------

    pub async fn save_context(&self, context: &ScopeContext) -> Result<()> {
        let db = self.database().await?;
        let conn = db.connection();
        begin(conn).await?;
        let result = LibSqlContextRepository::new(conn).save(context).await;
        finish(conn, result).await
    }

    pub async fn load_context(&self) -> Result<ScopeContext> {
        let db = self.database().await?;
        LibSqlContextRepository::new(db.connection()).load().await
    }

    // ---------------------------------------------------------------------
    // Media
    // ---------------------------------------------------------------------

    /// Persist a blob unless it would push summed usage past the quota.
    ///
    /// The usage check and the insert share one transaction, so a rejected
    /// write leaves nothing behind.
    pub async fn save_media(&self, blob: &MediaBlob) -> Result<MediaUsage> {
        let quota = self.media_quota_bytes;
        let requested = blob.size_bytes();
        let db = self.database().await?;
        let conn = db.connection();
        let repo = LibSqlMediaRepository::new(conn);

        begin(conn).await?;
        let result = async {
            let usage = repo.usage(None).await?;
            if usage.saturating_add(requested) > quota {
                return Err(Error::QuotaExceeded {
                    usage,
                    requested,
                    quota,
                });
            }
            repo.insert(blob).await?;
            Ok(MediaUsage {
                used_bytes: usage + requested,
                quota_bytes: quota,
            })
        }
        .await;

        let result = finish(conn, result).await;
        if let Err(Error::QuotaExceeded { usage, requested, quota }) = &result {
            tracing::warn!(
                usage,
                requested,
                quota,
                filename = %blob.filename,
                "Media write rejected"
            );
        }
        result
    }

    pub async fn get_media(&self, id: &MediaId) -> Result<Option<MediaBlob>> {
        let db = self.database().await?;
        LibSqlMediaRepository::new(db.connection()).get(id).await
    }

    pub async fn delete_media(&self, id: &MediaId) -> Result<bool> {
        let db = self.database().await?;
        LibSqlMediaRepository::new(db.connection())
            .delete(id)
            .await
    }

    /// Summed blob sizes for one account, or the whole store.
    pub async fn media_usage(&self, account_id: Option<&str>) -> Result<MediaUsage> {
        let db = self.database().await?;
        let used_bytes = LibSqlMediaRepository::new(db.connection())
            .usage(account_id)
            .await?;
        Ok(MediaUsage {
            used_bytes,
            quota_bytes: self.media_quota_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{
        ConflictSide, ConflictType, EntityData, Item, Mutation, OperationMeta, ResolutionStrategy,
    };
    use crate::util::parse_timestamp;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn start() -> DateTime<Utc> {
        parse_timestamp("2024-06-01T10:00:00.000Z").unwrap()
    }

    async fn store_with_clock() -> (LocalStore, ManualClock) {
        let clock = ManualClock::new(start());
        let store = LocalStore::new().with_clock(Arc::new(clock.clone()));
        store.init_in_memory().await.unwrap();
        (store, clock)
    }

    fn item_write(item: &Item) -> EntityWrite {
        EntityWrite::new(EntityData::Item(item.clone()), start())
    }

    fn operation(account_id: &str) -> Operation {
        let item = Item::new(account_id, None, "Sofa");
        Operation::new(
            Mutation::Create(EntityData::Item(item)),
            OperationMeta {
                account_id: account_id.to_string(),
                version: 1,
                timestamp: start(),
            },
        )
    }

    fn conflict(account_id: &str, project_id: &str) -> Conflict {
        let item = Item::new(account_id, Some(project_id.to_string()), "Sofa");
        let side = ConflictSide {
            data: EntityData::Item(item.clone()),
            timestamp: start(),
            version: 1,
        };
        Conflict {
            id: ConflictId::new(),
            item_id: item.item_id,
            entity_kind: EntityKind::Item,
            account_id: account_id.to_string(),
            project_id: Some(project_id.to_string()),
            conflict_type: ConflictType::Content,
            field: Some("name".to_string()),
            local: side.clone(),
            server: side,
            resolved: false,
            resolution: None,
            created_at: start(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_not_initialized_fails_fast() {
        let store = LocalStore::new();
        assert!(!store.is_initialized());

        let error = store.list_operations(None).await.unwrap_err();
        assert!(error.is_not_initialized());
        let error = store
            .get_entity(EntityKind::Item, "missing")
            .await
            .unwrap_err();
        assert!(error.is_not_initialized());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_init_is_idempotent_and_persists() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("store.db");
        let item = Item::new("acct", None, "Sofa");

        {
            let store = LocalStore::open(&path, &EngineConfig::default())
                .await
                .unwrap();
            store.init(&path).await.unwrap();
            store.upsert_entity(item_write(&item)).await.unwrap();
        }

        let reopened = LocalStore::open(&path, &EngineConfig::default())
            .await
            .unwrap();
        let record = reopened
            .get_entity(EntityKind::Item, &item.item_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.version, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upsert_preserves_control_fields() {
        let (store, clock) = store_with_clock().await;
        let mut item = Item::new("acct", Some("proj".to_string()), "Sofa");

        let created = store.upsert_entity(item_write(&item)).await.unwrap();
        assert_eq!(created.version, 1);
        assert!(created.last_synced_at.is_none());

        let synced_at = clock.now();
        store
            .upsert_entity(item_write(&item).with_version(4).synced_at(synced_at))
            .await
            .unwrap();

        item.notes = Some("scratched leg".to_string());
        let partial = store.upsert_entity(item_write(&item)).await.unwrap();
        assert_eq!(partial.version, 4);
        assert_eq!(partial.last_synced_at, Some(synced_at));
        assert_eq!(partial.data, EntityData::Item(item.clone()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upsert_never_regresses_version() {
        let (store, _) = store_with_clock().await;
        let item = Item::new("acct", None, "Sofa");

        let mut versions = Vec::new();
        for supplied in [Some(3), Some(2), None, Some(7), Some(1)] {
            let mut write = item_write(&item);
            write.version = supplied;
            versions.push(store.upsert_entity(write).await.unwrap().version);
        }
        assert_eq!(versions, vec![3, 3, 3, 7, 7]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mark_entity_synced_uses_clock() {
        let (store, clock) = store_with_clock().await;
        let item = Item::new("acct", None, "Sofa");
        store.upsert_entity(item_write(&item)).await.unwrap();

        clock.advance(Duration::seconds(30));
        assert!(store
            .mark_entity_synced(EntityKind::Item, &item.item_id, Some(1))
            .await
            .unwrap());

        let record = store
            .get_entity(EntityKind::Item, &item.item_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.last_synced_at, Some(start() + Duration::seconds(30)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_record_operation_failure_returns_updated() {
        let (store, _) = store_with_clock().await;
        let op = operation("acct");
        store.put_operation(&op).await.unwrap();

        let failed = store
            .record_operation_failure(&op.id, "offline", FailureKind::Transient)
            .await
            .unwrap();
        assert_eq!(failed.retry_count, 1);

        store.delete_operation(&op.id).await.unwrap();
        let error = store
            .record_operation_failure(&op.id, "offline", FailureKind::Transient)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replace_operations_for_account_is_scoped() {
        let (store, _) = store_with_clock().await;
        let stale = operation("a");
        let other = operation("b");
        store.put_operation(&stale).await.unwrap();
        store.put_operation(&other).await.unwrap();

        let fresh = vec![operation("a"), operation("a")];
        store
            .replace_operations_for_account("a", &fresh)
            .await
            .unwrap();

        let a_ids: Vec<_> = store
            .list_operations(Some("a"))
            .await
            .unwrap()
            .into_iter()
            .map(|op| op.id)
            .collect();
        assert_eq!(a_ids.len(), 2);
        assert!(!a_ids.contains(&stale.id));
        assert_eq!(store.count_operations(Some("b")).await.unwrap(), 1);

        let error = store
            .replace_operations_for_account("a", &[operation("b")])
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
        assert_eq!(store.count_operations(Some("a")).await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replace_conflicts_for_scope_swaps_batch() {
        let (store, _) = store_with_clock().await;
        let previous = conflict("acct", "proj");
        let unrelated = conflict("acct", "elsewhere");
        store
            .put_conflicts(&[previous.clone(), unrelated.clone()])
            .await
            .unwrap();

        let fresh = conflict("acct", "proj");
        let cleared = store
            .replace_conflicts_for_scope(&Scope::project("acct", "proj"), &[], &[fresh.clone()])
            .await
            .unwrap();
        assert_eq!(cleared, 1);

        let ids: Vec<_> = store
            .list_conflicts(Some("acct"), true)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&fresh.id));
        assert!(ids.contains(&unrelated.id));
        assert!(store.get_conflict(&previous.id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mark_conflict_resolved_requires_existing() {
        let (store, clock) = store_with_clock().await;
        let stored = conflict("acct", "proj");
        store.put_conflicts(&[stored.clone()]).await.unwrap();

        let resolution = Resolution {
            strategy: ResolutionStrategy::KeepLocal,
            automatic: false,
            resolved_at: clock.now(),
            version: 2,
        };
        store
            .mark_conflict_resolved(&stored.id, &resolution)
            .await
            .unwrap();
        assert!(store
            .list_conflicts(Some("acct"), true)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.purge_resolved_conflicts(None).await.unwrap(), 1);

        let error = store
            .mark_conflict_resolved(&stored.id, &resolution)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cache_expires_lazily() {
        let (store, clock) = store_with_clock().await;
        store
            .cache_set("vendors:acct", &vec!["Acme"], Some(Duration::seconds(60)))
            .await
            .unwrap();
        store
            .cache_set("presets:acct", &vec![7.25], None)
            .await
            .unwrap();

        let fresh: Option<Vec<String>> = store.cache_get("vendors:acct").await.unwrap();
        assert_eq!(fresh, Some(vec!["Acme".to_string()]));

        clock.advance(Duration::seconds(61));
        assert!(store.cache_peek("vendors:acct").await.unwrap().is_some());
        let expired: Option<Vec<String>> = store.cache_get("vendors:acct").await.unwrap();
        assert!(expired.is_none());
        assert!(store.cache_peek("vendors:acct").await.unwrap().is_none());

        let kept: Option<Vec<f64>> = store.cache_get("presets:acct").await.unwrap();
        assert_eq!(kept, Some(vec![7.25]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_purge_expired_cache() {
        let (store, clock) = store_with_clock().await;
        store
            .cache_set("a", &1, Some(Duration::seconds(5)))
            .await
            .unwrap();
        store
            .cache_set("b", &2, Some(Duration::hours(1)))
            .await
            .unwrap();

        clock.advance(Duration::seconds(10));
        assert_eq!(store.purge_expired_cache().await.unwrap(), 1);
        assert!(store.cache_delete("b").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_context_round_trip() {
        let (store, _) = store_with_clock().await;
        let context = ScopeContext {
            account_id: Some("acct".to_string()),
            user_id: None,
            project_id: Some("proj".to_string()),
        };
        store.save_context(&context).await.unwrap();
        assert_eq!(store.load_context().await.unwrap(), context);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_media_quota_rejects_before_write() {
        let config = EngineConfig {
            media_quota_bytes: 1_000,
            ..EngineConfig::default()
        };
        let store = LocalStore::with_config(&config);
        store.init_in_memory().await.unwrap();

        let first = MediaBlob::new("acct", "a.jpg", "image/jpeg", vec![0; 900]).unwrap();
        let usage = store.save_media(&first).await.unwrap();
        assert_eq!(usage.used_bytes, 900);
        assert_eq!(usage.remaining_bytes(), 100);

        let too_big = MediaBlob::new("acct", "b.jpg", "image/jpeg", vec![0; 200]).unwrap();
        let error = store.save_media(&too_big).await.unwrap_err();
        assert!(matches!(
            error,
            Error::QuotaExceeded {
                usage: 900,
                requested: 200,
                quota: 1_000
            }
        ));
        assert!(store.get_media(&too_big.id).await.unwrap().is_none());
        assert_eq!(store.media_usage(None).await.unwrap().used_bytes, 900);

        let exact = MediaBlob::new("acct", "c.jpg", "image/jpeg", vec![0; 100]).unwrap();
        store.save_media(&exact).await.unwrap();
        assert!(store.delete_media(&first.id).await.unwrap());
        assert_eq!(store.media_usage(Some("acct")).await.unwrap().used_bytes, 100);
    }
}
