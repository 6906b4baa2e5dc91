//! Conflict Detector: compare cached entities with the backend's copies.
//!
//! Each pass replaces every earlier conflict for the scope, so the stored
//! set always reflects exactly one comparison.

use chrono::{DateTime, Duration, Utc};

use crate::backend::{Backend, RemoteEntity, RemoteRow};
use crate::config::EngineConfig;
use crate::db::LocalStore;
use crate::error::Result;
use crate::models::{
    Conflict, ConflictId, ConflictSide, ConflictType, EntityKind, EntityRecord, EntityWrite, Scope,
};

use super::equality::deep_equal;

/// Entity kinds compared during detection
pub const DETECTED_KINDS: [EntityKind; 2] = [EntityKind::Item, EntityKind::Transaction];

/// Recency windows and skew tolerance used to filter in-flight writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionWindows {
    pub recent_sync: Duration,
    pub recent_write: Duration,
    pub clock_skew: Duration,
}

impl Default for DetectionWindows {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for DetectionWindows {
    fn from(config: &EngineConfig) -> Self {
        Self {
            recent_sync: config.recent_sync_window(),
            recent_write: config.recent_write_window(),
            clock_skew: config.clock_skew_tolerance(),
        }
    }
}

/// How a single local entity compares with its remote counterpart
#[derive(Debug)]
enum Comparison {
    Skipped,
    LocalOnly,
    Equal,
    /// Same content, different version bookkeeping
    VersionDrift { remote_version: i64 },
    Diverged(Conflict),
}

pub struct ConflictDetector<B> {
    store: LocalStore,
    backend: B,
    windows: DetectionWindows,
}

impl<B: Backend> ConflictDetector<B> {
    pub const fn new(store: LocalStore, backend: B, windows: DetectionWindows) -> Self {
        Self {
            store,
            backend,
            windows,
        }
    }

    /// Run one detection pass over `scope` and persist the result.
    ///
    /// Backend or store failures for the scope as a whole are returned;
    /// a single undecodable or unreconcilable entity is logged and skipped.
    pub async fn detect(&self, scope: &Scope) -> Result<Vec<Conflict>> {
        let now = self.store.now();
        let mut item_ids = Vec::new();
        let mut conflicts = Vec::new();

        for kind in DETECTED_KINDS {
            let local = self.store.list_entities(kind, scope).await?;
            let remote = self.backend.list(kind, scope).await?;
            item_ids.extend(local.iter().map(|record| record.business_id().to_string()));

            for record in &local {
                let remote_row = remote.iter().find(|row| {
                    business_id_of(kind, row) == Some(record.business_id())
                });
                match self.compare(kind, record, remote_row, now) {
                    Comparison::Diverged(conflict) => conflicts.push(conflict),
                    Comparison::VersionDrift { remote_version } => {
                        self.reconcile_version(record, remote_version, now).await;
                    }
                    Comparison::Skipped | Comparison::LocalOnly | Comparison::Equal => {}
                }
            }
        }

        let replaced = self
            .store
            .replace_conflicts_for_scope(scope, &item_ids, &conflicts)
            .await?;

        tracing::info!(
            account_id = %scope.account_id,
            project_id = scope.project_id.as_deref().unwrap_or("-"),
            detected = conflicts.len(),
            replaced,
            "Conflict detection finished"
        );
        Ok(conflicts)
    }

    fn compare(
        &self,
        kind: EntityKind,
        local: &EntityRecord,
        remote_row: Option<&RemoteRow>,
        now: DateTime<Utc>,
    ) -> Comparison {
        let item_id = local.business_id();

        // Never confirmed by the backend; its create may still be queued.
        let Some(synced_at) = local.last_synced_at else {
            return Comparison::Skipped;
        };
        if now - synced_at <= self.windows.recent_sync
            || now - local.last_updated <= self.windows.recent_write
        {
            tracing::debug!(item_id, "Skipping recently written entity");
            return Comparison::Skipped;
        }

        let Some(remote_row) = remote_row else {
            return Comparison::LocalOnly;
        };
        let remote = match RemoteEntity::from_row(kind, remote_row) {
            Ok(remote) => remote,
            Err(error) => {
                tracing::warn!(item_id, "Skipping undecodable remote {kind}: {error}");
                return Comparison::Skipped;
            }
        };

        let differing_field = local
            .data
            .mutable_fields()
            .into_iter()
            .find(|field| {
                !deep_equal(Some(&field.value), remote.data.field_value(field.local).as_ref())
            })
            .map(|field| field.local.to_string());

        let version_differs = local.version != remote.version;
        let Some(field) = differing_field else {
            return if version_differs {
                Comparison::VersionDrift {
                    remote_version: remote.version,
                }
            } else {
                Comparison::Equal
            };
        };

        let time_differs = remote.last_updated - local.last_updated > self.windows.clock_skew;
        let conflict_type = if version_differs {
            ConflictType::Version
        } else if time_differs {
            ConflictType::Timestamp
        } else {
            ConflictType::Content
        };

        Comparison::Diverged(Conflict {
            id: ConflictId::new(),
            item_id: item_id.to_string(),
            entity_kind: kind,
            account_id: local.data.account_id().to_string(),
            project_id: local.data.project_id().map(ToString::to_string),
            conflict_type,
            field: Some(field),
            local: ConflictSide {
                data: local.data.clone(),
                timestamp: local.last_updated,
                version: local.version,
            },
            server: ConflictSide {
                data: remote.data,
                timestamp: remote.last_updated,
                version: remote.version,
            },
            resolved: false,
            resolution: None,
            created_at: now,
        })
    }

    async fn reconcile_version(
        &self,
        local: &EntityRecord,
        remote_version: i64,
        now: DateTime<Utc>,
    ) {
        let version = local.version.max(remote_version);
        let write = EntityWrite::new(local.data.clone(), local.last_updated)
            .with_version(version)
            .synced_at(now);
        match self.store.upsert_entity(write).await {
            Ok(_) => tracing::debug!(
                item_id = local.business_id(),
                from = local.version,
                to = version,
                "Reconciled version drift"
            ),
            Err(error) => tracing::warn!(
                item_id = local.business_id(),
                "Failed to reconcile version drift: {error}"
            ),
        }
    }
}

fn business_id_of(kind: EntityKind, row: &RemoteRow) -> Option<&str> {
    row.get(kind.business_key()).and_then(serde_json::Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::clock::ManualClock;
    use crate::models::{EntityData, Item, Transaction};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    struct Fixture {
        store: LocalStore,
        backend: MemoryBackend,
        clock: Arc<ManualClock>,
        detector: ConflictDetector<MemoryBackend>,
    }

    fn t0() -> DateTime<Utc> {
        crate::util::parse_timestamp("2024-06-01T10:00:00.000Z").unwrap()
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = LocalStore::new().with_clock(clock.clone());
        store.init_in_memory().await.unwrap();
        let backend = MemoryBackend::new();
        let detector =
            ConflictDetector::new(store.clone(), backend.clone(), DetectionWindows::default());
        Fixture {
            store,
            backend,
            clock,
            detector,
        }
    }

    fn item(name: &str) -> Item {
        let mut item = Item::new("acct", Some("proj".to_string()), name);
        item.date_created = None;
        item
    }

    /// Local copy synced at t0, backend copy at `remote_version`; clock moved past the windows.
    async fn seed(fx: &Fixture, local: &Item, version: i64, remote: &Item, remote_version: i64) {
        let data = EntityData::Item(local.clone());
        fx.store
            .put_entity(&EntityRecord {
                data,
                version,
                last_updated: t0(),
                last_synced_at: Some(t0()),
            })
            .await
            .unwrap();
        fx.backend.insert_row(
            EntityKind::Item,
            EntityData::Item(remote.clone()).to_remote_create(remote_version, &t0()),
        );
        fx.clock.advance(Duration::seconds(30));
    }

    fn scope() -> Scope {
        Scope::project("acct", "proj")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_version_conflict_when_content_differs() {
        let fx = fixture().await;
        let local = item("Sofa");
        let mut remote = local.clone();
        remote.name = "Sofa (restored)".to_string();
        seed(&fx, &local, 3, &remote, 5).await;

        let conflicts = fx.detector.detect(&scope()).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::Version);
        assert_eq!(conflicts[0].field.as_deref(), Some("name"));
        assert_eq!(conflicts[0].server.version, 5);

        let stored = fx.store.list_conflicts(Some("acct"), true).await.unwrap();
        assert_eq!(stored, conflicts);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_identical_content_reconciles_version_silently() {
        let fx = fixture().await;
        let local = item("Sofa");
        seed(&fx, &local, 3, &local, 5).await;

        let conflicts = fx.detector.detect(&scope()).await.unwrap();
        assert!(conflicts.is_empty());

        let record = fx
            .store
            .get_entity(EntityKind::Item, &local.item_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.version, 5);
        assert_eq!(record.last_synced_at, Some(t0() + Duration::seconds(30)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_content_conflict_reports_first_differing_field() {
        let fx = fixture().await;
        let local = item("Sofa");
        let mut remote = local.clone();
        remote.sku = Some("SKU-9".to_string());
        remote.notes = Some("scuffed".to_string());
        seed(&fx, &local, 2, &remote, 2).await;

        let conflicts = fx.detector.detect(&scope()).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::Content);
        assert_eq!(conflicts[0].field.as_deref(), Some("sku"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timestamp_conflict_needs_lead_beyond_skew() {
        let fx = fixture().await;
        let local = item("Sofa");
        let mut remote = local.clone();
        remote.notes = Some("moved to storage".to_string());
        fx.store
            .put_entity(&EntityRecord {
                data: EntityData::Item(local.clone()),
                version: 2,
                last_updated: t0(),
                last_synced_at: Some(t0()),
            })
            .await
            .unwrap();
        fx.backend.insert_row(
            EntityKind::Item,
            EntityData::Item(remote).to_remote_create(2, &(t0() + Duration::seconds(11))),
        );
        fx.clock.advance(Duration::minutes(1));

        let conflicts = fx.detector.detect(&scope()).await.unwrap();
        assert_eq!(conflicts[0].conflict_type, ConflictType::Timestamp);
        assert_eq!(conflicts[0].field.as_deref(), Some("notes"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_recently_synced_entity_is_suppressed() {
        let fx = fixture().await;
        let local = item("Sofa");
        let mut remote = local.clone();
        remote.name = "Chair".to_string();
        fx.store
            .put_entity(&EntityRecord {
                data: EntityData::Item(local),
                version: 1,
                last_updated: t0(),
                last_synced_at: Some(t0()),
            })
            .await
            .unwrap();
        fx.backend
            .insert_row(EntityKind::Item, EntityData::Item(remote).to_remote_create(4, &t0()));
        fx.clock.advance(Duration::seconds(1));

        assert!(fx.detector.detect(&scope()).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_local_only_and_unsynced_entities_are_not_conflicts() {
        let fx = fixture().await;
        let synced_local_only = item("Lamp");
        fx.store
            .put_entity(&EntityRecord {
                data: EntityData::Item(synced_local_only),
                version: 1,
                last_updated: t0(),
                last_synced_at: Some(t0()),
            })
            .await
            .unwrap();

        let pending = item("Rug");
        let mut remote = pending.clone();
        remote.name = "Runner".to_string();
        fx.store
            .put_entity(&EntityRecord {
                data: EntityData::Item(pending),
                version: 1,
                last_updated: t0(),
                last_synced_at: None,
            })
            .await
            .unwrap();
        fx.backend
            .insert_row(EntityKind::Item, EntityData::Item(remote).to_remote_create(1, &t0()));
        fx.clock.advance(Duration::minutes(1));

        assert!(fx.detector.detect(&scope()).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_detection_replaces_previous_pass() {
        let fx = fixture().await;
        let local = item("Sofa");
        let mut remote = local.clone();
        remote.name = "Sofa (restored)".to_string();
        seed(&fx, &local, 3, &remote, 5).await;
        fx.detector.detect(&scope()).await.unwrap();

        // Backend now agrees with the local copy.
        fx.backend.insert_row(
            EntityKind::Item,
            EntityData::Item(local).to_remote_create(3, &t0()),
        );
        let conflicts = fx.detector.detect(&scope()).await.unwrap();
        assert!(conflicts.is_empty());
        assert!(fx.store.list_conflicts(Some("acct"), false).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_undecodable_remote_row_is_skipped() {
        let fx = fixture().await;
        let good = item("Sofa");
        let mut good_remote = good.clone();
        good_remote.name = "Settee".to_string();
        seed(&fx, &good, 1, &good_remote, 2).await;

        let mut transaction = Transaction::new("acct", Some("proj".to_string()));
        transaction.created_at = None;
        fx.store
            .put_entity(&EntityRecord {
                data: EntityData::Transaction(transaction.clone()),
                version: 1,
                last_updated: t0(),
                last_synced_at: Some(t0()),
            })
            .await
            .unwrap();
        let mut broken = RemoteRow::new();
        broken.insert("transaction_id".into(), transaction.transaction_id.clone().into());
        broken.insert("account_id".into(), "acct".into());
        broken.insert("project_id".into(), "proj".into());
        broken.insert("item_ids".into(), "not-a-list".into());
        fx.backend.insert_row(EntityKind::Transaction, broken);

        let conflicts = fx.detector.detect(&scope()).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].item_id, good.item_id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_corrupt_local_row_does_not_hide_conflicts() {
        let fx = fixture().await;
        let local = item("Sofa");
        let mut remote = local.clone();
        remote.name = "Settee".to_string();
        seed(&fx, &local, 1, &remote, 2).await;

        {
            let db = fx.store.database().await.unwrap();
            db.connection()
                .execute(
                    "INSERT INTO entities (
                        kind, business_id, account_id, project_id, data,
                        version, last_updated, last_synced_at
                    ) VALUES ('item', 'corrupt', 'acct', 'proj', ?, 1, ?, ?)",
                    libsql::params![
                        r#"{"kind":"item","data":{"itemId":1}}"#,
                        "2024-06-01T10:00:00.000Z",
                        "2024-06-01T10:00:00.000Z"
                    ],
                )
                .await
                .unwrap();
        }

        let conflicts = fx.detector.detect(&scope()).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].item_id, local.item_id);
        assert_eq!(conflicts[0].field.as_deref(), Some("name"));
    }
}
