//! Conflict Resolver: pick and apply one outcome per detected conflict.

use chrono::Duration;
use serde_json::Value;

use crate::backend::Backend;
use crate::config::EngineConfig;
use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::models::{
    Conflict, ConflictId, ConflictType, EntityData, EntityRecord, MergeInstructions, Resolution,
    ResolutionChoice, ResolutionStrategy,
};

/// Field whose local value wins automatically
pub const NON_CRITICAL_FIELD: &str = "notes";

/// Free-text fields filled from the other side when the preferred side is empty
pub const FREE_TEXT_FIELDS: [&str; 2] = ["notes", "description"];

/// Outcome of [`ConflictResolver::resolve_all_automatic`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveReport {
    pub resolved: Vec<ConflictId>,
    /// Conflicts left for an explicit choice
    pub manual: Vec<ConflictId>,
    pub failed: Vec<(ConflictId, String)>,
}

pub struct ConflictResolver<B> {
    store: LocalStore,
    backend: B,
    materiality: Duration,
}

impl<B: Backend> ConflictResolver<B> {
    pub fn new(store: LocalStore, backend: B, config: &EngineConfig) -> Self {
        Self {
            store,
            backend,
            materiality: config.timestamp_materiality(),
        }
    }

    /// Automatic policy; first matching rule wins.
    pub fn suggest(&self, conflict: &Conflict) -> ResolutionStrategy {
        match conflict.conflict_type {
            ConflictType::Version => return ResolutionStrategy::KeepServer,
            ConflictType::Timestamp
                if conflict.server.timestamp - conflict.local.timestamp > self.materiality =>
            {
                return ResolutionStrategy::KeepServer;
            }
            _ => {}
        }
        if conflict.field.as_deref() == Some(NON_CRITICAL_FIELD) {
            ResolutionStrategy::KeepLocal
        } else {
            ResolutionStrategy::Manual
        }
    }

    /// Apply a resolution to the backend, then to the local store.
    ///
    /// Without a `choice` the automatic policy decides, and a conflict it
    /// cannot decide fails with [`Error::ManualResolutionRequired`]. Backend
    /// errors propagate and leave the conflict unresolved.
    pub async fn resolve(
        &self,
        id: &ConflictId,
        choice: Option<ResolutionChoice>,
    ) -> Result<EntityRecord> {
        let conflict = self
            .store
            .get_conflict(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict {id}")))?;
        if conflict.resolved {
            return Err(Error::InvalidInput(format!("conflict {id} is already resolved")));
        }

        let automatic = choice.is_none();
        let choice = match choice {
            Some(choice) => choice,
            None => match self.suggest(&conflict) {
                ResolutionStrategy::KeepLocal => ResolutionChoice::Local,
                ResolutionStrategy::KeepServer => ResolutionChoice::Server,
                ResolutionStrategy::Merge | ResolutionStrategy::Manual => {
                    return Err(Error::ManualResolutionRequired(id.to_string()));
                }
            },
        };

        let data = match &choice {
            ResolutionChoice::Local => conflict.local.data.clone(),
            ResolutionChoice::Server => conflict.server.data.clone(),
            ResolutionChoice::Merge(instructions) => merge(&conflict, instructions)?,
        };

        let current_version = self
            .store
            .get_entity(conflict.entity_kind, &conflict.item_id)
            .await?
            .map_or(conflict.local.version, |record| record.version);
        let version = current_version
            .max(conflict.local.version)
            .max(conflict.server.version)
            + 1;
        let now = self.store.now();

        self.backend
            .update(
                conflict.entity_kind,
                &conflict.account_id,
                &conflict.item_id,
                data.to_remote_update(version, &now),
            )
            .await?;

        let record = EntityRecord {
            data,
            version,
            last_updated: now,
            last_synced_at: Some(now),
        };
        self.store.put_entity(&record).await?;

        let strategy = choice.strategy();
        self.store
            .mark_conflict_resolved(
                id,
                &Resolution {
                    strategy,
                    automatic,
                    resolved_at: now,
                    version,
                },
            )
            .await?;

        tracing::info!(
            conflict_id = %id,
            item_id = %conflict.item_id,
            strategy = %strategy,
            automatic,
            version,
            "Resolved conflict"
        );
        Ok(record)
    }

    /// Resolve every open conflict the automatic policy can decide.
    pub async fn resolve_all_automatic(&self, account_id: Option<&str>) -> Result<ResolveReport> {
        let mut report = ResolveReport::default();
        for conflict in self.store.list_conflicts(account_id, true).await? {
            if self.suggest(&conflict) == ResolutionStrategy::Manual {
                report.manual.push(conflict.id);
                continue;
            }
            match self.resolve(&conflict.id, None).await {
                Ok(_) => report.resolved.push(conflict.id),
                Err(error) => {
                    tracing::warn!(
                        conflict_id = %conflict.id,
                        "Automatic resolution failed: {error}"
                    );
                    report.failed.push((conflict.id, error.to_string()));
                }
            }
        }
        Ok(report)
    }
}

/// Field-level merge starting from the preferred side.
pub fn merge(conflict: &Conflict, instructions: &MergeInstructions) -> Result<EntityData> {
    let other = &conflict.side(instructions.prefer.other()).data;
    let mut merged = conflict.side(instructions.prefer).data.clone();

    for field in &instructions.take_other {
        let value = other.field_value(field).unwrap_or(Value::Null);
        merged.set_field(field, value)?;
    }

    for field in FREE_TEXT_FIELDS {
        let (Some(current), Some(fallback)) = (merged.field_value(field), other.field_value(field))
        else {
            continue;
        };
        if is_blank(&current) && !is_blank(&fallback) {
            merged.set_field(field, fallback)?;
        }
    }
    Ok(merged)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{mapping, BackendError, MemoryBackend};
    use crate::models::{ConflictSide, EntityKind, Item, Side};
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        crate::util::parse_timestamp("2024-06-01T10:00:00.000Z").unwrap()
    }

    fn item(name: &str) -> Item {
        let mut item = Item::new("acct", Some("proj".to_string()), name);
        item.date_created = None;
        item
    }

    fn conflict(
        conflict_type: ConflictType,
        field: &str,
        local: Item,
        local_version: i64,
        server: Item,
        server_version: i64,
    ) -> Conflict {
        Conflict {
            id: ConflictId::new(),
            item_id: local.item_id.clone(),
            entity_kind: EntityKind::Item,
            account_id: "acct".to_string(),
            project_id: Some("proj".to_string()),
            conflict_type,
            field: Some(field.to_string()),
            local: ConflictSide {
                data: EntityData::Item(local),
                timestamp: t0(),
                version: local_version,
            },
            server: ConflictSide {
                data: EntityData::Item(server),
                timestamp: t0(),
                version: server_version,
            },
            resolved: false,
            resolution: None,
            created_at: t0(),
        }
    }

    async fn seeded(
        conflict: &Conflict,
    ) -> (LocalStore, MemoryBackend, ConflictResolver<MemoryBackend>) {
        let store = LocalStore::open_in_memory().await.unwrap();
        let backend = MemoryBackend::new();
        store
            .put_entity(&EntityRecord {
                data: conflict.local.data.clone(),
                version: conflict.local.version,
                last_updated: t0(),
                last_synced_at: Some(t0()),
            })
            .await
            .unwrap();
        backend.insert_row(
            EntityKind::Item,
            conflict
                .server
                .data
                .to_remote_create(conflict.server.version, &t0()),
        );
        store.put_conflicts(std::slice::from_ref(conflict)).await.unwrap();
        let resolver =
            ConflictResolver::new(store.clone(), backend.clone(), &EngineConfig::default());
        (store, backend, resolver)
    }

    #[test]
    fn test_suggest_policy_order() {
        let resolver = ConflictResolver::new(
            LocalStore::new(),
            MemoryBackend::new(),
            &EngineConfig::default(),
        );
        let local = item("Sofa");

        let version = conflict(ConflictType::Version, "notes", local.clone(), 1, local.clone(), 2);
        assert_eq!(resolver.suggest(&version), ResolutionStrategy::KeepServer);

        let mut stale =
            conflict(ConflictType::Timestamp, "name", local.clone(), 1, local.clone(), 1);
        stale.server.timestamp = t0() + Duration::minutes(6);
        assert_eq!(resolver.suggest(&stale), ResolutionStrategy::KeepServer);

        stale.server.timestamp = t0() + Duration::minutes(4);
        assert_eq!(resolver.suggest(&stale), ResolutionStrategy::Manual);

        let notes = conflict(ConflictType::Content, "notes", local.clone(), 1, local.clone(), 1);
        assert_eq!(resolver.suggest(&notes), ResolutionStrategy::KeepLocal);

        let name = conflict(ConflictType::Content, "name", local.clone(), 1, local, 1);
        assert_eq!(resolver.suggest(&name), ResolutionStrategy::Manual);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_version_conflict_resolves_to_server() {
        let local = item("Sofa");
        let mut server = local.clone();
        server.name = "Sofa (restored)".to_string();
        let conflict = conflict(ConflictType::Version, "name", local.clone(), 3, server, 5);
        let (store, backend, resolver) = seeded(&conflict).await;

        let record = resolver.resolve(&conflict.id, None).await.unwrap();
        assert_eq!(record.version, 6);
        assert!(record.last_synced_at.is_some());
        let EntityData::Item(resolved) = &record.data else {
            panic!("expected item");
        };
        assert_eq!(resolved.name, "Sofa (restored)");

        let row = backend.row(EntityKind::Item, &local.item_id).unwrap();
        assert_eq!(mapping::row_version(&row), 6);

        let stored = store.get_conflict(&conflict.id).await.unwrap().unwrap();
        assert!(stored.resolved);
        let resolution = stored.resolution.unwrap();
        assert_eq!(resolution.strategy, ResolutionStrategy::KeepServer);
        assert!(resolution.automatic);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_manual_conflict_requires_choice() {
        let local = item("Sofa");
        let mut server = local.clone();
        server.sku = Some("SKU-1".to_string());
        let conflict = conflict(ConflictType::Content, "sku", local, 2, server, 2);
        let (store, _backend, resolver) = seeded(&conflict).await;

        let error = resolver.resolve(&conflict.id, None).await.unwrap_err();
        assert!(matches!(error, Error::ManualResolutionRequired(_)));

        let record = resolver
            .resolve(&conflict.id, Some(ResolutionChoice::Local))
            .await
            .unwrap();
        assert_eq!(record.version, 3);
        let stored = store.get_conflict(&conflict.id).await.unwrap().unwrap();
        assert!(!stored.resolution.unwrap().automatic);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_backend_failure_leaves_conflict_open() {
        let local = item("Sofa");
        let mut server = local.clone();
        server.name = "Couch".to_string();
        let conflict = conflict(ConflictType::Version, "name", local.clone(), 1, server, 2);
        let (store, backend, resolver) = seeded(&conflict).await;
        backend.fail_next(BackendError::Unavailable("timeout".to_string()));

        let error = resolver.resolve(&conflict.id, None).await.unwrap_err();
        assert!(matches!(error, Error::Backend(BackendError::Unavailable(_))));

        assert!(!store.get_conflict(&conflict.id).await.unwrap().unwrap().resolved);
        let record = store
            .get_entity(EntityKind::Item, &local.item_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.version, 1);
    }

    #[test]
    fn test_merge_takes_overrides_and_fills_blank_free_text() {
        let mut local = item("Sofa");
        local.notes = Some("keep the cushions".to_string());
        local.sku = Some("LOCAL".to_string());
        let mut server = local.clone();
        server.name = "Sofa (restored)".to_string();
        server.notes = None;
        server.sku = Some("SERVER".to_string());
        server.description = "Three-seat".to_string();
        let conflict = conflict(ConflictType::Content, "name", local, 1, server, 1);

        let mut instructions = MergeInstructions::prefer(Side::Server);
        instructions.take_other.push("sku".to_string());
        let EntityData::Item(merged) = merge(&conflict, &instructions).unwrap() else {
            panic!("expected item");
        };

        assert_eq!(merged.name, "Sofa (restored)");
        assert_eq!(merged.sku.as_deref(), Some("LOCAL"));
        assert_eq!(merged.notes.as_deref(), Some("keep the cushions"));
        assert_eq!(merged.description, "Three-seat");
    }

    #[test]
    fn test_merge_rejects_identity_override() {
        let local = item("Sofa");
        let conflict = conflict(ConflictType::Content, "name", local.clone(), 1, local, 1);
        let mut instructions = MergeInstructions::prefer(Side::Local);
        instructions.take_other.push("accountId".to_string());

        assert!(matches!(
            merge(&conflict, &instructions).unwrap_err(),
            Error::InvalidInput(_)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_resolve_all_skips_manual() {
        let local = item("Sofa");
        let mut server = local.clone();
        server.notes = Some("server note".to_string());
        let automatic = conflict(ConflictType::Content, "notes", local.clone(), 1, server, 1);
        let (store, _backend, resolver) = seeded(&automatic).await;

        let other = item("Lamp");
        let mut other_server = other.clone();
        other_server.space = Some("Den".to_string());
        let manual = conflict(ConflictType::Content, "space", other, 1, other_server, 1);
        store.put_conflicts(std::slice::from_ref(&manual)).await.unwrap();

        let report = resolver.resolve_all_automatic(Some("acct")).await.unwrap();
        assert_eq!(report.resolved, vec![automatic.id]);
        assert_eq!(report.manual, vec![manual.id]);
        assert!(report.failed.is_empty());
    }
}
