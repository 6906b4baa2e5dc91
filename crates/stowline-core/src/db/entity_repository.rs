//! Entity repository implementation

use libsql::{params, Connection, Row};

use crate::error::Result;
use crate::models::{EntityData, EntityKind, EntityRecord, Scope};
use crate::util::{format_timestamp, parse_timestamp};

const COLUMNS: &str = "data, version, last_updated, last_synced_at, business_id";

/// libSQL access to the `entities` collection
pub struct LibSqlEntityRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlEntityRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert or replace a record; the stored version never decreases.
    pub async fn put(&self, record: &EntityRecord) -> Result<()> {
        let data = serde_json::to_string(&record.data)?;
        self.conn
            .execute(
                "INSERT INTO entities (
                    kind, business_id, account_id, project_id, data,
                    version, last_updated, last_synced_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(kind, business_id) DO UPDATE SET
                    account_id = excluded.account_id,
                    project_id = excluded.project_id,
                    data = excluded.data,
                    version = MAX(entities.version, excluded.version),
                    last_updated = excluded.last_updated,
                    last_synced_at = excluded.last_synced_at",
                params![
                    record.kind().as_str(),
                    record.business_id(),
                    record.data.account_id(),
                    record.data.project_id(),
                    data,
                    record.version,
                    format_timestamp(&record.last_updated),
                    record.last_synced_at.as_ref().map(format_timestamp)
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn get(&self, kind: EntityKind, business_id: &str) -> Result<Option<EntityRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {COLUMNS} FROM entities WHERE kind = ? AND business_id = ?"),
                params![kind.as_str(), business_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(&row)?)),
            None => Ok(None),
        }
    }

    /// Entities of one kind inside a scope, via the account/project indexes.
    pub async fn list(&self, kind: EntityKind, scope: &Scope) -> Result<Vec<EntityRecord>> {
        let mut rows = match scope.project_id.as_deref() {
            Some(project_id) => {
                self.conn
                    .query(
                        &format!(
                            "SELECT {COLUMNS} FROM entities
                             WHERE account_id = ? AND project_id = ? AND kind = ?
                             ORDER BY business_id"
                        ),
                        params![scope.account_id.as_str(), project_id, kind.as_str()],
                    )
                    .await?
            }
            None => {
                self.conn
                    .query(
                        &format!(
                            "SELECT {COLUMNS} FROM entities
                             WHERE account_id = ? AND kind = ?
                             ORDER BY business_id"
                        ),
                        params![scope.account_id.as_str(), kind.as_str()],
                    )
                    .await?
            }
        };

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            match Self::parse_record(&row) {
                Ok(record) => records.push(record),
                Err(error) => {
                    let business_id = row.get::<String>(4).unwrap_or_default();
                    tracing::warn!(
                        kind = kind.as_str(),
                        business_id = %business_id,
                        "Skipping undecodable local entity: {error}"
                    );
                }
            }
        }
        Ok(records)
    }

    pub async fn delete(&self, kind: EntityKind, business_id: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM entities WHERE kind = ? AND business_id = ?",
                params![kind.as_str(), business_id],
            )
            .await?;
        Ok(affected > 0)
    }

    /// Stamp `last_synced_at`, optionally only when the stored version matches.
    pub async fn mark_synced(
        &self,
        kind: EntityKind,
        business_id: &str,
        expected_version: Option<i64>,
        synced_at: &str,
    ) -> Result<bool> {
        let affected = match expected_version {
            Some(version) => {
                self.conn
                    .execute(
                        "UPDATE entities SET last_synced_at = ?
                         WHERE kind = ? AND business_id = ? AND version = ?",
                        params![synced_at, kind.as_str(), business_id, version],
                    )
                    .await?
            }
            None => {
                self.conn
                    .execute(
                        "UPDATE entities SET last_synced_at = ?
                         WHERE kind = ? AND business_id = ?",
                        params![synced_at, kind.as_str(), business_id],
                    )
                    .await?
            }
        };
        Ok(affected > 0)
    }

    fn parse_record(row: &Row) -> Result<EntityRecord> {
        let data: String = row.get(0)?;
        let last_updated: String = row.get(2)?;
        let last_synced_at: Option<String> = row.get(3)?;

        Ok(EntityRecord {
            data: serde_json::from_str::<EntityData>(&data)?,
            version: row.get(1)?,
            last_updated: parse_timestamp(&last_updated)?,
            last_synced_at: last_synced_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
        })
    }
}
