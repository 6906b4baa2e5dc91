//! Conflict record repository implementation

use libsql::params::Params;
use libsql::{params, Connection, Row, Value};

use crate::error::{Error, Result};
use crate::models::{Conflict, ConflictId, ConflictSide, EntityKind, Resolution};
use crate::util::{format_timestamp, parse_timestamp};

const COLUMNS: &str = "id, account_id, project_id, item_id, entity_kind, conflict_type, \
                       field, local, server, resolved, resolution, created_at";

/// libSQL access to the `conflicts` collection
pub struct LibSqlConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub async fn put(&self, conflict: &Conflict) -> Result<()> {
        let local = serde_json::to_string(&conflict.local)?;
        let server = serde_json::to_string(&conflict.server)?;
        let resolution = conflict
            .resolution
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO conflicts ({COLUMNS})
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                params![
                    conflict.id.as_str(),
                    conflict.account_id.as_str(),
                    conflict.project_id.clone(),
                    conflict.item_id.as_str(),
                    conflict.entity_kind.as_str(),
                    conflict.conflict_type.as_str(),
                    conflict.field.clone(),
                    local,
                    server,
                    i64::from(conflict.resolved),
                    resolution,
                    format_timestamp(&conflict.created_at)
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn get(&self, id: &ConflictId) -> Result<Option<Conflict>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {COLUMNS} FROM conflicts WHERE id = ?"),
                params![id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_conflict(&row)?)),
            None => Ok(None),
        }
    }

    /// Conflicts oldest first, optionally filtered by account and state.
    pub async fn list(
        &self,
        account_id: Option<&str>,
        unresolved_only: bool,
    ) -> Result<Vec<Conflict>> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(account_id) = account_id {
            clauses.push("account_id = ?");
            values.push(Value::Text(account_id.to_string()));
        }
        if unresolved_only {
            clauses.push("resolved = 0");
        }
        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {COLUMNS} FROM conflicts {filter}
                     ORDER BY created_at ASC, id ASC"
                ),
                Params::Positional(values),
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(Self::parse_conflict(&row)?);
        }
        Ok(conflicts)
    }

    /// Delete every conflict for an account scope.
    ///
    /// With a project, matches the project key plus any listed item ids
    /// (conflicts recorded under an older project key for the same items).
    /// Without one, clears the whole account.
    pub async fn clear_for_scope(
        &self,
        account_id: &str,
        project_id: Option<&str>,
        item_ids: &[String],
    ) -> Result<u64> {
        let mut values = vec![Value::Text(account_id.to_string())];
        let sql = match project_id {
            None => "DELETE FROM conflicts WHERE account_id = ?".to_string(),
            Some(project_id) => {
                values.push(Value::Text(project_id.to_string()));
                let mut scope = "project_id = ?".to_string();
                if !item_ids.is_empty() {
                    let placeholders = vec!["?"; item_ids.len()].join(", ");
                    scope = format!("{scope} OR item_id IN ({placeholders})");
                    values.extend(item_ids.iter().cloned().map(Value::Text));
                }
                format!("DELETE FROM conflicts WHERE account_id = ? AND ({scope})")
            }
        };

        Ok(self.conn.execute(&sql, Params::Positional(values)).await?)
    }

    pub async fn mark_resolved(&self, id: &ConflictId, resolution: &Resolution) -> Result<bool> {
        let resolution = serde_json::to_string(resolution)?;
        let affected = self
            .conn
            .execute(
                "UPDATE conflicts SET resolved = 1, resolution = ? WHERE id = ?",
                params![resolution, id.as_str()],
            )
            .await?;
        Ok(affected > 0)
    }

    pub async fn purge_resolved(&self, account_id: Option<&str>) -> Result<u64> {
        let affected = match account_id {
            Some(account_id) => {
                self.conn
                    .execute(
                        "DELETE FROM conflicts WHERE resolved = 1 AND account_id = ?",
                        params![account_id],
                    )
                    .await?
            }
            None => {
                self.conn
                    .execute("DELETE FROM conflicts WHERE resolved = 1", ())
                    .await?
            }
        };
        Ok(affected)
    }

    fn parse_conflict(row: &Row) -> Result<Conflict> {
        let id: String = row.get(0)?;
        let entity_kind: String = row.get(4)?;
        let conflict_type: String = row.get(5)?;
        let local: String = row.get(7)?;
        let server: String = row.get(8)?;
        let resolved: i64 = row.get(9)?;
        let resolution: Option<String> = row.get(10)?;
        let created_at: String = row.get(11)?;

        Ok(Conflict {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid conflict id '{id}'")))?,
            account_id: row.get(1)?,
            project_id: row.get(2)?,
            item_id: row.get(3)?,
            entity_kind: entity_kind.parse::<EntityKind>()?,
            conflict_type: conflict_type.parse()?,
            field: row.get(6)?,
            local: serde_json::from_str::<ConflictSide>(&local)?,
            server: serde_json::from_str::<ConflictSide>(&server)?,
            resolved: resolved != 0,
            resolution: resolution
                .as_deref()
                .map(serde_json::from_str::<Resolution>)
                .transpose()?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}
