//! Outbox operation repository implementation

use libsql::{params, Connection, Row};

use crate::error::{Error, Result};
use crate::models::{FailureKind, Mutation, Operation, OperationId};
use crate::util::{format_timestamp, parse_timestamp};

const COLUMNS: &str = "id, op_type, account_id, data, version, timestamp, retry_count, \
     last_error, failure_kind, permanent_failures";

/// libSQL access to the `operations` collection
pub struct LibSqlOperationRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlOperationRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub async fn put(&self, operation: &Operation) -> Result<()> {
        let data = serde_json::to_string(&operation.data)?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO operations (
                    id, op_type, account_id, entity_kind, business_id, data,
                    version, timestamp, retry_count, last_error, failure_kind,
                    permanent_failures
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    operation.id.as_str(),
                    operation.op_type.as_str(),
                    operation.account_id.as_str(),
                    operation.entity_kind().as_str(),
                    operation.business_id(),
                    data,
                    operation.version,
                    format_timestamp(&operation.timestamp),
                    i64::from(operation.retry_count),
                    operation.last_error.clone(),
                    operation.failure_kind.map(FailureKind::as_str),
                    i64::from(operation.permanent_failures)
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn get(&self, id: &OperationId) -> Result<Option<Operation>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {COLUMNS} FROM operations WHERE id = ?"),
                params![id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_operation(&row)?)),
            None => Ok(None),
        }
    }

    /// Pending operations in replay order: `(account_id, timestamp, id)`.
    pub async fn list(&self, account_id: Option<&str>) -> Result<Vec<Operation>> {
        let mut rows = match account_id {
            Some(account_id) => {
                self.conn
                    .query(
                        &format!(
                            "SELECT {COLUMNS} FROM operations
                             WHERE account_id = ?
                             ORDER BY timestamp ASC, id ASC"
                        ),
                        params![account_id],
                    )
                    .await?
            }
            None => {
                self.conn
                    .query(
                        &format!(
                            "SELECT {COLUMNS} FROM operations
                             ORDER BY account_id ASC, timestamp ASC, id ASC"
                        ),
                        (),
                    )
                    .await?
            }
        };

        let mut operations = Vec::new();
        while let Some(row) = rows.next().await? {
            operations.push(Self::parse_operation(&row)?);
        }
        Ok(operations)
    }

    pub async fn record_failure(
        &self,
        id: &OperationId,
        error: &str,
        kind: FailureKind,
    ) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "UPDATE operations
                 SET retry_count = retry_count + 1,
                     permanent_failures = permanent_failures + ?,
                     last_error = ?,
                     failure_kind = ?
                 WHERE id = ?",
                params![
                    i64::from(kind == FailureKind::Permanent),
                    error,
                    kind.as_str(),
                    id.as_str()
                ],
            )
            .await?;
        Ok(affected > 0)
    }

    pub async fn reset_retries(&self, id: &OperationId) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "UPDATE operations
                 SET retry_count = 0, permanent_failures = 0,
                     last_error = NULL, failure_kind = NULL
                 WHERE id = ?",
                params![id.as_str()],
            )
            .await?;
        Ok(affected > 0)
    }

    pub async fn delete(&self, id: &OperationId) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM operations WHERE id = ?", params![id.as_str()])
            .await?;
        Ok(affected > 0)
    }

    pub async fn delete_for_account(&self, account_id: &str) -> Result<u64> {
        Ok(self
            .conn
            .execute(
                "DELETE FROM operations WHERE account_id = ?",
                params![account_id],
            )
            .await?)
    }

    pub async fn count(&self, account_id: Option<&str>) -> Result<u64> {
        let mut rows = match account_id {
            Some(account_id) => {
                self.conn
                    .query(
                        "SELECT COUNT(*) FROM operations WHERE account_id = ?",
                        params![account_id],
                    )
                    .await?
            }
            None => {
                self.conn
                    .query("SELECT COUNT(*) FROM operations", ())
                    .await?
            }
        };

        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn parse_operation(row: &Row) -> Result<Operation> {
        let id: String = row.get(0)?;
        let op_type: String = row.get(1)?;
        let data: String = row.get(3)?;
        let timestamp: String = row.get(5)?;
        let retry_count: i64 = row.get(6)?;
        let failure_kind: Option<String> = row.get(8)?;
        let permanent_failures: i64 = row.get(9)?;

        Ok(Operation {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid operation id '{id}'")))?,
            op_type: op_type.parse()?,
            account_id: row.get(2)?,
            data: serde_json::from_str::<Mutation>(&data)?,
            version: row.get(4)?,
            timestamp: parse_timestamp(&timestamp)?,
            retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
            permanent_failures: u32::try_from(permanent_failures).unwrap_or(u32::MAX),
            last_error: row.get(7)?,
            failure_kind: failure_kind.as_deref().and_then(FailureKind::parse),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{EntityData, Item, OperationMeta};
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn operation(account_id: &str, offset_secs: i64) -> Operation {
        let item = Item::new(account_id, None, "Sofa");
        Operation::new(
            Mutation::Create(EntityData::Item(item)),
            OperationMeta {
                account_id: account_id.to_string(),
                version: 1,
                timestamp: crate::util::parse_timestamp("2024-06-01T10:00:00.000Z").unwrap()
                    + Duration::seconds(offset_secs),
            },
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_and_get_round_trip() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlOperationRepository::new(db.connection());

        let op = operation("acct", 0);
        repo.put(&op).await.unwrap();

        assert_eq!(repo.get(&op.id).await.unwrap(), Some(op));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_orders_by_account_then_timestamp() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlOperationRepository::new(db.connection());

        let b_late = operation("b", 20);
        let a_late = operation("a", 30);
        let b_early = operation("b", 10);
        let a_early = operation("a", 5);
        for op in [&b_late, &a_late, &b_early, &a_early] {
            repo.put(op).await.unwrap();
        }

        let ids: Vec<_> = repo
            .list(None)
            .await
            .unwrap()
            .into_iter()
            .map(|op| op.id)
            .collect();
        assert_eq!(ids, vec![a_early.id, a_late.id, b_early.id, b_late.id]);

        let only_b: Vec<_> = repo
            .list(Some("b"))
            .await
            .unwrap()
            .into_iter()
            .map(|op| op.id)
            .collect();
        assert_eq!(only_b, vec![b_early.id, b_late.id]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_record_failure_and_reset() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlOperationRepository::new(db.connection());

        let op = operation("acct", 0);
        repo.put(&op).await.unwrap();
        repo.record_failure(&op.id, "HTTP 422", FailureKind::Permanent)
            .await
            .unwrap();
        repo.record_failure(&op.id, "HTTP 422", FailureKind::Permanent)
            .await
            .unwrap();

        repo.record_failure(&op.id, "HTTP 503", FailureKind::Transient)
            .await
            .unwrap();

        let failed = repo.get(&op.id).await.unwrap().unwrap();
        assert_eq!(failed.retry_count, 3);
        assert_eq!(failed.permanent_failures, 2);
        assert_eq!(failed.last_error.as_deref(), Some("HTTP 503"));
        assert_eq!(failed.failure_kind, Some(FailureKind::Transient));

        assert!(repo.reset_retries(&op.id).await.unwrap());
        let reset = repo.get(&op.id).await.unwrap().unwrap();
        assert_eq!(reset.retry_count, 0);
        assert_eq!(reset.permanent_failures, 0);
        assert!(reset.last_error.is_none());
        assert!(reset.failure_kind.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_count_and_delete() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlOperationRepository::new(db.connection());

        let first = operation("a", 0);
        repo.put(&first).await.unwrap();
        repo.put(&operation("b", 0)).await.unwrap();
        assert_eq!(repo.count(None).await.unwrap(), 2);
        assert_eq!(repo.count(Some("a")).await.unwrap(), 1);

        assert!(repo.delete(&first.id).await.unwrap());
        assert!(!repo.delete(&first.id).await.unwrap());
        assert_eq!(repo.count(None).await.unwrap(), 1);
    }
}
