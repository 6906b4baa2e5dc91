//! Media blob repository implementation

use libsql::{params, Connection, Row};

use crate::error::{Error, Result};
use crate::models::{MediaBlob, MediaId};
use crate::util::{format_timestamp, parse_timestamp};

/// libSQL access to the `media` collection
pub struct LibSqlMediaRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlMediaRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub async fn insert(&self, blob: &MediaBlob) -> Result<()> {
        let size = i64::try_from(blob.size_bytes())
            .map_err(|_| Error::InvalidInput("media blob is too large".to_string()))?;
        self.conn
            .execute(
                "INSERT INTO media (
                    id, account_id, filename, mime_type, size_bytes, data, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    blob.id.as_str(),
                    blob.account_id.as_str(),
                    blob.filename.as_str(),
                    blob.mime_type.as_str(),
                    size,
                    blob.data.clone(),
                    format_timestamp(&blob.created_at)
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn get(&self, id: &MediaId) -> Result<Option<MediaBlob>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, account_id, filename, mime_type, data, created_at
                 FROM media WHERE id = ?",
                params![id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_blob(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, id: &MediaId) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM media WHERE id = ?", params![id.as_str()])
            .await?;
        Ok(affected > 0)
    }

    /// Summed blob sizes, for one account or the whole store.
    pub async fn usage(&self, account_id: Option<&str>) -> Result<u64> {
        let mut rows = match account_id {
            Some(account_id) => {
                self.conn
                    .query(
                        "SELECT COALESCE(SUM(size_bytes), 0) FROM media WHERE account_id = ?",
                        params![account_id],
                    )
                    .await?
            }
            None => {
                self.conn
                    .query("SELECT COALESCE(SUM(size_bytes), 0) FROM media", ())
                    .await?
            }
        };

        let used: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(u64::try_from(used).unwrap_or_default())
    }

    fn parse_blob(row: &Row) -> Result<MediaBlob> {
        let id: String = row.get(0)?;
        let created_at: String = row.get(5)?;

        Ok(MediaBlob {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid media id '{id}'")))?,
            account_id: row.get(1)?,
            filename: row.get(2)?,
            mime_type: row.get(3)?,
            data: row.get(4)?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}
