//! Expiring cache repository implementation

use libsql::{params, Connection, Row};

use crate::error::Result;
use crate::models::CacheEntry;
use crate::util::{format_timestamp, parse_timestamp};

/// libSQL access to the `cache` collection
pub struct LibSqlCacheRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlCacheRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub async fn put(&self, entry: &CacheEntry) -> Result<()> {
        let data = serde_json::to_string(&entry.data)?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO cache (key, data, timestamp, expires_at)
                 VALUES (?, ?, ?, ?)",
                params![
                    entry.key.as_str(),
                    data,
                    format_timestamp(&entry.timestamp),
                    entry.expires_at.as_ref().map(format_timestamp)
                ],
            )
            .await?;
        Ok(())
    }

    /// Read an entry without evicting it, expired or not.
    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT key, data, timestamp, expires_at FROM cache WHERE key = ?",
                params![key],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_entry(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM cache WHERE key = ?", params![key])
            .await?;
        Ok(affected > 0)
    }

    /// Delete every entry whose expiry is at or before `now`.
    pub async fn purge_expired(&self, now: &str) -> Result<u64> {
        Ok(self
            .conn
            .execute(
                "DELETE FROM cache WHERE expires_at IS NOT NULL AND expires_at <= ?",
                params![now],
            )
            .await?)
    }

    fn parse_entry(row: &Row) -> Result<CacheEntry> {
        let data: String = row.get(1)?;
        let timestamp: String = row.get(2)?;
        let expires_at: Option<String> = row.get(3)?;

        Ok(CacheEntry {
            key: row.get(0)?,
            data: serde_json::from_str(&data)?,
            timestamp: parse_timestamp(&timestamp)?,
            expires_at: expires_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::Duration;
    use serde_json::json;

    fn entry(key: &str, ttl: Option<Duration>) -> CacheEntry {
        let now = crate::util::parse_timestamp("2024-06-01T10:00:00.000Z").unwrap();
        CacheEntry {
            key: key.to_string(),
            data: json!({"names": ["Acme", "Globex"]}),
            timestamp: now,
            expires_at: ttl.map(|ttl| now + ttl),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_get_delete() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlCacheRepository::new(db.connection());

        let stored = entry("vendors:acct", Some(Duration::minutes(5)));
        repo.put(&stored).await.unwrap();
        assert_eq!(repo.get("vendors:acct").await.unwrap(), Some(stored));

        assert!(repo.delete("vendors:acct").await.unwrap());
        assert!(repo.get("vendors:acct").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_purge_expired_keeps_live_entries() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlCacheRepository::new(db.connection());

        repo.put(&entry("short", Some(Duration::seconds(10))))
            .await
            .unwrap();
        repo.put(&entry("long", Some(Duration::hours(1))))
            .await
            .unwrap();
        repo.put(&entry("forever", None)).await.unwrap();

        let later = crate::util::parse_timestamp("2024-06-01T10:01:00.000Z").unwrap();
        let purged = repo
            .purge_expired(&format_timestamp(&later))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(repo.get("long").await.unwrap().is_some());
        assert!(repo.get("forever").await.unwrap().is_some());
    }
}
