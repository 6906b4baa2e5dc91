//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
pub const CURRENT_VERSION: i32 = 6;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }
    if version < 3 {
        migrate_v3(conn).await?;
    }
    if version < 4 {
        migrate_v4(conn).await?;
    }
    if version < 5 {
        migrate_v5(conn).await?;
    }
    if version < 6 {
        migrate_v6(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(
                SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version'
            )",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Run one version's statements in a transaction and record the version.
///
/// Every statement is idempotent so a partially applied or retried
/// migration converges on the same schema.
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?)",
            [i64::from(version)],
        )
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: entity collection
async fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        1,
        &[
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            "CREATE TABLE IF NOT EXISTS entities (
                kind TEXT NOT NULL,
                business_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                project_id TEXT,
                data TEXT NOT NULL,
                version INTEGER NOT NULL,
                last_updated TEXT NOT NULL,
                last_synced_at TEXT,
                PRIMARY KEY (kind, business_id)
            )",
            "CREATE INDEX IF NOT EXISTS idx_entities_account ON entities(account_id, kind)",
            "CREATE INDEX IF NOT EXISTS idx_entities_project
             ON entities(account_id, project_id, kind)",
        ],
    )
    .await
}

/// Migration to version 2: operation outbox
async fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        2,
        &[
            "CREATE TABLE IF NOT EXISTS operations (
                id TEXT PRIMARY KEY,
                op_type TEXT NOT NULL,
                account_id TEXT NOT NULL,
                entity_kind TEXT NOT NULL,
                business_id TEXT NOT NULL,
                data TEXT NOT NULL,
                version INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                failure_kind TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_operations_account_timestamp
                ON operations(account_id, timestamp, id)",
            "CREATE INDEX IF NOT EXISTS idx_operations_entity
             ON operations(entity_kind, business_id)",
        ],
    )
    .await
}

/// Migration to version 3: conflict records
async fn migrate_v3(conn: &Connection) -> Result<()> {
    apply(
        conn,
        3,
        &[
            "CREATE TABLE IF NOT EXISTS conflicts (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                project_id TEXT,
                item_id TEXT NOT NULL,
                entity_kind TEXT NOT NULL,
                conflict_type TEXT NOT NULL,
                field TEXT,
                local TEXT NOT NULL,
                server TEXT NOT NULL,
                resolved INTEGER NOT NULL DEFAULT 0,
                resolution TEXT,
                created_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_conflicts_account_item
             ON conflicts(account_id, item_id)",
            "CREATE INDEX IF NOT EXISTS idx_conflicts_project ON conflicts(account_id, project_id)",
        ],
    )
    .await
}

/// Migration to version 4: expiring cache and persisted scope context
async fn migrate_v4(conn: &Connection) -> Result<()> {
    apply(
        conn,
        4,
        &[
            "CREATE TABLE IF NOT EXISTS cache (
                key TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                expires_at TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_cache_expires_at ON cache(expires_at)",
            "CREATE TABLE IF NOT EXISTS context (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        ],
    )
    .await
}

/// Migration to version 5: media blobs
async fn migrate_v5(conn: &Connection) -> Result<()> {
    apply(
        conn,
        5,
        &[
            "CREATE TABLE IF NOT EXISTS media (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                data BLOB NOT NULL,
                created_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_media_account ON media(account_id)",
        ],
    )
    .await
}

/// Migration to version 6: count backend rejections apart from transient failures
async fn migrate_v6(conn: &Connection) -> Result<()> {
    // SQLite has no `ADD COLUMN IF NOT EXISTS`.
    if column_exists(conn, "operations", "permanent_failures").await? {
        return apply(conn, 6, &[]).await;
    }
    apply(
        conn,
        6,
        &[
            "ALTER TABLE operations ADD COLUMN permanent_failures INTEGER NOT NULL DEFAULT 0",
            "UPDATE operations SET permanent_failures = retry_count
                WHERE failure_kind = 'permanent'",
        ],
    )
    .await
}

async fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut rows = conn
        .query(
            "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?",
            [table, column],
        )
        .await?;
    Ok(match rows.next().await? {
        Some(row) => row.get::<i64>(0)? > 0,
        None => false,
    })
}
