//! Scope context repository implementation

use crate::error::Result;
use crate::models::ScopeContext;
use crate::util::normalize_text_option;
use libsql::Connection;

const ACCOUNT_ID: &str = "account_id";
const USER_ID: &str = "user_id";
const PROJECT_ID: &str = "project_id";

/// Trait for persisted scope context (async)
#[allow(async_fn_in_trait)]
pub trait ContextRepository {
    /// Load the last saved context; missing keys stay unset
    async fn load(&self) -> Result<ScopeContext>;

    /// Save the context, clearing keys that are unset
    async fn save(&self, context: &ScopeContext) -> Result<()>;
}

/// libSQL implementation of `ContextRepository`
pub struct LibSqlContextRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlContextRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl ContextRepository for LibSqlContextRepository<'_> {
    async fn load(&self) -> Result<ScopeContext> {
        Ok(ScopeContext {
            account_id: self.get_value(ACCOUNT_ID).await?,
            user_id: self.get_value(USER_ID).await?,
            project_id: self.get_value(PROJECT_ID).await?,
        })
    }

    async fn save(&self, context: &ScopeContext) -> Result<()> {
        self.set_value(ACCOUNT_ID, context.account_id.clone())
            .await?;
        self.set_value(USER_ID, context.user_id.clone()).await?;
        self.set_value(PROJECT_ID, context.project_id.clone())
            .await?;
        Ok(())
    }
}

impl LibSqlContextRepository<'_> {
    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM context WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(normalize_text_option(Some(value)))
        } else {
            Ok(None)
        }
    }

    async fn set_value(&self, key: &str, value: Option<String>) -> Result<()> {
        match normalize_text_option(value) {
            Some(value) => {
                self.conn
                    .execute(
                        "INSERT OR REPLACE INTO context (key, value) VALUES (?, ?)",
                        [key, value.as_str()],
                    )
                    .await?;
            }
            None => {
                self.conn
                    .execute("DELETE FROM context WHERE key = ?", [key])
                    .await?;
            }
        }
        Ok(())
    }
}
