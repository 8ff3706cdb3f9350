//! Sync state repository implementation

use libsql::{params, Connection};

use crate::error::Result;

/// Key of the incremental sync watermark (server time, Unix ms)
pub const KEY_SYNC_WATERMARK: &str = "sync_watermark";
/// Key of the "initial sync complete" flag
pub const KEY_INITIAL_SYNC_COMPLETE: &str = "initial_sync_complete";

/// Trait for persisted key/value sync state (async)
#[allow(async_fn_in_trait)]
pub trait StateRepository {
    /// Get a value by key
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value, replacing any previous one
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value
    async fn delete(&self, key: &str) -> Result<()>;

    /// Get the incremental sync watermark
    async fn watermark(&self) -> Result<Option<i64>> {
        Ok(self
            .get(KEY_SYNC_WATERMARK)
            .await?
            .and_then(|value| value.parse().ok()))
    }

    /// Whether the initial bulk upload has completed for this account
    async fn initial_sync_complete(&self) -> Result<bool> {
        Ok(self
            .get(KEY_INITIAL_SYNC_COMPLETE)
            .await?
            .is_some_and(|value| value == "true"))
    }
}

/// libSQL implementation of `StateRepository`
pub struct LibSqlStateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlStateRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl StateRepository for LibSqlStateRepository<'_> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM sync_state WHERE key = ?", params![key])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM sync_state WHERE key = ?", params![key])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test(flavor = "multi_thread")]
    async fn set_get_delete() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlStateRepository::new(db.connection());

        assert!(repo.get("missing").await.unwrap().is_none());

        repo.set("color", "blue").await.unwrap();
        repo.set("color", "green").await.unwrap();
        assert_eq!(repo.get("color").await.unwrap().as_deref(), Some("green"));

        repo.delete("color").await.unwrap();
        assert!(repo.get("color").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn typed_accessors_parse_stored_values() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlStateRepository::new(db.connection());

        assert_eq!(repo.watermark().await.unwrap(), None);
        assert!(!repo.initial_sync_complete().await.unwrap());

        repo.set(KEY_SYNC_WATERMARK, "1700000000000").await.unwrap();
        repo.set(KEY_INITIAL_SYNC_COMPLETE, "true").await.unwrap();

        assert_eq!(repo.watermark().await.unwrap(), Some(1_700_000_000_000));
        assert!(repo.initial_sync_complete().await.unwrap());
    }
}
