//! Shared local store wrapper used across the sync engine.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{
    Database, EntityRepository, LibSqlEntityRepository, LibSqlPendingRepository,
    LibSqlStateRepository, PendingRepository, StateRepository, KEY_INITIAL_SYNC_COMPLETE,
    KEY_SYNC_WATERMARK,
};
use crate::models::{LocalId, Message, NewPendingOperation, PendingOperation, Tab};
use crate::Result;

/// Thread-safe handle to the local entity store.
///
/// Every call locks the single connection, so reads and writes are totally
/// ordered.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
}

impl LocalStore {
    /// Open a store at the given filesystem path, creating parent directories.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::debug!("Opening local store at {}", db_path.display());
        let db = Database::open(&db_path).await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    // Tabs

    /// Insert a tab.
    pub async fn insert_tab(&self, tab: &Tab) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .insert_tab(tab)
            .await
    }

    /// Fetch a tab by client identifier, including soft-deleted tabs.
    pub async fn get_tab(&self, local_id: &LocalId) -> Result<Option<Tab>> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .get_tab(local_id)
            .await
    }

    /// Fetch a tab by server identifier, including soft-deleted tabs.
    pub async fn get_tab_by_server_id(&self, server_id: &str) -> Result<Option<Tab>> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .get_tab_by_server_id(server_id)
            .await
    }

    /// List visible tabs by position.
    pub async fn list_tabs(&self) -> Result<Vec<Tab>> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection()).list_tabs().await
    }

    /// Persist changes to a tab.
    pub async fn update_tab(&self, tab: &Tab) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .update_tab(tab)
            .await
    }

    /// Assign a tab's server identifier if it has none yet.
    pub async fn assign_tab_server_id(&self, local_id: &LocalId, server_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .assign_tab_server_id(local_id, server_id)
            .await
    }

    /// Remove a tab after moving its messages to the inbox.
    pub async fn purge_tab(&self, local_id: &LocalId) -> Result<u64> {
        let db = self.db.lock().await;
        let repo = LibSqlEntityRepository::new(db.connection());
        let moved = repo.reassign_messages_to_inbox(local_id).await?;
        repo.purge_tab(local_id).await?;
        Ok(moved)
    }

    /// Server identifier of a tab, if the tab exists and is acknowledged.
    pub async fn tab_server_id(&self, local_id: &LocalId) -> Result<Option<String>> {
        Ok(self.get_tab(local_id).await?.and_then(|tab| tab.server_id))
    }

    /// Client identifier of the tab with the given server identifier.
    pub async fn tab_local_id(&self, server_id: &str) -> Result<Option<LocalId>> {
        Ok(self
            .get_tab_by_server_id(server_id)
            .await?
            .map(|tab| tab.local_id))
    }

    // Messages

    /// Insert a message.
    pub async fn insert_message(&self, message: &Message) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .insert_message(message)
            .await
    }

    /// Fetch a message by client identifier, including soft-deleted messages.
    pub async fn get_message(&self, local_id: &LocalId) -> Result<Option<Message>> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .get_message(local_id)
            .await
    }

    /// Fetch a message by server identifier, including soft-deleted messages.
    pub async fn get_message_by_server_id(&self, server_id: &str) -> Result<Option<Message>> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .get_message_by_server_id(server_id)
            .await
    }

    /// List visible messages of a tab, or of the inbox when `tab` is `None`.
    pub async fn list_messages(&self, tab: Option<&LocalId>) -> Result<Vec<Message>> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .list_messages(tab)
            .await
    }

    /// List every visible message.
    pub async fn list_all_messages(&self) -> Result<Vec<Message>> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .list_all_messages()
            .await
    }

    /// Persist changes to a message.
    pub async fn update_message(&self, message: &Message) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .update_message(message)
            .await
    }

    /// Assign a message's server identifier if it has none yet.
    pub async fn assign_message_server_id(
        &self,
        local_id: &LocalId,
        server_id: &str,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .assign_message_server_id(local_id, server_id)
            .await
    }

    /// Remove a message.
    pub async fn purge_message(&self, local_id: &LocalId) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .purge_message(local_id)
            .await
    }

    /// Remove every tab and message.
    pub async fn wipe_entities(&self) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection()).wipe().await
    }

    // Sync state

    /// Incremental sync watermark (server time, Unix ms).
    pub async fn watermark(&self) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        LibSqlStateRepository::new(db.connection())
            .watermark()
            .await
    }

    /// Advance the incremental sync watermark.
    pub async fn set_watermark(&self, server_time: i64) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlStateRepository::new(db.connection())
            .set(KEY_SYNC_WATERMARK, &server_time.to_string())
            .await
    }

    /// Whether the initial bulk upload completed for this account.
    pub async fn initial_sync_complete(&self) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlStateRepository::new(db.connection())
            .initial_sync_complete()
            .await
    }

    /// Record that the initial bulk upload completed.
    pub async fn mark_initial_sync_complete(&self) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlStateRepository::new(db.connection())
            .set(KEY_INITIAL_SYNC_COMPLETE, "true")
            .await
    }

    /// Forget the watermark and the initial sync flag.
    pub async fn clear_sync_state(&self) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlStateRepository::new(db.connection());
        repo.delete(KEY_SYNC_WATERMARK).await?;
        repo.delete(KEY_INITIAL_SYNC_COMPLETE).await
    }

    // Pending operations, owned by `PendingOperationLog`

    pub(crate) async fn append_pending(
        &self,
        operation: &NewPendingOperation,
    ) -> Result<PendingOperation> {
        let db = self.db.lock().await;
        LibSqlPendingRepository::new(db.connection())
            .append(operation)
            .await
    }

    pub(crate) async fn list_pending(&self) -> Result<Vec<PendingOperation>> {
        let db = self.db.lock().await;
        LibSqlPendingRepository::new(db.connection()).list().await
    }

    pub(crate) async fn remove_pending(&self, id: i64) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlPendingRepository::new(db.connection())
            .remove(id)
            .await
    }

    pub(crate) async fn record_pending_failure(&self, operation: &PendingOperation) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlPendingRepository::new(db.connection())
            .record_failure(operation)
            .await
    }

    pub(crate) async fn count_pending(&self) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlPendingRepository::new(db.connection()).count().await
    }

    pub(crate) async fn clear_pending(&self) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlPendingRepository::new(db.connection()).clear().await
    }

    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute(sql, ()).await?;
        Ok(())
    }
}
