//! Tab and message repository implementation

use libsql::{params, Connection, Row, Value};

use super::{optional_text, text_or_null};
use crate::error::{Error, Result};
use crate::models::{LocalId, MediaRef, Message, Tab};

const TAB_COLUMNS: &str =
    "local_id, server_id, title, position, created_at, updated_at, is_deleted";
const MESSAGE_COLUMNS: &str = "local_id, server_id, tab_local_id, text, entities, media, position, created_at, updated_at, is_deleted";

/// Trait for tab and message storage operations (async)
#[allow(async_fn_in_trait)]
pub trait EntityRepository {
    /// Insert a tab row
    async fn insert_tab(&self, tab: &Tab) -> Result<()>;

    /// Get a tab by client identifier, including soft-deleted rows
    async fn get_tab(&self, local_id: &LocalId) -> Result<Option<Tab>>;

    /// Get a tab by server identifier, including soft-deleted rows
    async fn get_tab_by_server_id(&self, server_id: &str) -> Result<Option<Tab>>;

    /// List visible tabs ordered by position
    async fn list_tabs(&self) -> Result<Vec<Tab>>;

    /// Persist title, position, timestamps and the delete flag
    async fn update_tab(&self, tab: &Tab) -> Result<()>;

    /// Assign a server identifier unless one is already set.
    ///
    /// Returns `true` when the identifier was written.
    async fn assign_tab_server_id(&self, local_id: &LocalId, server_id: &str) -> Result<bool>;

    /// Move every message of a tab to the inbox.
    ///
    /// Returns the number of messages moved.
    async fn reassign_messages_to_inbox(&self, tab_local_id: &LocalId) -> Result<u64>;

    /// Remove a tab row; its messages move to the inbox
    async fn purge_tab(&self, local_id: &LocalId) -> Result<()>;

    /// Insert a message row
    async fn insert_message(&self, message: &Message) -> Result<()>;

    /// Get a message by client identifier, including soft-deleted rows
    async fn get_message(&self, local_id: &LocalId) -> Result<Option<Message>>;

    /// Get a message by server identifier, including soft-deleted rows
    async fn get_message_by_server_id(&self, server_id: &str) -> Result<Option<Message>>;

    /// List visible messages of a tab (`None` = inbox) ordered by position
    async fn list_messages(&self, tab_local_id: Option<&LocalId>) -> Result<Vec<Message>>;

    /// List every visible message
    async fn list_all_messages(&self) -> Result<Vec<Message>>;

    /// Persist content, parent, position, timestamps and the delete flag
    async fn update_message(&self, message: &Message) -> Result<()>;

    /// Assign a server identifier unless one is already set.
    ///
    /// Returns `true` when the identifier was written.
    async fn assign_message_server_id(&self, local_id: &LocalId, server_id: &str)
        -> Result<bool>;

    /// Remove a message row
    async fn purge_message(&self, local_id: &LocalId) -> Result<()>;

    /// Remove every tab and message
    async fn wipe(&self) -> Result<()>;
}

/// libSQL implementation of `EntityRepository`
pub struct LibSqlEntityRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlEntityRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_local_id(raw: &str) -> Result<LocalId> {
        raw.parse()
            .map_err(|_| Error::Database(format!("invalid local id '{raw}'")))
    }

    fn parse_tab(row: &Row) -> Result<Tab> {
        let local_id: String = row.get(0)?;
        Ok(Tab {
            local_id: Self::parse_local_id(&local_id)?,
            server_id: optional_text(row, 1)?,
            title: row.get(2)?,
            position: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            is_deleted: row.get::<i32>(6)? != 0,
        })
    }

    fn parse_message(row: &Row) -> Result<Message> {
        let local_id: String = row.get(0)?;
        let tab_local_id = optional_text(row, 2)?
            .map(|raw| Self::parse_local_id(&raw))
            .transpose()?;
        let entities: String = row.get(4)?;
        let media: String = row.get(5)?;
        Ok(Message {
            local_id: Self::parse_local_id(&local_id)?,
            server_id: optional_text(row, 1)?,
            tab_local_id,
            text: row.get(3)?,
            entities: serde_json::from_str(&entities)?,
            media: serde_json::from_str::<Vec<MediaRef>>(&media)?,
            position: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            is_deleted: row.get::<i32>(9)? != 0,
        })
    }

    async fn query_tabs(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Tab>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut tabs = Vec::new();
        while let Some(row) = rows.next().await? {
            tabs.push(Self::parse_tab(&row)?);
        }
        Ok(tabs)
    }

    async fn query_messages(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Message>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next().await? {
            messages.push(Self::parse_message(&row)?);
        }
        Ok(messages)
    }
}

impl EntityRepository for LibSqlEntityRepository<'_> {
    async fn insert_tab(&self, tab: &Tab) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO tabs (local_id, server_id, title, position, created_at, updated_at, is_deleted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    tab.local_id.as_str(),
                    text_or_null(tab.server_id.as_deref()),
                    tab.title.clone(),
                    tab.position,
                    tab.created_at,
                    tab.updated_at,
                    i32::from(tab.is_deleted)
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_tab(&self, local_id: &LocalId) -> Result<Option<Tab>> {
        let sql = format!("SELECT {TAB_COLUMNS} FROM tabs WHERE local_id = ?1");
        let mut tabs = self
            .query_tabs(&sql, vec![Value::Text(local_id.as_str())])
            .await?;
        Ok(tabs.pop())
    }

    async fn get_tab_by_server_id(&self, server_id: &str) -> Result<Option<Tab>> {
        let sql = format!("SELECT {TAB_COLUMNS} FROM tabs WHERE server_id = ?1");
        let mut tabs = self
            .query_tabs(&sql, vec![Value::Text(server_id.to_string())])
            .await?;
        Ok(tabs.pop())
    }

    async fn list_tabs(&self) -> Result<Vec<Tab>> {
        let sql = format!(
            "SELECT {TAB_COLUMNS} FROM tabs WHERE is_deleted = 0 ORDER BY position ASC, created_at ASC"
        );
        self.query_tabs(&sql, Vec::new()).await
    }

    async fn update_tab(&self, tab: &Tab) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE tabs SET title = ?1, position = ?2, updated_at = ?3, is_deleted = ?4
                 WHERE local_id = ?5",
                params![
                    tab.title.clone(),
                    tab.position,
                    tab.updated_at,
                    i32::from(tab.is_deleted),
                    tab.local_id.as_str()
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("tab {}", tab.local_id)));
        }
        Ok(())
    }

    async fn assign_tab_server_id(&self, local_id: &LocalId, server_id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE tabs SET server_id = ?1 WHERE local_id = ?2 AND server_id IS NULL",
                params![server_id.to_string(), local_id.as_str()],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn reassign_messages_to_inbox(&self, tab_local_id: &LocalId) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "UPDATE messages SET tab_local_id = NULL WHERE tab_local_id = ?1",
                params![tab_local_id.as_str()],
            )
            .await?;
        Ok(rows)
    }

    async fn purge_tab(&self, local_id: &LocalId) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM tabs WHERE local_id = ?1",
                params![local_id.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO messages (local_id, server_id, tab_local_id, text, entities, media, position, created_at, updated_at, is_deleted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    message.local_id.as_str(),
                    text_or_null(message.server_id.as_deref()),
                    text_or_null(message.tab_local_id.map(|id| id.as_str()).as_deref()),
                    message.text.clone(),
                    serde_json::to_string(&message.entities)?,
                    serde_json::to_string(&message.media)?,
                    message.position,
                    message.created_at,
                    message.updated_at,
                    i32::from(message.is_deleted)
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_message(&self, local_id: &LocalId) -> Result<Option<Message>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE local_id = ?1");
        let mut messages = self
            .query_messages(&sql, vec![Value::Text(local_id.as_str())])
            .await?;
        Ok(messages.pop())
    }

    async fn get_message_by_server_id(&self, server_id: &str) -> Result<Option<Message>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE server_id = ?1");
        let mut messages = self
            .query_messages(&sql, vec![Value::Text(server_id.to_string())])
            .await?;
        Ok(messages.pop())
    }

    async fn list_messages(&self, tab_local_id: Option<&LocalId>) -> Result<Vec<Message>> {
        match tab_local_id {
            Some(tab) => {
                let sql = format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE tab_local_id = ?1 AND is_deleted = 0
                     ORDER BY position ASC, created_at ASC"
                );
                self.query_messages(&sql, vec![Value::Text(tab.as_str())])
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE tab_local_id IS NULL AND is_deleted = 0
                     ORDER BY position ASC, created_at ASC"
                );
                self.query_messages(&sql, Vec::new()).await
            }
        }
    }

    async fn list_all_messages(&self) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE is_deleted = 0 ORDER BY created_at ASC"
        );
        self.query_messages(&sql, Vec::new()).await
    }

    async fn update_message(&self, message: &Message) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE messages SET tab_local_id = ?1, text = ?2, entities = ?3, media = ?4,
                     position = ?5, updated_at = ?6, is_deleted = ?7
                 WHERE local_id = ?8",
                params![
                    text_or_null(message.tab_local_id.map(|id| id.as_str()).as_deref()),
                    message.text.clone(),
                    serde_json::to_string(&message.entities)?,
                    serde_json::to_string(&message.media)?,
                    message.position,
                    message.updated_at,
                    i32::from(message.is_deleted),
                    message.local_id.as_str()
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("message {}", message.local_id)));
        }
        Ok(())
    }

    async fn assign_message_server_id(
        &self,
        local_id: &LocalId,
        server_id: &str,
    ) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE messages SET server_id = ?1 WHERE local_id = ?2 AND server_id IS NULL",
                params![server_id.to_string(), local_id.as_str()],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn purge_message(&self, local_id: &LocalId) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM messages WHERE local_id = ?1",
                params![local_id.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn wipe(&self) -> Result<()> {
        self.conn.execute("DELETE FROM messages", ()).await?;
        self.conn.execute("DELETE FROM tabs", ()).await?;
        Ok(())
    }
}
