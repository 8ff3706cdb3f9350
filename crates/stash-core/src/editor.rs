//! Local editing API.
//!
//! Every mutation writes the entity, then records it in the pending operation
//! log. When the log refuses the entry the entity write is undone, so nothing
//! is reported as saved that a later drain could not push.

use crate::error::{Error, Result};
use crate::models::{
    EntityKind, LocalId, MediaRef, Message, NewPendingOperation, OperationKind, Tab,
};
use crate::services::LocalStore;
use crate::sync::PendingOperationLog;

/// Content for a new message
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDraft {
    /// Parent tab; `None` = inbox
    pub tab_local_id: Option<LocalId>,
    pub text: String,
    pub entities: serde_json::Value,
    pub media: Vec<MediaRef>,
}

impl MessageDraft {
    /// Plain text draft
    pub fn text(tab_local_id: Option<LocalId>, text: impl Into<String>) -> Self {
        Self {
            tab_local_id,
            text: text.into(),
            entities: serde_json::Value::Null,
            media: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct LocalEditor {
    store: LocalStore,
    log: PendingOperationLog,
}

impl LocalEditor {
    pub const fn new(store: LocalStore, log: PendingOperationLog) -> Self {
        Self { store, log }
    }

    pub async fn list_tabs(&self) -> Result<Vec<Tab>> {
        self.store.list_tabs().await
    }

    pub async fn list_messages(&self, tab: Option<&LocalId>) -> Result<Vec<Message>> {
        self.store.list_messages(tab).await
    }

    /// Number of local mutations not yet acknowledged by the backend.
    pub async fn pending_count(&self) -> Result<u64> {
        self.log.count().await
    }

    // Tabs

    pub async fn create_tab(&self, title: &str) -> Result<Tab> {
        let title = validate_title(title)?;
        let position = self
            .store
            .list_tabs()
            .await?
            .iter()
            .map(|tab| tab.position + 1)
            .max()
            .unwrap_or_default();

        let tab = Tab::new(title, position);
        self.store.insert_tab(&tab).await?;
        if let Err(error) = self
            .record(OperationKind::Create, EntityKind::Tab, tab.local_id, &tab)
            .await
        {
            self.store.purge_tab(&tab.local_id).await?;
            return Err(error);
        }
        tracing::debug!("Created tab {}", tab.local_id);
        Ok(tab)
    }

    pub async fn rename_tab(&self, local_id: &LocalId, title: &str) -> Result<Tab> {
        let title = validate_title(title)?;
        self.update_tab_with(local_id, |tab| tab.title = title)
            .await
    }

    pub async fn reorder_tab(&self, local_id: &LocalId, position: i64) -> Result<Tab> {
        self.update_tab_with(local_id, |tab| tab.position = position)
            .await
    }

    /// Delete a tab together with its messages.
    pub async fn delete_tab(&self, local_id: &LocalId) -> Result<()> {
        let tab = self.visible_tab(local_id).await?;
        let messages = self.store.list_messages(Some(local_id)).await?;

        let mut deleted_messages = Vec::with_capacity(messages.len());
        for message in &messages {
            let mut deleted = message.clone();
            deleted.is_deleted = true;
            deleted.updated_at = now();
            self.store.update_message(&deleted).await?;
            deleted_messages.push(deleted);
        }
        let mut deleted_tab = tab.clone();
        deleted_tab.is_deleted = true;
        deleted_tab.updated_at = now();
        self.store.update_tab(&deleted_tab).await?;

        let mut recorded = Vec::new();
        let mut failure = None;
        for message in &deleted_messages {
            match self
                .record(
                    OperationKind::Delete,
                    EntityKind::Message,
                    message.local_id,
                    &serde_json::Value::Null,
                )
                .await
            {
                Ok(id) => recorded.push(id),
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }
        if failure.is_none() {
            if let Err(error) = self
                .record(
                    OperationKind::Delete,
                    EntityKind::Tab,
                    tab.local_id,
                    &serde_json::Value::Null,
                )
                .await
            {
                failure = Some(error);
            }
        }

        let Some(error) = failure else {
            tracing::debug!(
                "Deleted tab {} with {} message(s)",
                local_id,
                messages.len()
            );
            return Ok(());
        };

        for id in recorded {
            self.log.remove(id).await?;
        }
        for message in &messages {
            self.store.update_message(message).await?;
        }
        self.store.update_tab(&tab).await?;
        Err(error)
    }

    async fn update_tab_with(
        &self,
        local_id: &LocalId,
        change: impl FnOnce(&mut Tab),
    ) -> Result<Tab> {
        let previous = self.visible_tab(local_id).await?;
        let mut tab = previous.clone();
        change(&mut tab);
        tab.updated_at = now().max(previous.updated_at + 1);

        self.store.update_tab(&tab).await?;
        if let Err(error) = self
            .record(OperationKind::Update, EntityKind::Tab, tab.local_id, &tab)
            .await
        {
            self.store.update_tab(&previous).await?;
            return Err(error);
        }
        Ok(tab)
    }

    async fn visible_tab(&self, local_id: &LocalId) -> Result<Tab> {
        match self.store.get_tab(local_id).await? {
            Some(tab) if !tab.is_deleted => Ok(tab),
            _ => Err(Error::NotFound(format!("tab {local_id}"))),
        }
    }

    // Messages

    pub async fn create_message(&self, draft: MessageDraft) -> Result<Message> {
        if draft.text.trim().is_empty() && draft.media.is_empty() {
            return Err(Error::InvalidInput(
                "message needs text or media".to_string(),
            ));
        }
        if let Some(tab) = &draft.tab_local_id {
            self.visible_tab(tab).await?;
        }

        let position = self.next_message_position(draft.tab_local_id.as_ref()).await?;
        let mut message = Message::new(draft.tab_local_id, draft.text, position);
        message.entities = draft.entities;
        message.media = draft.media;

        self.store.insert_message(&message).await?;
        if let Err(error) = self
            .record(
                OperationKind::Create,
                EntityKind::Message,
                message.local_id,
                &message,
            )
            .await
        {
            self.store.purge_message(&message.local_id).await?;
            return Err(error);
        }
        tracing::debug!("Created message {}", message.local_id);
        Ok(message)
    }

    pub async fn edit_message(&self, local_id: &LocalId, text: &str) -> Result<Message> {
        let text = text.to_string();
        self.update_message_with(local_id, |message| message.text = text)
            .await
    }

    /// Move a message to another tab (`None` = inbox), at the end unless a
    /// position is given.
    pub async fn move_message(
        &self,
        local_id: &LocalId,
        tab: Option<LocalId>,
        position: Option<i64>,
    ) -> Result<Message> {
        if let Some(tab) = &tab {
            self.visible_tab(tab).await?;
        }
        let position = match position {
            Some(position) => position,
            None => self.next_message_position(tab.as_ref()).await?,
        };
        self.update_message_with(local_id, |message| {
            message.tab_local_id = tab;
            message.position = position;
        })
        .await
    }

    pub async fn delete_message(&self, local_id: &LocalId) -> Result<()> {
        let previous = self.visible_message(local_id).await?;
        let mut message = previous.clone();
        message.is_deleted = true;
        message.updated_at = now();

        self.store.update_message(&message).await?;
        if let Err(error) = self
            .record(
                OperationKind::Delete,
                EntityKind::Message,
                message.local_id,
                &serde_json::Value::Null,
            )
            .await
        {
            self.store.update_message(&previous).await?;
            return Err(error);
        }
        Ok(())
    }

    async fn update_message_with(
        &self,
        local_id: &LocalId,
        change: impl FnOnce(&mut Message),
    ) -> Result<Message> {
        let previous = self.visible_message(local_id).await?;
        let mut message = previous.clone();
        change(&mut message);
        message.updated_at = now().max(previous.updated_at + 1);

        self.store.update_message(&message).await?;
        if let Err(error) = self
            .record(
                OperationKind::Update,
                EntityKind::Message,
                message.local_id,
                &message,
            )
            .await
        {
            self.store.update_message(&previous).await?;
            return Err(error);
        }
        Ok(message)
    }

    async fn visible_message(&self, local_id: &LocalId) -> Result<Message> {
        match self.store.get_message(local_id).await? {
            Some(message) if !message.is_deleted => Ok(message),
            _ => Err(Error::NotFound(format!("message {local_id}"))),
        }
    }

    async fn next_message_position(&self, tab: Option<&LocalId>) -> Result<i64> {
        Ok(self
            .store
            .list_messages(tab)
            .await?
            .iter()
            .map(|message| message.position + 1)
            .max()
            .unwrap_or_default())
    }

    async fn record(
        &self,
        kind: OperationKind,
        entity: EntityKind,
        local_id: LocalId,
        snapshot: &impl serde::Serialize,
    ) -> Result<i64> {
        let payload = serde_json::to_value(snapshot)?;
        let operation = self
            .log
            .enqueue(NewPendingOperation::new(kind, entity, local_id, payload))
            .await?;
        Ok(operation.id)
    }
}

fn validate_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::InvalidInput("tab title cannot be empty".to_string()));
    }
    Ok(title.to_string())
}

fn now() -> i64 {
    crate::util::unix_timestamp_millis()
}
