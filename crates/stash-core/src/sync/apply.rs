//! Applying remote entity state to the local store.
//!
//! Remote state wins only when it is newer (`updated_at`) than the local row,
//! and never resurrects a row the user deleted locally.

use crate::api::{RemoteMessage, RemoteTab};
use crate::error::Result;
use crate::models::{LocalId, Message, Tab};
use crate::services::LocalStore;

/// What to do with a remote message whose parent tab is unknown locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnresolvedParent {
    /// Store the message in the inbox
    Inbox,
    /// Leave the store untouched and report `Applied::Unresolved`
    Defer,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TabApplied {
    /// A tab was created or linked to the server; carries its server id
    Linked(String),
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MessageApplied {
    Inserted(Message),
    Updated(Message),
    Unchanged,
    Unresolved,
}

/// Insert or update a tab from its remote representation.
pub(crate) async fn upsert_tab(store: &LocalStore, remote: &RemoteTab) -> Result<TabApplied> {
    if let Some(mut local) = store.get_tab_by_server_id(&remote.id).await? {
        if local.is_deleted || remote.updated_at <= local.updated_at {
            return Ok(TabApplied::Unchanged);
        }
        local.title.clone_from(&remote.title);
        local.position = remote.position;
        local.updated_at = remote.updated_at;
        store.update_tab(&local).await?;
        return Ok(TabApplied::Updated);
    }

    // Echo of a tab created on this device
    if let Some(local_id) = remote.local_id {
        if let Some(mut local) = store.get_tab(&local_id).await? {
            if local.server_id.is_none() {
                store.assign_tab_server_id(&local_id, &remote.id).await?;
            }
            if !local.is_deleted && remote.updated_at > local.updated_at {
                local.title.clone_from(&remote.title);
                local.position = remote.position;
                local.updated_at = remote.updated_at;
                store.update_tab(&local).await?;
            }
            return Ok(TabApplied::Linked(remote.id.clone()));
        }
    }

    let tab = Tab {
        local_id: LocalId::new(),
        server_id: Some(remote.id.clone()),
        title: remote.title.clone(),
        position: remote.position,
        created_at: remote.created_at,
        updated_at: remote.updated_at,
        is_deleted: false,
    };
    store.insert_tab(&tab).await?;
    tracing::debug!("Materialized remote tab {} as {}", remote.id, tab.local_id);
    Ok(TabApplied::Linked(remote.id.clone()))
}

enum Parent {
    /// A local tab, or the inbox when `None`
    Known(Option<LocalId>),
    Missing,
}

async fn resolve_parent(store: &LocalStore, tab_id: Option<&str>) -> Result<Parent> {
    let Some(tab_id) = tab_id else {
        return Ok(Parent::Known(None));
    };
    Ok(match store.tab_local_id(tab_id).await? {
        Some(local_id) => Parent::Known(Some(local_id)),
        None => Parent::Missing,
    })
}

/// Insert or update a message from its remote representation.
pub(crate) async fn upsert_message(
    store: &LocalStore,
    remote: &RemoteMessage,
    unresolved: UnresolvedParent,
) -> Result<MessageApplied> {
    let parent = match resolve_parent(store, remote.tab_id.as_deref()).await? {
        Parent::Known(parent) => parent,
        Parent::Missing if unresolved == UnresolvedParent::Defer => {
            return Ok(MessageApplied::Unresolved)
        }
        Parent::Missing => {
            tracing::warn!(
                "Message {} references unknown tab {}, placing it in the inbox",
                remote.id,
                remote.tab_id.as_deref().unwrap_or_default()
            );
            None
        }
    };

    let existing = match store.get_message_by_server_id(&remote.id).await? {
        Some(message) => Some(message),
        None => match remote.local_id {
            Some(local_id) => store.get_message(&local_id).await?,
            None => None,
        },
    };

    if let Some(mut local) = existing {
        if local.server_id.is_none() {
            store
                .assign_message_server_id(&local.local_id, &remote.id)
                .await?;
            local.server_id = Some(remote.id.clone());
        }
        if local.is_deleted || remote.updated_at <= local.updated_at {
            return Ok(MessageApplied::Unchanged);
        }
        local.tab_local_id = parent;
        local.text.clone_from(&remote.text);
        local.entities = remote.entities.clone();
        local.media.clone_from(&remote.media);
        local.position = remote.position;
        local.updated_at = remote.updated_at;
        store.update_message(&local).await?;
        return Ok(MessageApplied::Updated(local));
    }

    let message = Message {
        local_id: LocalId::new(),
        server_id: Some(remote.id.clone()),
        tab_local_id: parent,
        text: remote.text.clone(),
        entities: remote.entities.clone(),
        media: remote.media.clone(),
        position: remote.position,
        created_at: remote.created_at,
        updated_at: remote.updated_at,
        is_deleted: false,
    };
    store.insert_message(&message).await?;
    tracing::debug!(
        "Materialized remote message {} as {}",
        remote.id,
        message.local_id
    );
    Ok(MessageApplied::Inserted(message))
}

/// Move a message to another tab (`None` = inbox) at a new position.
pub(crate) async fn move_message(
    store: &LocalStore,
    server_id: &str,
    tab_id: Option<&str>,
    position: i64,
    unresolved: UnresolvedParent,
) -> Result<MessageApplied> {
    let Some(mut local) = store.get_message_by_server_id(server_id).await? else {
        return Ok(MessageApplied::Unresolved);
    };
    if local.is_deleted {
        return Ok(MessageApplied::Unchanged);
    }

    let parent = match resolve_parent(store, tab_id).await? {
        Parent::Known(parent) => parent,
        Parent::Missing if unresolved == UnresolvedParent::Defer => {
            return Ok(MessageApplied::Unresolved)
        }
        Parent::Missing => None,
    };

    local.tab_local_id = parent;
    local.position = position;
    local.updated_at = local
        .updated_at
        .max(chrono::Utc::now().timestamp_millis());
    store.update_message(&local).await?;
    Ok(MessageApplied::Updated(local))
}

/// Remove a message deleted remotely. Returns `false` when it was unknown.
pub(crate) async fn delete_message(store: &LocalStore, server_id: &str) -> Result<bool> {
    let Some(local) = store.get_message_by_server_id(server_id).await? else {
        return Ok(false);
    };
    store.purge_message(&local.local_id).await?;
    Ok(true)
}

/// Remove a tab deleted remotely; its messages move to the inbox.
pub(crate) async fn delete_tab(store: &LocalStore, server_id: &str) -> Result<bool> {
    let Some(local) = store.get_tab_by_server_id(server_id).await? else {
        return Ok(false);
    };
    let moved = store.purge_tab(&local.local_id).await?;
    if moved > 0 {
        tracing::info!(
            "Tab {} was deleted remotely, moved {} message(s) to the inbox",
            server_id,
            moved
        );
    }
    Ok(true)
}
