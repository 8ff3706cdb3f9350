//! Wire types exchanged with the backend.

use serde::{Deserialize, Serialize};

use crate::models::{LocalId, MediaRef};

/// A tab as the server reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTab {
    pub id: String,
    #[serde(default)]
    pub local_id: Option<LocalId>,
    pub title: String,
    #[serde(default)]
    pub position: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A message as the server reports it; `tab_id` is a server identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMessage {
    pub id: String,
    #[serde(default)]
    pub local_id: Option<LocalId>,
    #[serde(default)]
    pub tab_id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub entities: serde_json::Value,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    #[serde(default)]
    pub position: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTabRequest {
    pub local_id: LocalId,
    pub title: String,
    pub position: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTabRequest {
    pub title: String,
    pub position: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMessageRequest {
    pub local_id: LocalId,
    /// Server identifier of the parent tab; `null` places it in the inbox
    pub tab_id: Option<String>,
    pub text: String,
    pub entities: serde_json::Value,
    pub media: Vec<MediaRef>,
    pub position: i64,
    pub created_at: i64,
}

/// Full replacement of a message's mutable state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateMessageRequest {
    pub tab_id: Option<String>,
    pub text: String,
    pub entities: serde_json::Value,
    pub media: Vec<MediaRef>,
    pub position: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialSyncStatus {
    #[serde(alias = "has_completed_initial_sync")]
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialSyncTab {
    pub local_id: LocalId,
    pub title: String,
    pub position: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A message in the bulk upload; the parent is referenced by client identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialSyncMessage {
    pub local_id: LocalId,
    pub tab_local_id: Option<LocalId>,
    pub text: String,
    pub entities: serde_json::Value,
    pub media: Vec<MediaRef>,
    pub position: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitialSyncRequest {
    pub tabs: Vec<InitialSyncTab>,
    pub messages: Vec<InitialSyncMessage>,
}

/// Client identifier to server identifier mapping echoed by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapping {
    pub local_id: LocalId,
    pub server_id: String,
}

/// Pre-signed upload destination for a media object of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    pub local_id: LocalId,
    pub key: String,
    pub upload_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialSyncResponse {
    #[serde(default)]
    pub tabs: Vec<IdMapping>,
    #[serde(default)]
    pub messages: Vec<IdMapping>,
    #[serde(default)]
    pub upload_targets: Vec<UploadTarget>,
}

/// Remote changes of one entity kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct EntityChanges<T> {
    #[serde(default)]
    pub created: Vec<T>,
    #[serde(default)]
    pub updated: Vec<T>,
    /// Server identifiers of deleted entities
    #[serde(default)]
    pub deleted: Vec<String>,
}

impl<T> Default for EntityChanges<T> {
    fn default() -> Self {
        Self {
            created: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

impl<T> EntityChanges<T> {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Response of the incremental sync endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Server time the change set is consistent with (Unix ms)
    pub server_time: i64,
    #[serde(default)]
    pub tabs: EntityChanges<RemoteTab>,
    #[serde(default)]
    pub messages: EntityChanges<RemoteMessage>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty() && self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_set_tolerates_missing_sections() {
        let changes: ChangeSet = serde_json::from_str(
            r#"{"server_time":1700000000000,"tabs":{"deleted":["t1"]}}"#,
        )
        .unwrap();
        assert_eq!(changes.tabs.deleted, vec!["t1".to_string()]);
        assert!(changes.messages.is_empty());
        assert!(!changes.is_empty());
    }

    #[test]
    fn change_set_decodes_created_entities() {
        let changes: ChangeSet = serde_json::from_str(
            r#"{
                "server_time": 5,
                "tabs": {"created": [{"id":"t1","title":"Work","created_at":1,"updated_at":2}]},
                "messages": {"updated": [{"id":"m1","tab_id":"t1","text":"hi","created_at":1,"updated_at":3}]}
            }"#,
        )
        .unwrap();
        assert_eq!(changes.tabs.created[0].title, "Work");
        assert_eq!(changes.messages.updated[0].tab_id.as_deref(), Some("t1"));
        assert!(changes.messages.created.is_empty());
    }

    #[test]
    fn remote_message_defaults_optional_content() {
        let message: RemoteMessage = serde_json::from_str(
            r#"{"id":"m1","text":"hi","created_at":1,"updated_at":2}"#,
        )
        .unwrap();
        assert!(message.tab_id.is_none());
        assert!(message.local_id.is_none());
        assert!(message.media.is_empty());
        assert_eq!(message.entities, serde_json::Value::Null);
    }

    #[test]
    fn create_message_serializes_inbox_parent_as_null() {
        let request = CreateMessageRequest {
            local_id: LocalId::new(),
            tab_id: None,
            text: "loose note".to_string(),
            entities: serde_json::Value::Null,
            media: Vec::new(),
            position: 0,
            created_at: 1,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value["tab_id"].is_null());
        assert!(value.as_object().unwrap().contains_key("tab_id"));
    }

    #[test]
    fn initial_sync_status_accepts_long_field_name() {
        let status: InitialSyncStatus =
            serde_json::from_str(r#"{"has_completed_initial_sync":true}"#).unwrap();
        assert!(status.completed);
    }
}
