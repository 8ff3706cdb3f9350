//! Message model

use serde::{Deserialize, Serialize};

use super::LocalId;

/// Reference to a media object attached to a message.
///
/// Opaque to the sync engine; produced and consumed by the media pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Object key in remote storage
    pub key: String,
    /// MIME type of the object
    pub mime_type: String,
    /// Object size in bytes
    pub size_bytes: i64,
}

/// A note, optionally attached to a tab (`None` = inbox)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Client identifier, stable for the lifetime of the message
    pub local_id: LocalId,
    /// Server identifier, set once the backend acknowledged the message
    pub server_id: Option<String>,
    /// Owning tab's client identifier; `None` means the inbox
    pub tab_local_id: Option<LocalId>,
    /// Plain text content
    pub text: String,
    /// Rich text entities (opaque JSON)
    pub entities: serde_json::Value,
    /// Attached media references
    pub media: Vec<MediaRef>,
    /// Sort position (ascending)
    pub position: i64,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Soft delete flag, kept until the remote delete is acknowledged
    pub is_deleted: bool,
}

impl Message {
    /// Create a new, not yet synchronized message
    #[must_use]
    pub fn new(tab_local_id: Option<LocalId>, text: impl Into<String>, position: i64) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            local_id: LocalId::new(),
            server_id: None,
            tab_local_id,
            text: text.into(),
            entities: serde_json::Value::Null,
            media: Vec::new(),
            position,
            created_at: now,
            updated_at: now,
            is_deleted: false,
        }
    }

    /// Whether the message lives in the inbox rather than a tab
    pub const fn is_in_inbox(&self) -> bool {
        self.tab_local_id.is_none()
    }

    /// Get first line as preview, truncated to `max_len` characters
    #[must_use]
    pub fn preview(&self, max_len: usize) -> String {
        self.text
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(max_len)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_without_tab_is_in_inbox() {
        let message = Message::new(None, "hello", 0);
        assert!(message.is_in_inbox());
        assert!(message.server_id.is_none());
        assert!(message.media.is_empty());
    }

    #[test]
    fn preview_uses_first_line() {
        let message = Message::new(Some(LocalId::new()), "First line\nSecond line", 0);
        assert_eq!(message.preview(50), "First line");
        assert_eq!(message.preview(5), "First");
    }
}
