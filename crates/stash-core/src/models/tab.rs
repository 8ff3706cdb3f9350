//! Tab model

use serde::{Deserialize, Serialize};

use super::LocalId;

/// A user-visible folder holding messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    /// Client identifier, stable for the lifetime of the tab
    pub local_id: LocalId,
    /// Server identifier, set once the backend acknowledged the tab
    pub server_id: Option<String>,
    /// Display title
    pub title: String,
    /// Sort position (ascending)
    pub position: i64,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Soft delete flag, kept until the remote delete is acknowledged
    pub is_deleted: bool,
}

impl Tab {
    /// Create a new, not yet synchronized tab
    #[must_use]
    pub fn new(title: impl Into<String>, position: i64) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            local_id: LocalId::new(),
            server_id: None,
            title: title.into(),
            position,
            created_at: now,
            updated_at: now,
            is_deleted: false,
        }
    }

    /// Whether the backend has acknowledged this tab
    pub const fn is_synced(&self) -> bool {
        self.server_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_tab_is_unsynced() {
        let tab = Tab::new("Inbox zero", 3);
        assert!(!tab.is_synced());
        assert!(!tab.is_deleted);
        assert_eq!(tab.position, 3);
        assert_eq!(tab.created_at, tab.updated_at);
    }
}
