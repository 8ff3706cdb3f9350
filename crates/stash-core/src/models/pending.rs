//! Pending operation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::LocalId;

/// Kind of local mutation awaiting acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

/// Kind of entity a pending operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Tab,
    Message,
}

impl EntityKind {
    /// Drain rank: tabs are processed before messages.
    pub const fn drain_rank(self) -> u8 {
        match self {
            Self::Tab => 0,
            Self::Message => 1,
        }
    }
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl EntityKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tab => "tab",
            Self::Message => "message",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown operation kind '{other}'")),
        }
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tab" => Ok(Self::Tab),
            "message" => Ok(Self::Message),
            other => Err(format!("unknown entity kind '{other}'")),
        }
    }
}

/// A local mutation about to be appended to the pending operation log
#[derive(Debug, Clone, PartialEq)]
pub struct NewPendingOperation {
    pub kind: OperationKind,
    pub entity: EntityKind,
    pub local_id: LocalId,
    pub payload: serde_json::Value,
}

impl NewPendingOperation {
    #[must_use]
    pub const fn new(
        kind: OperationKind,
        entity: EntityKind,
        local_id: LocalId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            entity,
            local_id,
            payload,
        }
    }
}

/// A durable, not yet acknowledged local mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Log row identifier
    pub id: i64,
    pub kind: OperationKind,
    pub entity: EntityKind,
    /// Client identifier of the affected entity
    pub local_id: LocalId,
    /// Opaque serialized payload captured when the mutation happened
    pub payload: serde_json::Value,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Number of failed execution attempts
    pub retry_count: u32,
    /// Last execution error, if any
    pub last_error: Option<String>,
}

impl PendingOperation {
    /// Ordering key for the drain: tabs before messages, then creation time.
    pub const fn drain_key(&self) -> (u8, i64, i64) {
        (self.entity.drain_rank(), self.created_at, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_from_their_storage_names() {
        for kind in [
            OperationKind::Create,
            OperationKind::Update,
            OperationKind::Delete,
        ] {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
        }
        assert_eq!("tab".parse::<EntityKind>().unwrap(), EntityKind::Tab);
        assert!("folder".parse::<EntityKind>().is_err());
    }

    #[test]
    fn drain_key_puts_tabs_first_regardless_of_age() {
        let message = PendingOperation {
            id: 1,
            kind: OperationKind::Create,
            entity: EntityKind::Message,
            local_id: LocalId::new(),
            payload: serde_json::Value::Null,
            created_at: 10,
            retry_count: 0,
            last_error: None,
        };
        let tab = PendingOperation {
            id: 2,
            entity: EntityKind::Tab,
            created_at: 20,
            ..message.clone()
        };
        assert!(tab.drain_key() < message.drain_key());
    }
}
