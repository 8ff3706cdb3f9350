//! Realtime envelope decoding.
//!
//! Every frame is a JSON envelope `{"type": ..., "payload": {...}}`.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::api::{RemoteMessage, RemoteTab};

/// A decoded push notification
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// Handshake completed; the id is echoed on later HTTP requests
    Connected { connection_id: String },
    TabCreated(RemoteTab),
    TabUpdated(RemoteTab),
    TabDeleted { id: String },
    MessageCreated(RemoteMessage),
    MessageUpdated(RemoteMessage),
    MessageDeleted { id: String },
    MessageMoved {
        id: String,
        tab_id: Option<String>,
        position: i64,
    },
    /// The server could not guarantee delivery; fall back to incremental sync
    SyncRequired { reason: Option<String> },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    Envelope(String),
    #[error("Malformed {kind} payload: {message}")]
    Payload { kind: String, message: String },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct ConnectedPayload {
    connection_id: String,
}

#[derive(Debug, Deserialize)]
struct DeletedPayload {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MovedPayload {
    id: String,
    #[serde(default)]
    tab_id: Option<String>,
    #[serde(default)]
    position: i64,
}

#[derive(Debug, Default, Deserialize)]
struct SyncRequiredPayload {
    #[serde(default)]
    reason: Option<String>,
}

/// Decode one text frame.
///
/// Returns `Ok(None)` for envelope types this client does not know.
pub fn decode_event(text: &str) -> Result<Option<RealtimeEvent>, ProtocolError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|error| ProtocolError::Envelope(error.to_string()))?;
    let Envelope { kind, payload } = envelope;

    let event = match kind.as_str() {
        "connected" => {
            let payload: ConnectedPayload = parse(&kind, payload)?;
            RealtimeEvent::Connected {
                connection_id: payload.connection_id,
            }
        }
        "tab_created" => RealtimeEvent::TabCreated(parse(&kind, payload)?),
        "tab_updated" => RealtimeEvent::TabUpdated(parse(&kind, payload)?),
        "tab_deleted" => {
            let payload: DeletedPayload = parse(&kind, payload)?;
            RealtimeEvent::TabDeleted { id: payload.id }
        }
        "message_created" => RealtimeEvent::MessageCreated(parse(&kind, payload)?),
        "message_updated" => RealtimeEvent::MessageUpdated(parse(&kind, payload)?),
        "message_deleted" => {
            let payload: DeletedPayload = parse(&kind, payload)?;
            RealtimeEvent::MessageDeleted { id: payload.id }
        }
        "message_moved" => {
            let payload: MovedPayload = parse(&kind, payload)?;
            RealtimeEvent::MessageMoved {
                id: payload.id,
                tab_id: payload.tab_id,
                position: payload.position,
            }
        }
        "sync_required" => {
            let payload: SyncRequiredPayload = if payload.is_null() {
                SyncRequiredPayload::default()
            } else {
                parse(&kind, payload)?
            };
            RealtimeEvent::SyncRequired {
                reason: payload.reason,
            }
        }
        other => {
            tracing::debug!("Ignoring realtime event of unknown type {:?}", other);
            return Ok(None);
        }
    };
    Ok(Some(event))
}

fn parse<T: DeserializeOwned>(kind: &str, payload: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|error| ProtocolError::Payload {
        kind: kind.to_string(),
        message: error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_connected_envelope() {
        let event = decode_event(r#"{"type":"connected","payload":{"connection_id":"c-42"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            RealtimeEvent::Connected {
                connection_id: "c-42".to_string()
            }
        );
    }

    #[test]
    fn decodes_message_created_with_defaults() {
        let event = decode_event(
            r#"{"type":"message_created","payload":{"id":"m1","tab_id":"t1","text":"hi","position":3,"created_at":10,"updated_at":10}}"#,
        )
        .unwrap()
        .unwrap();

        let RealtimeEvent::MessageCreated(message) = event else {
            panic!("unexpected event {event:?}");
        };
        assert_eq!(message.id, "m1");
        assert_eq!(message.tab_id.as_deref(), Some("t1"));
        assert!(message.media.is_empty());
        assert_eq!(message.local_id, None);
    }

    #[test]
    fn decodes_move_to_inbox() {
        let event = decode_event(
            r#"{"type":"message_moved","payload":{"id":"m1","tab_id":null,"position":7}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            Some(RealtimeEvent::MessageMoved {
                id: "m1".to_string(),
                tab_id: None,
                position: 7,
            })
        );
    }

    #[test]
    fn sync_required_accepts_missing_payload() {
        let event = decode_event(r#"{"type":"sync_required"}"#).unwrap();
        assert_eq!(event, Some(RealtimeEvent::SyncRequired { reason: None }));
    }

    #[test]
    fn unknown_type_is_ignored() {
        let event = decode_event(r#"{"type":"typing_started","payload":{"user":"u1"}}"#).unwrap();
        assert_eq!(event, None);
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(matches!(
            decode_event("not json"),
            Err(ProtocolError::Envelope(_))
        ));
        assert!(matches!(
            decode_event(r#"{"type":"tab_deleted","payload":{}}"#),
            Err(ProtocolError::Payload { .. })
        ));
    }
}
