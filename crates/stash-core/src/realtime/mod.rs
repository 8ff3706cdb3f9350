//! Realtime push channel: wire protocol and reconnecting WebSocket client.

mod channel;
mod protocol;

pub use channel::{ConnectionState, RealtimeChannel, ReconnectPolicy};
pub use protocol::{decode_event, ProtocolError, RealtimeEvent};
