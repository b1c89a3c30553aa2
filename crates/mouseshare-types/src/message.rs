//! Wire message types.
//!
//! Everything that crosses a framed connection is a [`WireMessage`]:
//! handshake messages while the connection is young, [`InputPacket`]s for the
//! rest of its life. The JSON encoding is tagged and self-describing so that
//! optional fields can be added without breaking older peers.

use serde::{Deserialize, Serialize};

use crate::event::TimedEvent;
use crate::peer::PeerId;
use crate::screen::ScreenSize;

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// A batch of input events with a per-sender sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputPacket {
    pub version: u16,
    /// Monotonically increasing, starting at 1 for the first packet of a
    /// session.
    pub sequence: u32,
    pub events: Vec<TimedEvent>,
}

impl InputPacket {
    #[must_use]
    pub fn new(sequence: u32, events: Vec<TimedEvent>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            events,
        }
    }
}

/// Opening message from the connecting peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub version: u16,
    pub peer_id: PeerId,
    pub peer_name: String,
    pub screen: ScreenSize,
    pub encryption_enabled: bool,
    pub timestamp_us: u64,
}

/// Reply to a [`HandshakeRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub accepted: bool,
    pub peer_id: PeerId,
    pub peer_name: String,
    pub screen: ScreenSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Top-level envelope for a framed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    HandshakeRequest(HandshakeRequest),
    HandshakeResponse(HandshakeResponse),
    Packet(InputPacket),
}
