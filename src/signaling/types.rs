use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Utf8Bytes;

/// Signaling errors, reported to the offending connection only
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    #[error("room is full: {0}")]
    RoomFull(RoomId),

    #[error("already in room {0}")]
    AlreadyInRoom(RoomId),

    #[error("Not connected to a room.")]
    NotInRoom,

    #[error("The other peer is not connected.")]
    PeerUnavailable,

    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("internal error: {0}")]
    Internal(String),
}

const CONNECTION_ID_LEN: usize = 13;
const HEX_CHARS: &[u8] = b"0123456789abcdef";

/// Connection ID: 13-byte fixed array ("conn_" + 8 hex)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    bytes: [u8; CONNECTION_ID_LEN],
    len: u8,
}

impl ConnectionId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; CONNECTION_ID_LEN];
        bytes[..5].copy_from_slice(b"conn_");

        let mut rng = rand::rng();
        let value: u32 = rng.random();

        for i in 0..8 {
            let nibble = ((value >> (28 - i * 4)) & 0xF) as usize;
            bytes[5 + i] = HEX_CHARS[nibble];
        }
        Self {
            bytes,
            len: CONNECTION_ID_LEN as u8,
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
impl ConnectionId {
    /// Fixed id for tests. `s` must be ASCII and at most 13 bytes.
    pub(crate) fn fixed(s: &str) -> Self {
        assert!(s.is_ascii() && s.len() <= CONNECTION_ID_LEN);
        let mut bytes = [0u8; CONNECTION_ID_LEN];
        bytes[..s.len()].copy_from_slice(s.as_bytes());
        Self {
            bytes,
            len: s.len() as u8,
        }
    }
}

/// Room key chosen by the clients. Kept verbatim, any non-empty string is valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Call type label ("audio", "video", ...), frozen per room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallType(String);

impl CallType {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallType {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for CallType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Position of a connection inside its room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Slot 0, sends the first offer
    Initiator,
    Joiner,
}

impl Role {
    pub fn is_initiator(self) -> bool {
        self == Role::Initiator
    }
}

/// Wrapper for outbound WebSocket messages using tungstenite's Utf8Bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    /// Create a new outbound message from any string type
    pub fn new(s: impl Into<Utf8Bytes>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Get the inner Utf8Bytes for tungstenite Message::Text
    pub fn into_inner(self) -> Utf8Bytes {
        self.0
    }
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self(Utf8Bytes::from(s))
    }
}

impl From<&str> for OutboundMessage {
    fn from(s: &str) -> Self {
        Self(Utf8Bytes::from(s.to_owned()))
    }
}
