use serde::{Deserialize, Serialize, de};
use serde_json::{Map, Value};
use thiserror::Error;

use super::types::{CallType, OutboundMessage, RoomId};

/// Tags the server understands on inbound messages
const KNOWN_TYPES: &[&str] = &["create_or_join", "offer", "answer", "candidate", "hangup"];

/// Why an inbound text frame could not be turned into a [`ClientMessage`]
#[derive(Debug, Error)]
pub enum ParseError {
    /// Not a JSON object with a string `type`. Dropped without a reply.
    #[error("malformed message: {0}")]
    Malformed(serde_json::Error),

    #[error("Unknown message type: {}", .0.as_deref().unwrap_or("<missing>"))]
    UnknownType(Option<String>),

    #[error("Invalid message: {0}")]
    Invalid(serde_json::Error),
}

impl ParseError {
    /// Malformed input gets no reply at all
    pub fn is_silent(&self) -> bool {
        matches!(self, ParseError::Malformed(_))
    }
}

/// Messages sent from client to server
#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Create the room, or join it as the second member
    #[serde(rename = "create_or_join")]
    CreateOrJoin {
        #[serde(rename = "roomId", default)]
        room_id: Option<String>,
        #[serde(rename = "callType", default)]
        call_type: Option<String>,
    },

    /// Session description offer, relayed as-is
    #[serde(rename = "offer")]
    Offer,

    /// Session description answer, relayed as-is
    #[serde(rename = "answer")]
    Answer,

    /// ICE candidate, relayed as-is
    #[serde(rename = "candidate")]
    Candidate,

    /// End the call and leave the room
    #[serde(rename = "hangup")]
    Hangup,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let object: Map<String, Value> =
            serde_json::from_str(text).map_err(ParseError::Malformed)?;

        let kind = match object.get("type") {
            None | Some(Value::Null) => return Err(ParseError::UnknownType(None)),
            Some(Value::String(kind)) => kind.clone(),
            Some(_) => {
                return Err(ParseError::Malformed(de::Error::custom(
                    "message type must be a string",
                )));
            }
        };
        if !KNOWN_TYPES.contains(&kind.as_str()) {
            return Err(ParseError::UnknownType(Some(kind)));
        }

        serde_json::from_value(Value::Object(object)).map_err(ParseError::Invalid)
    }
}

/// Messages whose payload the server never looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    Offer,
    Answer,
    Candidate,
}

impl RelayKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayKind::Offer => "offer",
            RelayKind::Answer => "answer",
            RelayKind::Candidate => "candidate",
        }
    }

    /// Candidates may race ahead of the peer, so a missing peer is not reported for them
    pub fn reports_unavailable_peer(self) -> bool {
        !matches!(self, RelayKind::Candidate)
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// create_or_join accepted
    #[serde(rename = "joined", rename_all = "camelCase")]
    Joined {
        room_id: RoomId,
        is_initiator: bool,
        call_type: CallType,
    },

    /// Sent to the initiator once the room is complete
    #[serde(rename = "peer_joined", rename_all = "camelCase")]
    PeerJoined { room_id: RoomId, call_type: CallType },

    /// The peer hung up explicitly
    #[serde(rename = "peer_hangup")]
    PeerHangup,

    /// The peer's connection went away
    #[serde(rename = "peer_left")]
    PeerLeft,

    #[serde(rename = "room_full", rename_all = "camelCase")]
    RoomFull { room_id: RoomId },

    #[serde(rename = "peer_unavailable")]
    PeerUnavailable { message: String },

    /// Error response
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn to_outbound(&self) -> Result<OutboundMessage, serde_json::Error> {
        serde_json::to_string(self).map(OutboundMessage::from)
    }
}
