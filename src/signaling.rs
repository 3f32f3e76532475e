//! WebSocket signaling relay for two-party WebRTC calls

mod actor;
mod config;
mod messages;
mod registry;
mod relay;
mod rooms;
mod server;
mod types;

pub use actor::RelayHandle;
pub use config::{ConfigError, DEFAULT_SIGNALING_PORT, ServerConfig};
pub use messages::{ClientMessage, ParseError, RelayKind, ServerMessage};
pub use relay::{JoinOutcome, Relay, RelayOutcome};
pub use rooms::{Joined, Removal, RoomTable};
pub use server::SignalingServer;
pub use types::{CallType, ConnectionId, OutboundMessage, Role, RoomId, SignalingError};
