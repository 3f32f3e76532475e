use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::info;

use super::registry::ConnectionRegistry;
use super::types::{CallType, ConnectionId, OutboundMessage, Role, RoomId, SignalingError};

const ROOM_CAPACITY: usize = 2;

#[derive(Debug)]
struct Room {
    /// Slot 0 is the initiator
    members: Vec<ConnectionId>,
    call_type: CallType,
}

/// Result of a successful create_or_join
#[derive(Debug, Clone, PartialEq)]
pub struct Joined {
    pub room_id: RoomId,
    pub role: Role,
    /// The room's frozen call type, not necessarily the requested one
    pub call_type: CallType,
    /// Set when this join completed the room
    pub initiator: Option<ConnectionId>,
}

/// Result of removing a connection from its room
#[derive(Debug, Clone, PartialEq)]
pub struct Removal {
    pub room_id: RoomId,
    /// The member left behind, who should be told
    pub remaining: Option<ConnectionId>,
}

/// All rooms, plus the connection registry they reference.
///
/// Membership and the connection-to-room mapping are only ever changed together, here.
#[derive(Debug, Default)]
pub struct RoomTable {
    rooms: HashMap<RoomId, Room>,
    registry: ConnectionRegistry,
}

impl RoomTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new, unassociated connection
    pub fn connect(&mut self, tx: mpsc::Sender<OutboundMessage>) -> ConnectionId {
        let id = self.registry.register(tx);
        info!("Connection {} registered", id);
        id
    }

    /// Drop a connection entirely, leaving its room first
    pub fn disconnect(&mut self, conn: &ConnectionId) -> Option<Removal> {
        let removal = self.remove_member(conn);
        if self.registry.unregister(conn) {
            info!("Connection {} unregistered", conn);
        }
        removal
    }

    pub fn create_or_join(
        &mut self,
        conn: &ConnectionId,
        room_id: &str,
        requested_call_type: &str,
    ) -> Result<Joined, SignalingError> {
        if room_id.is_empty() {
            return Err(SignalingError::InvalidRequest("Room ID required"));
        }
        if requested_call_type.is_empty() {
            return Err(SignalingError::InvalidRequest("Call type required"));
        }
        if !self.registry.contains(conn) {
            return Err(SignalingError::UnknownConnection(*conn));
        }
        if let Some(current) = self.registry.room_of(conn) {
            return Err(SignalingError::AlreadyInRoom(current.clone()));
        }

        let room_id = RoomId::from(room_id);
        let joined = match self.rooms.get_mut(&room_id) {
            None => {
                let call_type = CallType::from(requested_call_type);
                self.rooms.insert(
                    room_id.clone(),
                    Room {
                        members: vec![*conn],
                        call_type: call_type.clone(),
                    },
                );
                info!(
                    "Room {} created by {} (call type {})",
                    room_id, conn, call_type
                );
                Joined {
                    room_id: room_id.clone(),
                    role: Role::Initiator,
                    call_type,
                    initiator: None,
                }
            }
            Some(room) if room.members.len() >= ROOM_CAPACITY => {
                return Err(SignalingError::RoomFull(room_id));
            }
            Some(room) => {
                room.members.push(*conn);
                info!(
                    "Connection {} joined room {} ({} members)",
                    conn,
                    room_id,
                    room.members.len()
                );
                Joined {
                    room_id: room_id.clone(),
                    role: Role::Joiner,
                    call_type: room.call_type.clone(),
                    initiator: room.members.first().copied(),
                }
            }
        };

        self.registry.set_room(conn, Some(room_id))?;
        Ok(joined)
    }

    /// Take the connection out of its room. Calling it again is a no-op.
    pub fn remove_member(&mut self, conn: &ConnectionId) -> Option<Removal> {
        let room_id = self.registry.set_room(conn, None).ok().flatten()?;
        let room = self.rooms.get_mut(&room_id)?;

        room.members.retain(|member| member != conn);
        let remaining = room.members.first().copied();
        info!("Connection {} left room {}", conn, room_id);

        if room.members.is_empty() {
            self.rooms.remove(&room_id);
            info!("Room {} removed (empty)", room_id);
        }

        Some(Removal { room_id, remaining })
    }

    /// The other member of the connection's room
    pub fn peer_of(&self, conn: &ConnectionId) -> Option<ConnectionId> {
        let room_id = self.registry.room_of(conn)?;
        self.rooms
            .get(room_id)?
            .members
            .iter()
            .find(|member| *member != conn)
            .copied()
    }

    pub fn room_of(&self, conn: &ConnectionId) -> Option<&RoomId> {
        self.registry.room_of(conn)
    }

    /// Members in slot order, if the room exists
    pub fn members(&self, room_id: &RoomId) -> Option<&[ConnectionId]> {
        self.rooms.get(room_id).map(|room| room.members.as_slice())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn send(&self, conn: &ConnectionId, msg: OutboundMessage) -> Result<(), SignalingError> {
        self.registry.send(conn, msg)
    }
}
