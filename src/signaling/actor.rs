use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::messages::RelayKind;
use super::relay::{JoinOutcome, Relay, RelayOutcome};
use super::rooms::Removal;
use super::types::{ConnectionId, OutboundMessage, RoomId, SignalingError};

/// Commands sent to the room manager actor
pub(crate) enum RoomCommand {
    Connect {
        tx: mpsc::Sender<OutboundMessage>,
        reply: oneshot::Sender<ConnectionId>,
    },
    CreateOrJoin {
        conn: ConnectionId,
        room_id: Option<String>,
        call_type: Option<String>,
        reply: oneshot::Sender<JoinOutcome>,
    },
    Relay {
        conn: ConnectionId,
        kind: RelayKind,
        envelope: OutboundMessage,
        reply: oneshot::Sender<RelayOutcome>,
    },
    Hangup {
        conn: ConnectionId,
        reply: oneshot::Sender<Option<Removal>>,
    },
    Disconnect {
        conn: ConnectionId,
        reply: oneshot::Sender<Option<Removal>>,
    },
    /// Read-only introspection, used by monitoring and tests
    RoomSize {
        room_id: RoomId,
        reply: oneshot::Sender<Option<usize>>,
    },
    RoomCount {
        reply: oneshot::Sender<usize>,
    },
}

/// Owns all room state. Commands are applied one at a time, so every join and removal is
/// atomic with respect to the others.
pub(crate) async fn room_manager_actor(mut rx: mpsc::Receiver<RoomCommand>) {
    let mut relay = Relay::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RoomCommand::Connect { tx, reply } => {
                let _ = reply.send(relay.connect(tx));
            }

            RoomCommand::CreateOrJoin {
                conn,
                room_id,
                call_type,
                reply,
            } => {
                let outcome =
                    relay.create_or_join(&conn, room_id.as_deref(), call_type.as_deref());
                let _ = reply.send(outcome);
            }

            RoomCommand::Relay {
                conn,
                kind,
                envelope,
                reply,
            } => {
                let _ = reply.send(relay.relay(&conn, kind, envelope));
            }

            RoomCommand::Hangup { conn, reply } => {
                let _ = reply.send(relay.hangup(&conn));
            }

            RoomCommand::Disconnect { conn, reply } => {
                let _ = reply.send(relay.disconnect(&conn));
            }

            RoomCommand::RoomSize { room_id, reply } => {
                let size = relay.table().members(&room_id).map(<[_]>::len);
                let _ = reply.send(size);
            }

            RoomCommand::RoomCount { reply } => {
                let _ = reply.send(relay.table().room_count());
            }
        }
    }

    debug!("Room manager stopped");
}

/// Handle to communicate with the room manager actor
#[derive(Clone)]
pub struct RelayHandle {
    pub(crate) tx: mpsc::Sender<RoomCommand>,
}

impl RelayHandle {
    /// Spawn a fresh actor on the current runtime
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel::<RoomCommand>(1024);
        tokio::spawn(room_manager_actor(rx));
        info!("Room manager started");
        Self { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T, SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| SignalingError::Internal("actor channel closed".to_string()))?;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("actor dropped reply".to_string()))
    }

    /// Register a connection's outbound queue
    pub async fn connect(
        &self,
        tx: mpsc::Sender<OutboundMessage>,
    ) -> Result<ConnectionId, SignalingError> {
        self.request(|reply| RoomCommand::Connect { tx, reply }).await
    }

    /// Create or join a room. Replies reach the clients through their queues.
    pub async fn create_or_join(
        &self,
        conn: ConnectionId,
        room_id: Option<String>,
        call_type: Option<String>,
    ) -> Result<JoinOutcome, SignalingError> {
        self.request(|reply| RoomCommand::CreateOrJoin {
            conn,
            room_id,
            call_type,
            reply,
        })
        .await
    }

    /// Forward an offer, answer or candidate to the peer
    pub async fn relay(
        &self,
        conn: ConnectionId,
        kind: RelayKind,
        envelope: OutboundMessage,
    ) -> Result<RelayOutcome, SignalingError> {
        self.request(|reply| RoomCommand::Relay {
            conn,
            kind,
            envelope,
            reply,
        })
        .await
    }

    pub async fn hangup(&self, conn: ConnectionId) -> Result<Option<Removal>, SignalingError> {
        self.request(|reply| RoomCommand::Hangup { conn, reply })
            .await
    }

    /// Leave any room and forget the connection
    pub async fn disconnect(
        &self,
        conn: ConnectionId,
    ) -> Result<Option<Removal>, SignalingError> {
        self.request(|reply| RoomCommand::Disconnect { conn, reply })
            .await
    }

    /// Number of members in a room, `None` if it does not exist. Introspection only, it
    /// never changes room state; health checks and tests poll it.
    pub async fn room_size(&self, room_id: &str) -> Result<Option<usize>, SignalingError> {
        let room_id = RoomId::from(room_id);
        self.request(|reply| RoomCommand::RoomSize { room_id, reply })
            .await
    }

    /// Number of live rooms, same introspection contract as `room_size`
    pub async fn room_count(&self) -> Result<usize, SignalingError> {
        self.request(|reply| RoomCommand::RoomCount { reply }).await
    }
}
