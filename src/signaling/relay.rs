use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::messages::{RelayKind, ServerMessage};
use super::rooms::{Joined, Removal, RoomTable};
use super::types::{ConnectionId, OutboundMessage, RoomId, SignalingError};

/// What happened to a create_or_join request
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    Joined(Joined),
    RoomFull(RoomId),
    Rejected(String),
}

/// What happened to an offer/answer/candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Forwarded(ConnectionId),
    /// No peer, sender was told
    PeerUnavailable,
    /// No peer, nobody was told (candidates)
    Dropped,
    NotInRoom,
}

/// The signaling protocol on top of the room table.
///
/// Every message caused by a state change is pushed from here, so each connection sees
/// them in the order the events were applied.
#[derive(Debug, Default)]
pub struct Relay {
    table: RoomTable,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self) -> &RoomTable {
        &self.table
    }

    pub fn connect(&mut self, tx: mpsc::Sender<OutboundMessage>) -> ConnectionId {
        self.table.connect(tx)
    }

    pub fn create_or_join(
        &mut self,
        conn: &ConnectionId,
        room_id: Option<&str>,
        call_type: Option<&str>,
    ) -> JoinOutcome {
        let result = self.table.create_or_join(
            conn,
            room_id.unwrap_or_default(),
            call_type.unwrap_or_default(),
        );

        match result {
            Ok(joined) => {
                self.notify(
                    conn,
                    &ServerMessage::Joined {
                        room_id: joined.room_id.clone(),
                        is_initiator: joined.role.is_initiator(),
                        call_type: joined.call_type.clone(),
                    },
                );
                if let Some(initiator) = joined.initiator {
                    self.notify(
                        &initiator,
                        &ServerMessage::PeerJoined {
                            room_id: joined.room_id.clone(),
                            call_type: joined.call_type.clone(),
                        },
                    );
                    info!(
                        "Notified initiator {} in room {} that peer joined",
                        initiator, joined.room_id
                    );
                }
                JoinOutcome::Joined(joined)
            }
            Err(SignalingError::RoomFull(room_id)) => {
                warn!("Room {} is full, rejecting {}", room_id, conn);
                self.notify(
                    conn,
                    &ServerMessage::RoomFull {
                        room_id: room_id.clone(),
                    },
                );
                JoinOutcome::RoomFull(room_id)
            }
            Err(e) => {
                warn!("create_or_join from {} rejected: {}", conn, e);
                let message = match e {
                    SignalingError::InvalidRequest(reason) => reason.to_string(),
                    other => other.to_string(),
                };
                self.notify(conn, &ServerMessage::error(message.clone()));
                JoinOutcome::Rejected(message)
            }
        }
    }

    /// Forward `envelope` untouched to the sender's peer
    pub fn relay(
        &mut self,
        conn: &ConnectionId,
        kind: RelayKind,
        envelope: OutboundMessage,
    ) -> RelayOutcome {
        if self.table.room_of(conn).is_none() {
            warn!("Cannot relay {} from {}: not in a room", kind.as_str(), conn);
            self.notify(conn, &ServerMessage::error(SignalingError::NotInRoom.to_string()));
            return RelayOutcome::NotInRoom;
        }

        let delivered = self
            .table
            .peer_of(conn)
            .filter(|peer| self.table.send(peer, envelope).is_ok());

        match delivered {
            Some(peer) => {
                debug!("Relayed {} from {} to {}", kind.as_str(), conn, peer);
                RelayOutcome::Forwarded(peer)
            }
            None if kind.reports_unavailable_peer() => {
                debug!("Cannot relay {} from {}: no peer", kind.as_str(), conn);
                self.notify(
                    conn,
                    &ServerMessage::PeerUnavailable {
                        message: SignalingError::PeerUnavailable.to_string(),
                    },
                );
                RelayOutcome::PeerUnavailable
            }
            None => {
                debug!("Dropped {} from {}: no peer", kind.as_str(), conn);
                RelayOutcome::Dropped
            }
        }
    }

    /// Explicit end of call. The peer gets `peer_hangup` and is taken out too, so the room
    /// is gone and both connections are unassociated.
    pub fn hangup(&mut self, conn: &ConnectionId) -> Option<Removal> {
        let Some(removal) = self.table.remove_member(conn) else {
            warn!("Ignoring hangup from {}: not in a room", conn);
            return None;
        };
        if let Some(peer) = removal.remaining {
            info!("Relaying hangup in room {}", removal.room_id);
            self.notify(&peer, &ServerMessage::PeerHangup);
            self.table.remove_member(&peer);
        }
        Some(removal)
    }

    /// Transport went away, the peer gets `peer_left`
    pub fn disconnect(&mut self, conn: &ConnectionId) -> Option<Removal> {
        let removal = self.table.disconnect(conn)?;
        if let Some(peer) = removal.remaining {
            info!(
                "Notified {} in room {} that the other client left",
                peer, removal.room_id
            );
            self.notify(&peer, &ServerMessage::PeerLeft);
        }
        Some(removal)
    }

    /// Best-effort send of a server-generated message
    fn notify(&self, conn: &ConnectionId, msg: &ServerMessage) {
        match msg.to_outbound() {
            Ok(out) => {
                if let Err(e) = self.table.send(conn, out) {
                    debug!("Dropped message for {}: {}", conn, e);
                }
            }
            Err(e) => warn!("Failed to serialize {:?}: {}", msg, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tokio::sync::mpsc::Receiver;

    use crate::signaling::types::{CallType, Role};

    struct Client {
        id: ConnectionId,
        rx: Receiver<OutboundMessage>,
    }

    impl Client {
        fn connect(relay: &mut Relay) -> Self {
            let (tx, rx) = mpsc::channel(16);
            let id = relay.connect(tx);
            Self { id, rx }
        }

        fn drain(&mut self) -> Vec<Value> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(serde_json::from_str(msg.as_str()).unwrap());
            }
            out
        }

        fn drain_raw(&mut self) -> Vec<String> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(msg.as_str().to_string());
            }
            out
        }
    }

    fn join(relay: &mut Relay, client: &Client, room: &str, call_type: &str) -> JoinOutcome {
        relay.create_or_join(&client.id, Some(room), Some(call_type))
    }

    fn paired(relay: &mut Relay) -> (Client, Client) {
        let mut a = Client::connect(relay);
        let mut b = Client::connect(relay);
        join(relay, &a, "r1", "video");
        join(relay, &b, "r1", "video");
        a.drain();
        b.drain();
        (a, b)
    }

    #[test]
    fn join_scenario_initiator_call_type_wins() {
        let mut relay = Relay::new();
        let mut a = Client::connect(&mut relay);
        let mut b = Client::connect(&mut relay);

        join(&mut relay, &a, "r1", "video");
        assert_eq!(
            a.drain(),
            vec![json!({"type": "joined", "roomId": "r1", "isInitiator": true, "callType": "video"})]
        );

        let outcome = join(&mut relay, &b, "r1", "audio");
        assert!(matches!(outcome, JoinOutcome::Joined(Joined { role: Role::Joiner, .. })));
        assert_eq!(
            b.drain(),
            vec![json!({"type": "joined", "roomId": "r1", "isInitiator": false, "callType": "video"})]
        );
        assert_eq!(
            a.drain(),
            vec![json!({"type": "peer_joined", "roomId": "r1", "callType": "video"})]
        );
    }

    #[test]
    fn third_join_gets_room_full() {
        let mut relay = Relay::new();
        let (mut a, mut b) = paired(&mut relay);
        let mut c = Client::connect(&mut relay);

        let outcome = join(&mut relay, &c, "r1", "video");
        assert_eq!(outcome, JoinOutcome::RoomFull(RoomId::from("r1")));
        assert_eq!(c.drain(), vec![json!({"type": "room_full", "roomId": "r1"})]);
        assert!(a.drain().is_empty());
        assert!(b.drain().is_empty());

        // still usable afterwards
        let outcome = join(&mut relay, &c, "r2", "audio");
        assert!(matches!(outcome, JoinOutcome::Joined(_)));
    }

    #[test]
    fn missing_room_id_is_reported() {
        let mut relay = Relay::new();
        let mut a = Client::connect(&mut relay);

        let outcome = relay.create_or_join(&a.id, None, Some("video"));
        assert_eq!(outcome, JoinOutcome::Rejected("Room ID required".to_string()));
        assert_eq!(
            a.drain(),
            vec![json!({"type": "error", "message": "Room ID required"})]
        );
        assert_eq!(relay.table().room_count(), 0);
    }

    #[test]
    fn missing_call_type_is_reported() {
        let mut relay = Relay::new();
        let mut a = Client::connect(&mut relay);

        relay.create_or_join(&a.id, Some("r1"), None);
        assert_eq!(
            a.drain(),
            vec![json!({"type": "error", "message": "Call type required"})]
        );
    }

    #[test]
    fn offer_answer_and_candidates_are_relayed_verbatim() {
        let mut relay = Relay::new();
        let (mut a, mut b) = paired(&mut relay);

        let offer = r#"{"type":"offer","offer":{"type":"offer","sdp":"v=0\r\no=- 1 2 IN IP4 0.0.0.0"}}"#;
        let outcome = relay.relay(&a.id, RelayKind::Offer, OutboundMessage::from(offer));
        assert_eq!(outcome, RelayOutcome::Forwarded(b.id));
        assert_eq!(b.drain_raw(), vec![offer.to_string()]);

        let answer = r#"{"type":"answer",  "answer":{"sdp":"x"}}"#;
        relay.relay(&b.id, RelayKind::Answer, OutboundMessage::from(answer));
        assert_eq!(a.drain_raw(), vec![answer.to_string()]);

        for i in 0..5 {
            let candidate = format!(r#"{{"type":"candidate","candidate":{{"n":{}}}}}"#, i);
            relay.relay(&a.id, RelayKind::Candidate, OutboundMessage::from(candidate));
        }
        let received = b.drain_raw();
        assert_eq!(received.len(), 5);
        assert_eq!(received[3], r#"{"type":"candidate","candidate":{"n":3}}"#);
        assert!(a.drain().is_empty());
    }

    #[test]
    fn offer_without_peer_reports_unavailable() {
        let mut relay = Relay::new();
        let mut a = Client::connect(&mut relay);
        join(&mut relay, &a, "r1", "video");
        a.drain();

        let outcome = relay.relay(&a.id, RelayKind::Offer, OutboundMessage::from("{}"));
        assert_eq!(outcome, RelayOutcome::PeerUnavailable);
        assert_eq!(
            a.drain(),
            vec![json!({"type": "peer_unavailable", "message": "The other peer is not connected."})]
        );
    }

    #[test]
    fn candidate_without_peer_is_dropped_silently() {
        let mut relay = Relay::new();
        let mut a = Client::connect(&mut relay);
        join(&mut relay, &a, "r1", "video");
        a.drain();

        let outcome = relay.relay(&a.id, RelayKind::Candidate, OutboundMessage::from("{}"));
        assert_eq!(outcome, RelayOutcome::Dropped);
        assert!(a.drain().is_empty());
    }

    #[test]
    fn relay_outside_room_is_an_error() {
        let mut relay = Relay::new();
        let mut a = Client::connect(&mut relay);

        let outcome = relay.relay(&a.id, RelayKind::Answer, OutboundMessage::from("{}"));
        assert_eq!(outcome, RelayOutcome::NotInRoom);
        assert_eq!(
            a.drain(),
            vec![json!({"type": "error", "message": "Not connected to a room."})]
        );
    }

    #[test]
    fn offer_to_closed_peer_queue_reports_unavailable() {
        let mut relay = Relay::new();
        let (mut a, b) = paired(&mut relay);
        drop(b.rx);

        let outcome = relay.relay(&a.id, RelayKind::Offer, OutboundMessage::from("{}"));
        assert_eq!(outcome, RelayOutcome::PeerUnavailable);
        assert_eq!(a.drain()[0]["type"], "peer_unavailable");
    }

    #[test]
    fn hangup_notifies_peer_once_and_dissolves_room() {
        let mut relay = Relay::new();
        let (mut a, mut b) = paired(&mut relay);

        let removal = relay.hangup(&a.id).unwrap();
        assert_eq!(removal.remaining, Some(b.id));
        assert_eq!(b.drain(), vec![json!({"type": "peer_hangup"})]);
        assert!(a.drain().is_empty());

        assert_eq!(relay.table().room_count(), 0);
        assert!(relay.table().room_of(&a.id).is_none());
        assert!(relay.table().room_of(&b.id).is_none());

        // the peer's own hangup is now a no-op
        assert!(relay.hangup(&b.id).is_none());
        assert!(a.drain().is_empty());
    }

    #[test]
    fn fresh_pair_after_hangup_starts_new_room() {
        let mut relay = Relay::new();
        let (a, mut b) = paired(&mut relay);
        relay.hangup(&a.id);
        b.drain();

        let mut c = Client::connect(&mut relay);
        let d = Client::connect(&mut relay);
        match join(&mut relay, &c, "r1", "audio") {
            JoinOutcome::Joined(joined) => {
                assert_eq!(joined.role, Role::Initiator);
                assert_eq!(joined.call_type, CallType::from("audio"));
            }
            other => panic!("Expected Joined, got {:?}", other),
        }
        match join(&mut relay, &d, "r1", "video") {
            JoinOutcome::Joined(joined) => {
                assert_eq!(joined.initiator, Some(c.id));
                assert_eq!(joined.call_type, CallType::from("audio"));
            }
            other => panic!("Expected Joined, got {:?}", other),
        }

        // the connection that was hung up on is not pulled into the new pair
        assert!(b.drain().is_empty());
        assert_eq!(c.drain()[1]["type"], "peer_joined");
    }

    #[test]
    fn offer_to_full_peer_queue_reports_unavailable() {
        let mut relay = Relay::new();
        let mut a = Client::connect(&mut relay);
        let (b_tx, mut b_rx) = mpsc::channel(1);
        let b = relay.connect(b_tx);
        join(&mut relay, &a, "r1", "video");
        relay.create_or_join(&b, Some("r1"), Some("video"));
        a.drain();

        // b's queue still holds its unread `joined`
        let outcome = relay.relay(&a.id, RelayKind::Offer, OutboundMessage::from("{}"));
        assert_eq!(outcome, RelayOutcome::PeerUnavailable);
        assert_eq!(a.drain()[0]["type"], "peer_unavailable");

        let outcome = relay.relay(&a.id, RelayKind::Candidate, OutboundMessage::from("{}"));
        assert_eq!(outcome, RelayOutcome::Dropped);
        assert!(a.drain().is_empty());

        assert!(b_rx.try_recv().unwrap().as_str().contains("\"joined\""));
        let outcome = relay.relay(&a.id, RelayKind::Offer, OutboundMessage::from("{}"));
        assert_eq!(outcome, RelayOutcome::Forwarded(b));
    }

    #[test]
    fn hangup_outside_room_is_ignored() {
        let mut relay = Relay::new();
        let mut a = Client::connect(&mut relay);
        assert!(relay.hangup(&a.id).is_none());
        assert!(a.drain().is_empty());
    }

    #[test]
    fn hung_up_connection_can_join_again() {
        let mut relay = Relay::new();
        let (a, _b) = paired(&mut relay);
        relay.hangup(&a.id);

        let outcome = join(&mut relay, &a, "r9", "audio");
        assert!(matches!(outcome, JoinOutcome::Joined(_)));
    }

    #[test]
    fn disconnect_notifies_peer_left() {
        let mut relay = Relay::new();
        let (a, mut b) = paired(&mut relay);

        relay.disconnect(&a.id);
        assert_eq!(b.drain(), vec![json!({"type": "peer_left"})]);
        assert_eq!(
            relay.table().members(&RoomId::from("r1")).map(<[_]>::len),
            Some(1)
        );
    }

    #[test]
    fn disconnect_without_room_is_silent() {
        let mut relay = Relay::new();
        let a = Client::connect(&mut relay);
        let mut b = Client::connect(&mut relay);

        assert!(relay.disconnect(&a.id).is_none());
        assert!(b.drain().is_empty());
        assert_eq!(relay.table().connection_count(), 1);
    }

    #[test]
    fn initiator_leaving_before_join_frees_room() {
        let mut relay = Relay::new();
        let a = Client::connect(&mut relay);
        let b = Client::connect(&mut relay);

        join(&mut relay, &a, "r2", "video");
        relay.disconnect(&a.id);
        assert_eq!(relay.table().room_count(), 0);

        let outcome = join(&mut relay, &b, "r2", "audio");
        assert!(matches!(
            outcome,
            JoinOutcome::Joined(Joined {
                role: Role::Initiator,
                ..
            })
        ));
    }
}
