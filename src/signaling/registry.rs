use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use super::types::{ConnectionId, OutboundMessage, RoomId, SignalingError};

#[derive(Debug)]
struct ConnectionEntry {
    /// Outbound queue drained by the connection's writer task
    tx: mpsc::Sender<OutboundMessage>,
    room: Option<RoomId>,
}

/// Live connections and the room each one is currently in
#[derive(Debug, Default)]
pub(crate) struct ConnectionRegistry {
    entries: HashMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound queue under a fresh, unused id
    pub fn register(&mut self, tx: mpsc::Sender<OutboundMessage>) -> ConnectionId {
        let mut id = ConnectionId::generate();
        while self.entries.contains_key(&id) {
            id = ConnectionId::generate();
        }
        self.entries.insert(id, ConnectionEntry { tx, room: None });
        id
    }

    pub fn unregister(&mut self, id: &ConnectionId) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn room_of(&self, id: &ConnectionId) -> Option<&RoomId> {
        self.entries.get(id).and_then(|entry| entry.room.as_ref())
    }

    /// Returns the previous room, if any
    pub fn set_room(
        &mut self,
        id: &ConnectionId,
        room: Option<RoomId>,
    ) -> Result<Option<RoomId>, SignalingError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or(SignalingError::UnknownConnection(*id))?;
        Ok(std::mem::replace(&mut entry.room, room))
    }

    /// Best-effort, non-blocking send. A full or closed queue drops the message and the
    /// peer counts as unavailable.
    pub fn send(&self, id: &ConnectionId, msg: OutboundMessage) -> Result<(), SignalingError> {
        let entry = self
            .entries
            .get(id)
            .ok_or(SignalingError::UnknownConnection(*id))?;
        entry.tx.try_send(msg).map_err(|e| {
            match e {
                TrySendError::Full(_) => {
                    warn!("Outbound queue of {} is full, dropping message", id)
                }
                TrySendError::Closed(_) => {
                    warn!("Outbound queue of {} is closed, dropping message", id)
                }
            }
            SignalingError::PeerUnavailable
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_assigns_distinct_ids() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(16);

        let a = registry.register(tx.clone());
        let b = registry.register(tx);

        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&a));
        assert!(registry.room_of(&a).is_none());
    }

    #[test]
    fn set_room_tracks_association() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(16);
        let id = registry.register(tx);

        let previous = registry.set_room(&id, Some(RoomId::from("r1"))).unwrap();
        assert!(previous.is_none());
        assert_eq!(registry.room_of(&id), Some(&RoomId::from("r1")));

        let previous = registry.set_room(&id, None).unwrap();
        assert_eq!(previous, Some(RoomId::from("r1")));
        assert!(registry.room_of(&id).is_none());
    }

    #[test]
    fn set_room_on_unknown_connection_fails() {
        let mut registry = ConnectionRegistry::new();
        let ghost = ConnectionId::fixed("conn_deadbeef");
        let err = registry.set_room(&ghost, None).unwrap_err();
        assert!(matches!(err, SignalingError::UnknownConnection(_)));
    }

    #[test]
    fn send_delivers_to_queue() {
        let mut registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::channel(16);
        let id = registry.register(tx);

        registry.send(&id, OutboundMessage::from("hello")).unwrap();
        assert_eq!(rx.try_recv().unwrap().as_str(), "hello");
    }

    #[test]
    fn send_to_closed_queue_reports_peer_unavailable() {
        let mut registry = ConnectionRegistry::new();
        let (tx, rx) = mpsc::channel(16);
        let id = registry.register(tx);
        drop(rx);

        let err = registry.send(&id, OutboundMessage::from("hello")).unwrap_err();
        assert!(matches!(err, SignalingError::PeerUnavailable));
    }

    #[test]
    fn send_to_full_queue_drops_without_blocking() {
        let mut registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::channel(2);
        let id = registry.register(tx);

        registry.send(&id, OutboundMessage::from("one")).unwrap();
        registry.send(&id, OutboundMessage::from("two")).unwrap();
        let err = registry.send(&id, OutboundMessage::from("three")).unwrap_err();
        assert!(matches!(err, SignalingError::PeerUnavailable));

        assert_eq!(rx.try_recv().unwrap().as_str(), "one");
        assert_eq!(rx.try_recv().unwrap().as_str(), "two");
        assert!(rx.try_recv().is_err());

        // room again once the reader catches up
        registry.send(&id, OutboundMessage::from("four")).unwrap();
        assert_eq!(rx.try_recv().unwrap().as_str(), "four");
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(16);
        let id = registry.register(tx);

        assert!(registry.unregister(&id));
        assert!(!registry.unregister(&id));
        assert_eq!(registry.len(), 0);
    }
}
