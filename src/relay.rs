//! Opaque signaling relay
//!
//! Payloads are forwarded verbatim; the hub never parses SDP or ICE. The
//! only structural knowledge is the broadcaster offer cache in the room
//! registry, which stores whole payloads.

use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::error::{HubError, HubResult};
use crate::protocol::ServerMessage;
use crate::session::SessionTable;
use crate::spectate::SpectateRegistry;
use crate::types::ConnId;

/// Relays signaling payloads between paired peers and spectate parties
pub struct SignalRelay {
    sessions: Arc<SessionTable>,
    rooms: Arc<SpectateRegistry>,
}

impl SignalRelay {
    pub fn new(sessions: Arc<SessionTable>, rooms: Arc<SpectateRegistry>) -> Self {
        Self { sessions, rooms }
    }

    /// Forward a 1v1 payload to the sender's opponent, prepending the
    /// sender's identity.
    pub fn forward_to_opponent(&self, sender: ConnId, signal: Value) -> HubResult<()> {
        let session = self
            .sessions
            .get(sender)?
            .ok_or_else(|| HubError::internal(format!("unknown connection {sender}")))?;

        let from = session
            .user_id
            .ok_or_else(|| HubError::auth("not logged in"))?;
        let opponent = session
            .opponent_conn
            .ok_or_else(|| HubError::invalid_state("no opponent to signal"))?;

        // The opponent may have vanished between frames; that is benign.
        let delivered = self
            .sessions
            .send_to(opponent, ServerMessage::WebrtcSignal { from, signal })?;
        debug!(from = %from, to = %opponent, delivered, "Relayed peer signal");
        Ok(())
    }

    /// Broadcaster publishes a payload to every current spectator; the
    /// payload is also cached for latecomer bootstrap.
    pub fn broadcast_to_room(
        &self,
        room_id: &str,
        sender: ConnId,
        signal: Value,
    ) -> HubResult<usize> {
        let spectators = self.rooms.cache_offer(room_id, sender, signal.clone())?;
        let mut delivered = 0;
        for spectator in &spectators {
            if self.sessions.send_to(
                *spectator,
                ServerMessage::SpectateSignal {
                    room_id: room_id.to_string(),
                    signal: signal.clone(),
                },
            )? {
                delivered += 1;
            }
        }
        debug!(room_id = %room_id, delivered, "Fanned out broadcaster signal");
        Ok(delivered)
    }

    /// Broadcaster sends a payload to one specific spectator.
    pub fn to_spectator(
        &self,
        room_id: &str,
        sender: ConnId,
        spectator: ConnId,
        signal: Value,
    ) -> HubResult<()> {
        self.rooms.verify_owner(room_id, sender)?;
        if !self.rooms.is_member(room_id, spectator)? {
            return Err(HubError::not_found(format!(
                "spectator {spectator} is not in room {room_id}"
            )));
        }

        self.sessions.send_to(
            spectator,
            ServerMessage::SpectateSignal {
                room_id: room_id.to_string(),
                signal,
            },
        )?;
        Ok(())
    }

    /// Spectator sends a payload to the room's broadcaster.
    pub fn to_broadcaster(&self, room_id: &str, sender: ConnId, signal: Value) -> HubResult<()> {
        let broadcaster = self.rooms.broadcaster_for_spectator(room_id, sender)?;

        self.sessions.send_to(
            broadcaster,
            ServerMessage::WebrtcSignalToBroadcaster {
                room_id: room_id.to_string(),
                spectator_id: sender,
                signal,
            },
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct Harness {
        sessions: Arc<SessionTable>,
        rooms: Arc<SpectateRegistry>,
        relay: SignalRelay,
    }

    impl Harness {
        fn new() -> Self {
            let sessions = Arc::new(SessionTable::new());
            let rooms = Arc::new(SpectateRegistry::new());
            let relay = SignalRelay::new(sessions.clone(), rooms.clone());
            Self {
                sessions,
                rooms,
                relay,
            }
        }

        fn connect(&self) -> (ConnId, mpsc::UnboundedReceiver<ServerMessage>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (self.sessions.insert(tx).unwrap(), rx)
        }
    }

    #[test]
    fn forwards_to_opponent_with_sender_identity() {
        let h = Harness::new();
        let (c1, _rx1) = h.connect();
        let (c2, mut rx2) = h.connect();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        h.sessions.bind_user(c1, alice, "alice").unwrap();
        h.sessions.bind_user(c2, bob, "bob").unwrap();
        h.sessions.link_match(c1, c2, Uuid::new_v4()).unwrap();

        h.relay
            .forward_to_opponent(c1, json!({"sdp": "v=0"}))
            .unwrap();

        match rx2.try_recv().unwrap() {
            ServerMessage::WebrtcSignal { from, signal } => {
                assert_eq!(from, alice);
                assert_eq!(signal, json!({"sdp": "v=0"}));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn signal_without_opponent_is_a_state_error() {
        let h = Harness::new();
        let (c1, _rx1) = h.connect();
        h.sessions.bind_user(c1, Uuid::new_v4(), "alice").unwrap();

        let err = h.relay.forward_to_opponent(c1, json!({})).unwrap_err();
        assert_eq!(err.kind(), "state");
    }

    #[test]
    fn broadcast_caches_and_fans_out() {
        let h = Harness::new();
        let (owner, _rx_owner) = h.connect();
        let (viewer, mut rx_viewer) = h.connect();
        let token = h.rooms.create_room(owner, "cara").unwrap();
        h.rooms.join(&token, viewer).unwrap();

        let delivered = h
            .relay
            .broadcast_to_room(&token, owner, json!({"offer": "x"}))
            .unwrap();
        assert_eq!(delivered, 1);

        match rx_viewer.try_recv().unwrap() {
            ServerMessage::SpectateSignal { room_id, signal } => {
                assert_eq!(room_id, token);
                assert_eq!(signal, json!({"offer": "x"}));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn directed_spectator_signal_checks_roles() {
        let h = Harness::new();
        let (owner, _rx_owner) = h.connect();
        let (viewer, mut rx_viewer) = h.connect();
        let (stranger, _rx_stranger) = h.connect();
        let token = h.rooms.create_room(owner, "cara").unwrap();
        h.rooms.join(&token, viewer).unwrap();

        // Stranger cannot use the owner path.
        let err = h
            .relay
            .to_spectator(&token, stranger, viewer, json!({}))
            .unwrap_err();
        assert_eq!(err.kind(), "auth");

        // Targeting a non-member fails.
        let err = h
            .relay
            .to_spectator(&token, owner, stranger, json!({}))
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");

        h.relay
            .to_spectator(&token, owner, viewer, json!({"answer": 1}))
            .unwrap();
        assert!(matches!(
            rx_viewer.try_recv().unwrap(),
            ServerMessage::SpectateSignal { .. }
        ));
    }

    #[test]
    fn spectator_to_broadcaster_requires_membership() {
        let h = Harness::new();
        let (owner, mut rx_owner) = h.connect();
        let (viewer, _rx_viewer) = h.connect();
        let (stranger, _rx_stranger) = h.connect();
        let token = h.rooms.create_room(owner, "cara").unwrap();
        h.rooms.join(&token, viewer).unwrap();

        let err = h
            .relay
            .to_broadcaster(&token, stranger, json!({}))
            .unwrap_err();
        assert_eq!(err.kind(), "auth");

        h.relay
            .to_broadcaster(&token, viewer, json!({"answer": "a"}))
            .unwrap();
        match rx_owner.try_recv().unwrap() {
            ServerMessage::WebrtcSignalToBroadcaster { spectator_id, .. } => {
                assert_eq!(spectator_id, viewer);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
