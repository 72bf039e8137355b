//! Broadcast-list and queue-count notifications
//!
//! Keeps no state of its own: every push derives the current list or count
//! from the registry and queue at send time.

use std::sync::Arc;
use tracing::debug;

use crate::error::HubResult;
use crate::matchmaking::MatchQueue;
use crate::protocol::ServerMessage;
use crate::session::SessionTable;
use crate::spectate::SpectateRegistry;
use crate::types::ConnId;

/// Pushes room-list and queue-count deltas to connections
pub struct ListNotifier {
    sessions: Arc<SessionTable>,
    rooms: Arc<SpectateRegistry>,
    queue: Arc<MatchQueue>,
}

impl ListNotifier {
    pub fn new(
        sessions: Arc<SessionTable>,
        rooms: Arc<SpectateRegistry>,
        queue: Arc<MatchQueue>,
    ) -> Self {
        Self {
            sessions,
            rooms,
            queue,
        }
    }

    /// Push the current room list to every open connection.
    pub fn broadcast_room_list(&self) -> HubResult<()> {
        let rooms = self.rooms.summaries()?;
        debug!(rooms = rooms.len(), "Pushing broadcast list update");
        self.sessions
            .broadcast(ServerMessage::BroadcastListUpdate { rooms })
    }

    /// Push the current room list to a single connection (explicit
    /// `get_broadcast_list`).
    pub fn send_room_list(&self, conn: ConnId) -> HubResult<()> {
        let rooms = self.rooms.summaries()?;
        self.sessions
            .send_to(conn, ServerMessage::BroadcastListUpdate { rooms })?;
        Ok(())
    }

    /// Push the current queue depth to every open connection.
    pub fn broadcast_queue_count(&self) -> HubResult<()> {
        let count = self.queue.len()?;
        debug!(count, "Pushing queue count update");
        self.sessions
            .broadcast(ServerMessage::QueueCountUpdate { count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn build() -> (
        Arc<SessionTable>,
        Arc<SpectateRegistry>,
        Arc<MatchQueue>,
        ListNotifier,
    ) {
        let sessions = Arc::new(SessionTable::new());
        let rooms = Arc::new(SpectateRegistry::new());
        let queue = Arc::new(MatchQueue::new());
        let notifier = ListNotifier::new(sessions.clone(), rooms.clone(), queue.clone());
        (sessions, rooms, queue, notifier)
    }

    #[test]
    fn queue_count_reaches_all_connections() {
        let (sessions, _rooms, queue, notifier) = build();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        sessions.insert(tx1).unwrap();
        sessions.insert(tx2).unwrap();
        queue.enqueue(Uuid::new_v4()).unwrap();

        notifier.broadcast_queue_count().unwrap();

        for rx in [&mut rx1, &mut rx2] {
            match rx.try_recv().unwrap() {
                ServerMessage::QueueCountUpdate { count } => assert_eq!(count, 1),
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    #[test]
    fn room_list_is_derived_at_send_time() {
        let (sessions, rooms, _queue, notifier) = build();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = sessions.insert(tx).unwrap();

        notifier.send_room_list(conn).unwrap();
        match rx.try_recv().unwrap() {
            ServerMessage::BroadcastListUpdate { rooms } => assert!(rooms.is_empty()),
            other => panic!("unexpected message: {other:?}"),
        }

        rooms.create_room(Uuid::new_v4(), "cara").unwrap();
        notifier.send_room_list(conn).unwrap();
        match rx.try_recv().unwrap() {
            ServerMessage::BroadcastListUpdate { rooms } => {
                assert_eq!(rooms.len(), 1);
                assert_eq!(rooms[0].broadcaster_username, "cara");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
