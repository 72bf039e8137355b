//! Session table: connection ↔ connection-id ↔ user-id
//!
//! Each live connection exclusively owns its session record; the table keeps
//! the lookup maps consistent and enforces one live session per user.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::error::{HubError, HubResult as Result};
use crate::protocol::ServerMessage;
use crate::types::{ConnId, MatchId, UserId};
use crate::utils::{current_timestamp, generate_conn_id};

/// Outbound handle for one connection
pub type Outbound = UnboundedSender<ServerMessage>;

/// Per-connection session record
#[derive(Debug, Clone)]
pub struct Session {
    pub conn_id: ConnId,
    pub sender: Outbound,
    pub user_id: Option<UserId>,
    pub username: Option<String>,
    /// Runtime hint at the opponent's connection; the store stays
    /// authoritative for match membership.
    pub opponent_conn: Option<ConnId>,
    pub match_id: Option<MatchId>,
    pub connected_at: DateTime<Utc>,
}

impl Session {
    pub fn is_bound(&self) -> bool {
        self.user_id.is_some()
    }
}

#[derive(Debug, Default)]
struct TableInner {
    sessions: HashMap<ConnId, Session>,
    /// Populated only while a user has a logged-in live connection
    user_index: HashMap<UserId, ConnId>,
}

/// The session table
#[derive(Debug, Default)]
pub struct SessionTable {
    inner: RwLock<TableInner>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, TableInner>> {
        self.inner
            .read()
            .map_err(|_| HubError::internal("failed to acquire session table lock"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, TableInner>> {
        self.inner
            .write()
            .map_err(|_| HubError::internal("failed to acquire session table lock"))
    }

    /// Register a freshly accepted connection.
    pub fn insert(&self, sender: Outbound) -> Result<ConnId> {
        let conn_id = generate_conn_id();
        let session = Session {
            conn_id,
            sender,
            user_id: None,
            username: None,
            opponent_conn: None,
            match_id: None,
            connected_at: current_timestamp(),
        };

        let mut inner = self.write()?;
        inner.sessions.insert(conn_id, session);
        debug!(conn_id = %conn_id, total = inner.sessions.len(), "Connection registered");
        Ok(conn_id)
    }

    /// Bind a user to a connection after a successful login.
    ///
    /// When the user already has a different live connection, that connection
    /// receives `logout_forced`, is unbound, and its id is returned so the
    /// hub can tear down state it owned (spectate rooms).
    pub fn bind_user(
        &self,
        conn_id: ConnId,
        user_id: UserId,
        username: &str,
    ) -> Result<Option<ConnId>> {
        let mut inner = self.write()?;

        let previous = inner.user_index.get(&user_id).copied();
        let displaced = match previous {
            Some(prev) if prev != conn_id => {
                if let Some(old) = inner.sessions.get_mut(&prev) {
                    info!(
                        user_id = %user_id,
                        old_conn = %prev,
                        new_conn = %conn_id,
                        "Session takeover, forcing logout on previous connection"
                    );
                    let _ = old.sender.send(ServerMessage::LogoutForced);
                    old.user_id = None;
                    old.username = None;
                    old.opponent_conn = None;
                    old.match_id = None;
                    Some(prev)
                } else {
                    // Stale index entry; nothing live to displace.
                    None
                }
            }
            _ => None,
        };

        let session = inner
            .sessions
            .get_mut(&conn_id)
            .ok_or_else(|| HubError::internal(format!("unknown connection {conn_id}")))?;
        session.user_id = Some(user_id);
        session.username = Some(username.to_string());
        inner.user_index.insert(user_id, conn_id);

        Ok(displaced)
    }

    /// Unbind whatever user is attached to this connection (logout).
    ///
    /// The user index entry is removed only if it still points at this
    /// connection, so a stale logout cannot evict a newer session.
    pub fn unbind(&self, conn_id: ConnId) -> Result<Option<UserId>> {
        let mut inner = self.write()?;

        let Some(session) = inner.sessions.get_mut(&conn_id) else {
            return Ok(None);
        };
        let Some(user_id) = session.user_id.take() else {
            return Ok(None);
        };
        session.username = None;
        session.opponent_conn = None;
        session.match_id = None;

        if inner.user_index.get(&user_id) == Some(&conn_id) {
            inner.user_index.remove(&user_id);
        }

        Ok(Some(user_id))
    }

    /// Drop a closed connection. Returns the removed session so the caller
    /// can clean up state keyed by it.
    pub fn remove(&self, conn_id: ConnId) -> Result<Option<Session>> {
        let mut inner = self.write()?;

        let Some(session) = inner.sessions.remove(&conn_id) else {
            return Ok(None);
        };

        if let Some(user_id) = session.user_id {
            // A takeover may already have repointed the index.
            if inner.user_index.get(&user_id) == Some(&conn_id) {
                inner.user_index.remove(&user_id);
            } else {
                warn!(
                    conn_id = %conn_id,
                    user_id = %user_id,
                    "Stale close: user index already points at a newer session"
                );
            }
        }

        debug!(conn_id = %conn_id, remaining = inner.sessions.len(), "Connection removed");
        Ok(Some(session))
    }

    pub fn get(&self, conn_id: ConnId) -> Result<Option<Session>> {
        Ok(self.read()?.sessions.get(&conn_id).cloned())
    }

    /// Resolve a user to their live connection, if any.
    pub fn resolve_user(&self, user_id: UserId) -> Result<Option<ConnId>> {
        Ok(self.read()?.user_index.get(&user_id).copied())
    }

    /// The bound identity of a connection, if bound.
    pub fn identity(&self, conn_id: ConnId) -> Result<Option<(UserId, String)>> {
        let inner = self.read()?;
        Ok(inner.sessions.get(&conn_id).and_then(|s| {
            Some((s.user_id?, s.username.clone()?))
        }))
    }

    /// Cross-link two sessions into a match.
    pub fn link_match(
        &self,
        a: ConnId,
        b: ConnId,
        match_id: MatchId,
    ) -> Result<()> {
        let mut inner = self.write()?;

        for (conn, opp) in [(a, b), (b, a)] {
            let session = inner
                .sessions
                .get_mut(&conn)
                .ok_or_else(|| HubError::internal(format!("unknown connection {conn}")))?;
            session.opponent_conn = Some(opp);
            session.match_id = Some(match_id);
        }
        Ok(())
    }

    /// Clear a session's match pointers (after resolution or on request).
    pub fn clear_match(&self, conn_id: ConnId) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(session) = inner.sessions.get_mut(&conn_id) {
            session.opponent_conn = None;
            session.match_id = None;
        }
        Ok(())
    }

    /// Best-effort send to one connection. Returns false when the connection
    /// is gone or its channel is closed.
    pub fn send_to(&self, conn_id: ConnId, message: ServerMessage) -> Result<bool> {
        let inner = self.read()?;
        Ok(inner
            .sessions
            .get(&conn_id)
            .map(|s| s.sender.send(message).is_ok())
            .unwrap_or(false))
    }

    /// Best-effort send to a user's live connection.
    pub fn send_to_user(&self, user_id: UserId, message: ServerMessage) -> Result<bool> {
        let inner = self.read()?;
        let Some(conn_id) = inner.user_index.get(&user_id) else {
            return Ok(false);
        };
        Ok(inner
            .sessions
            .get(conn_id)
            .map(|s| s.sender.send(message).is_ok())
            .unwrap_or(false))
    }

    /// Push an event to every open connection.
    pub fn broadcast(&self, message: ServerMessage) -> Result<()> {
        let inner = self.read()?;
        for session in inner.sessions.values() {
            let _ = session.sender.send(message.clone());
        }
        Ok(())
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> Result<usize> {
        Ok(self.read()?.sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn channel() -> (Outbound, mpsc::UnboundedReceiver<ServerMessage>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn bind_and_resolve() {
        let table = SessionTable::new();
        let (tx, _rx) = channel();
        let conn = table.insert(tx).unwrap();
        let user = Uuid::new_v4();

        assert!(table.bind_user(conn, user, "alice").unwrap().is_none());
        assert_eq!(table.resolve_user(user).unwrap(), Some(conn));
        assert_eq!(
            table.identity(conn).unwrap(),
            Some((user, "alice".to_string()))
        );
    }

    #[test]
    fn takeover_forces_logout_on_previous_connection() {
        let table = SessionTable::new();
        let (tx1, mut rx1) = channel();
        let (tx2, _rx2) = channel();
        let c1 = table.insert(tx1).unwrap();
        let c2 = table.insert(tx2).unwrap();
        let user = Uuid::new_v4();

        table.bind_user(c1, user, "alice").unwrap();
        let displaced = table.bind_user(c2, user, "alice").unwrap();

        assert_eq!(displaced, Some(c1));
        assert_eq!(table.resolve_user(user).unwrap(), Some(c2));
        assert!(matches!(
            rx1.try_recv().unwrap(),
            ServerMessage::LogoutForced
        ));
        // The old connection is unbound but still present.
        let old = table.get(c1).unwrap().unwrap();
        assert!(!old.is_bound());
    }

    #[test]
    fn rebinding_same_connection_is_not_a_takeover() {
        let table = SessionTable::new();
        let (tx, mut rx) = channel();
        let conn = table.insert(tx).unwrap();
        let user = Uuid::new_v4();

        table.bind_user(conn, user, "alice").unwrap();
        let displaced = table.bind_user(conn, user, "alice").unwrap();

        assert!(displaced.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stale_close_does_not_evict_newer_session() {
        let table = SessionTable::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        let c1 = table.insert(tx1).unwrap();
        let c2 = table.insert(tx2).unwrap();
        let user = Uuid::new_v4();

        table.bind_user(c1, user, "alice").unwrap();
        table.bind_user(c2, user, "alice").unwrap();

        // C1 closes late; the user must remain resolvable through C2.
        table.remove(c1).unwrap();
        assert_eq!(table.resolve_user(user).unwrap(), Some(c2));
    }

    #[test]
    fn unbind_clears_only_matching_index_entry() {
        let table = SessionTable::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        let c1 = table.insert(tx1).unwrap();
        let c2 = table.insert(tx2).unwrap();
        let user = Uuid::new_v4();

        table.bind_user(c1, user, "alice").unwrap();
        table.bind_user(c2, user, "alice").unwrap();

        // C1 was already displaced; its unbind is a no-op for the index.
        assert!(table.unbind(c1).unwrap().is_none());
        assert_eq!(table.resolve_user(user).unwrap(), Some(c2));

        assert_eq!(table.unbind(c2).unwrap(), Some(user));
        assert_eq!(table.resolve_user(user).unwrap(), None);
    }

    #[test]
    fn link_and_clear_match_pointers() {
        let table = SessionTable::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        let c1 = table.insert(tx1).unwrap();
        let c2 = table.insert(tx2).unwrap();
        let match_id = Uuid::new_v4();

        table.link_match(c1, c2, match_id).unwrap();
        assert_eq!(table.get(c1).unwrap().unwrap().opponent_conn, Some(c2));
        assert_eq!(table.get(c2).unwrap().unwrap().match_id, Some(match_id));

        table.clear_match(c1).unwrap();
        assert_eq!(table.get(c1).unwrap().unwrap().opponent_conn, None);
        // Clearing one side leaves the other side's hint alone.
        assert_eq!(table.get(c2).unwrap().unwrap().opponent_conn, Some(c1));
    }

    #[test]
    fn broadcast_reaches_every_connection() {
        let table = SessionTable::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        table.insert(tx1).unwrap();
        table.insert(tx2).unwrap();

        table
            .broadcast(ServerMessage::QueueCountUpdate { count: 3 })
            .unwrap();

        assert!(matches!(
            rx1.try_recv().unwrap(),
            ServerMessage::QueueCountUpdate { count: 3 }
        ));
        assert!(matches!(
            rx2.try_recv().unwrap(),
            ServerMessage::QueueCountUpdate { count: 3 }
        ));
    }
}
