//! Spectate room registry
//!
//! Rooms have one broadcaster and a dynamic set of spectators. The registry
//! owns only room state; notification fan-out is done by the callers through
//! the session table. Reverse lookup at disconnect time is a scan, which is
//! fine at the room counts this hub sees.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::{debug, info};

use crate::error::{HubError, HubResult};
use crate::types::{ConnId, RoomSummary, RoomToken};
use crate::utils::{current_timestamp, generate_room_token};

/// One spectate room
#[derive(Debug, Clone)]
pub struct SpectateRoom {
    pub token: RoomToken,
    pub broadcaster_conn: ConnId,
    /// Display name captured when the room was created
    pub broadcaster_name: String,
    pub spectators: HashSet<ConnId>,
    /// Last signaling payload the broadcaster published, replayed to
    /// latecomers so they can join without a renegotiation
    pub cached_offer: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Registry of open spectate rooms
#[derive(Debug, Default)]
pub struct SpectateRegistry {
    rooms: RwLock<HashMap<RoomToken, SpectateRoom>>,
}

impl SpectateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> HubResult<std::sync::RwLockReadGuard<'_, HashMap<RoomToken, SpectateRoom>>> {
        self.rooms
            .read()
            .map_err(|_| HubError::internal("failed to acquire room registry lock"))
    }

    fn write(
        &self,
    ) -> HubResult<std::sync::RwLockWriteGuard<'_, HashMap<RoomToken, SpectateRoom>>> {
        self.rooms
            .write()
            .map_err(|_| HubError::internal("failed to acquire room registry lock"))
    }

    /// Open a room owned by the given connection.
    pub fn create_room(&self, owner: ConnId, display_name: &str) -> HubResult<RoomToken> {
        let mut rooms = self.write()?;

        let mut token = generate_room_token();
        while rooms.contains_key(&token) {
            token = generate_room_token();
        }

        rooms.insert(
            token.clone(),
            SpectateRoom {
                token: token.clone(),
                broadcaster_conn: owner,
                broadcaster_name: display_name.to_string(),
                spectators: HashSet::new(),
                cached_offer: None,
                created_at: current_timestamp(),
            },
        );

        info!(room_id = %token, broadcaster = %display_name, "Spectate room opened");
        Ok(token)
    }

    /// Destroy a room. When `requester` is given the call is owner-only.
    /// Returns the removed room so the caller can notify its spectators.
    pub fn remove_room(
        &self,
        token: &str,
        requester: Option<ConnId>,
    ) -> HubResult<SpectateRoom> {
        let mut rooms = self.write()?;

        let room = rooms
            .get(token)
            .ok_or_else(|| HubError::not_found(format!("unknown room {token}")))?;
        if let Some(conn) = requester {
            if room.broadcaster_conn != conn {
                return Err(HubError::auth("only the broadcaster can stop this room"));
            }
        }

        let room = rooms.remove(token).ok_or_else(|| {
            HubError::internal(format!("room {token} vanished during removal"))
        })?;
        info!(room_id = %token, spectators = room.spectators.len(), "Spectate room closed");
        Ok(room)
    }

    /// Add a spectator. Returns the broadcaster connection (for the
    /// `new_spectator` notice) and the cached offer for bootstrap.
    pub fn join(&self, token: &str, spectator: ConnId) -> HubResult<(ConnId, Option<Value>)> {
        let mut rooms = self.write()?;

        let room = rooms
            .get_mut(token)
            .ok_or_else(|| HubError::not_found(format!("unknown room {token}")))?;
        if room.broadcaster_conn == spectator {
            return Err(HubError::validation("the broadcaster cannot spectate their own room"));
        }

        room.spectators.insert(spectator);
        debug!(room_id = %token, spectator = %spectator, count = room.spectators.len(), "Spectator joined");
        Ok((room.broadcaster_conn, room.cached_offer.clone()))
    }

    /// Remove a spectator. Returns the broadcaster connection when the
    /// spectator was actually a member.
    pub fn leave(&self, token: &str, spectator: ConnId) -> HubResult<Option<ConnId>> {
        let mut rooms = self.write()?;

        let room = rooms
            .get_mut(token)
            .ok_or_else(|| HubError::not_found(format!("unknown room {token}")))?;

        if room.spectators.remove(&spectator) {
            debug!(room_id = %token, spectator = %spectator, "Spectator left");
            Ok(Some(room.broadcaster_conn))
        } else {
            Ok(None)
        }
    }

    /// Cache the broadcaster's latest signaling payload and return the
    /// current spectators for fan-out. Owner-only.
    pub fn cache_offer(
        &self,
        token: &str,
        owner: ConnId,
        payload: Value,
    ) -> HubResult<Vec<ConnId>> {
        let mut rooms = self.write()?;

        let room = rooms
            .get_mut(token)
            .ok_or_else(|| HubError::not_found(format!("unknown room {token}")))?;
        if room.broadcaster_conn != owner {
            return Err(HubError::auth("only the broadcaster can signal this room"));
        }

        room.cached_offer = Some(payload);
        Ok(room.spectators.iter().copied().collect())
    }

    /// Owner check for directed broadcaster→spectator signaling.
    pub fn verify_owner(&self, token: &str, conn: ConnId) -> HubResult<()> {
        let rooms = self.read()?;
        let room = rooms
            .get(token)
            .ok_or_else(|| HubError::not_found(format!("unknown room {token}")))?;
        if room.broadcaster_conn != conn {
            return Err(HubError::auth("only the broadcaster can signal this room"));
        }
        Ok(())
    }

    /// Membership check; returns the broadcaster connection for delivery.
    pub fn broadcaster_for_spectator(&self, token: &str, conn: ConnId) -> HubResult<ConnId> {
        let rooms = self.read()?;
        let room = rooms
            .get(token)
            .ok_or_else(|| HubError::not_found(format!("unknown room {token}")))?;
        if !room.spectators.contains(&conn) {
            return Err(HubError::auth("not a spectator of this room"));
        }
        Ok(room.broadcaster_conn)
    }

    pub fn is_member(&self, token: &str, conn: ConnId) -> HubResult<bool> {
        let rooms = self.read()?;
        Ok(rooms
            .get(token)
            .map(|room| room.spectators.contains(&conn))
            .unwrap_or(false))
    }

    /// Rooms owned by a connection (at most one in practice).
    pub fn rooms_owned_by(&self, conn: ConnId) -> HubResult<Vec<RoomToken>> {
        let rooms = self.read()?;
        Ok(rooms
            .values()
            .filter(|room| room.broadcaster_conn == conn)
            .map(|room| room.token.clone())
            .collect())
    }

    /// Rooms a connection spectates, found by scan.
    pub fn rooms_spectated_by(&self, conn: ConnId) -> HubResult<Vec<RoomToken>> {
        let rooms = self.read()?;
        Ok(rooms
            .values()
            .filter(|room| room.spectators.contains(&conn))
            .map(|room| room.token.clone())
            .collect())
    }

    /// Current room list for `broadcast_list_update` pushes.
    pub fn summaries(&self) -> HubResult<Vec<RoomSummary>> {
        let rooms = self.read()?;
        let mut list: Vec<RoomSummary> = rooms
            .values()
            .map(|room| RoomSummary {
                room_id: room.token.clone(),
                broadcaster_username: room.broadcaster_name.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        Ok(list)
    }

    pub fn room_count(&self) -> HubResult<usize> {
        Ok(self.read()?.len())
    }
}
