//! Hub state: component wiring and connection lifecycle
//!
//! Owns the session table, queue, room registry, relay, coordinator and
//! notifier, and implements the behaviours that cut across them: accept,
//! disconnect, logout (voluntary and forced) and the pairing loop.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::HubSettings;
use crate::error::HubResult;
use crate::matchmaking::{MatchCoordinator, MatchQueue};
use crate::metrics::MetricsCollector;
use crate::notifier::ListNotifier;
use crate::protocol::ServerMessage;
use crate::rating::EloDuelCalculator;
use crate::relay::SignalRelay;
use crate::session::{table::Outbound, SessionTable};
use crate::spectate::SpectateRegistry;
use crate::store::StoreGateway;
use crate::types::{ConnId, UserId};

/// The assembled session hub
pub struct Hub {
    pub config: HubSettings,
    pub store: Arc<dyn StoreGateway>,
    pub sessions: Arc<SessionTable>,
    pub queue: Arc<MatchQueue>,
    pub rooms: Arc<SpectateRegistry>,
    pub relay: SignalRelay,
    pub coordinator: MatchCoordinator,
    pub notifier: ListNotifier,
    pub metrics: MetricsCollector,
}

impl Hub {
    pub fn new(config: HubSettings, store: Arc<dyn StoreGateway>) -> Self {
        let sessions = Arc::new(SessionTable::new());
        let queue = Arc::new(MatchQueue::new());
        let rooms = Arc::new(SpectateRegistry::new());
        let relay = SignalRelay::new(sessions.clone(), rooms.clone());
        let coordinator = MatchCoordinator::new(
            store.clone(),
            sessions.clone(),
            Arc::new(EloDuelCalculator::new()),
        );
        let notifier = ListNotifier::new(sessions.clone(), rooms.clone(), queue.clone());
        let metrics = MetricsCollector::default();

        Self {
            config,
            store,
            sessions,
            queue,
            rooms,
            relay,
            coordinator,
            notifier,
            metrics,
        }
    }

    /// Register a freshly accepted connection.
    pub fn attach_connection(&self, sender: Outbound) -> HubResult<ConnId> {
        let conn_id = self.sessions.insert(sender)?;
        self.metrics
            .connections
            .set(self.sessions.connection_count()? as i64);
        Ok(conn_id)
    }

    /// Full cleanup for a closed connection.
    ///
    /// Rooms the connection broadcast are destroyed, rooms it spectated are
    /// pruned, the session entry is dropped (guarded against stale closes),
    /// and a still-current user binding is evicted from the queue.
    pub async fn handle_disconnect(&self, conn_id: ConnId) -> HubResult<()> {
        let rooms_changed = self.destroy_rooms_owned_by(conn_id)?;
        self.prune_spectated_rooms(conn_id)?;

        // Only the connection that still owns the user binding evicts the
        // user from the queue; a stale close must not touch a newer session.
        let current_user = match self.sessions.identity(conn_id)? {
            Some((user_id, _)) => {
                if self.sessions.resolve_user(user_id)? == Some(conn_id) {
                    Some(user_id)
                } else {
                    None
                }
            }
            None => None,
        };

        self.sessions.remove(conn_id)?;

        if let Some(user_id) = current_user {
            if self.queue.leave(user_id)? {
                self.sync_queue_metrics()?;
                self.notifier.broadcast_queue_count()?;
            }
        }

        if rooms_changed {
            self.notifier.broadcast_room_list()?;
        }

        self.metrics
            .connections
            .set(self.sessions.connection_count()? as i64);
        info!(conn_id = %conn_id, "Connection closed and cleaned up");
        Ok(())
    }

    /// Voluntary logout: unbind the session and tear down what it owned.
    pub fn handle_logout(&self, conn_id: ConnId) -> HubResult<()> {
        let rooms_changed = self.destroy_rooms_owned_by(conn_id)?;

        if let Some(user_id) = self.sessions.unbind(conn_id)? {
            if self.queue.leave(user_id)? {
                self.sync_queue_metrics()?;
                self.notifier.broadcast_queue_count()?;
            }
            info!(conn_id = %conn_id, user_id = %user_id, "User logged out");
        }

        if rooms_changed {
            self.notifier.broadcast_room_list()?;
        }
        Ok(())
    }

    /// Bind a user to a connection, displacing any previous session.
    ///
    /// The displaced connection already received `logout_forced` from the
    /// table; the hub additionally destroys rooms it broadcast. The user's
    /// queue entry survives a takeover since the user stays logged in.
    pub fn bind_session(
        &self,
        conn_id: ConnId,
        user_id: UserId,
        username: &str,
    ) -> HubResult<()> {
        if let Some(displaced) = self.sessions.bind_user(conn_id, user_id, username)? {
            warn!(
                user_id = %user_id,
                displaced_conn = %displaced,
                "Takeover: destroying rooms owned by the displaced connection"
            );
            if self.destroy_rooms_owned_by(displaced)? {
                self.notifier.broadcast_room_list()?;
            }
        }
        Ok(())
    }

    /// One pairing attempt over the queue head.
    ///
    /// Pops the two head entries; a dead entry is discarded and the live
    /// survivor goes back to the head, ending the attempt. A live pair is
    /// handed to the coordinator.
    pub async fn try_pair(&self) -> HubResult<()> {
        let Some((first, second)) = self.queue.take_pair()? else {
            return Ok(());
        };

        let first_conn = self.live_connection(first)?;
        let second_conn = self.live_connection(second)?;

        match (first_conn, second_conn) {
            (Some(c1), Some(c2)) => {
                self.coordinator
                    .create_match((c1, first), (c2, second))
                    .await?;
                self.metrics.matches_created_total.inc();
                self.sync_queue_metrics()?;
                self.notifier.broadcast_queue_count()?;
            }
            (Some(_), None) => {
                warn!(user_id = %second, "Dropping dead queue entry");
                self.queue.requeue_front(first)?;
                self.sync_queue_metrics()?;
                self.notifier.broadcast_queue_count()?;
            }
            (None, Some(_)) => {
                warn!(user_id = %first, "Dropping dead queue entry");
                self.queue.requeue_front(second)?;
                self.sync_queue_metrics()?;
                self.notifier.broadcast_queue_count()?;
            }
            (None, None) => {
                warn!(
                    first = %first,
                    second = %second,
                    "Dropping two dead queue entries"
                );
                self.sync_queue_metrics()?;
                self.notifier.broadcast_queue_count()?;
            }
        }

        Ok(())
    }

    /// Resolve a user to an open connection, or None when the binding or
    /// the connection is gone.
    fn live_connection(&self, user_id: UserId) -> HubResult<Option<ConnId>> {
        let Some(conn_id) = self.sessions.resolve_user(user_id)? else {
            return Ok(None);
        };
        Ok(self.sessions.get(conn_id)?.map(|_| conn_id))
    }

    /// Destroy every room broadcast by this connection, notifying its
    /// spectators. Returns true when at least one room was removed.
    pub fn destroy_rooms_owned_by(&self, conn_id: ConnId) -> HubResult<bool> {
        let owned = self.rooms.rooms_owned_by(conn_id)?;
        let any = !owned.is_empty();

        for token in owned {
            let room = self.rooms.remove_room(&token, None)?;
            for spectator in &room.spectators {
                let _ = self.sessions.send_to(
                    *spectator,
                    ServerMessage::BroadcastStopped {
                        room_id: token.clone(),
                    },
                )?;
            }
        }

        if any {
            self.sync_room_metrics()?;
        }
        Ok(any)
    }

    /// Remove this connection from every room it spectates, notifying each
    /// broadcaster.
    fn prune_spectated_rooms(&self, conn_id: ConnId) -> HubResult<()> {
        for token in self.rooms.rooms_spectated_by(conn_id)? {
            if let Some(broadcaster) = self.rooms.leave(&token, conn_id)? {
                let _ = self.sessions.send_to(
                    broadcaster,
                    ServerMessage::SpectatorLeft {
                        room_id: token,
                        spectator_id: conn_id,
                    },
                )?;
            }
        }
        Ok(())
    }

    pub fn sync_queue_metrics(&self) -> HubResult<()> {
        self.metrics.queue_depth.set(self.queue.len()? as i64);
        Ok(())
    }

    pub fn sync_room_metrics(&self) -> HubResult<()> {
        self.metrics.active_rooms.set(self.rooms.room_count()? as i64);
        Ok(())
    }
}
