//! Message router: parses inbound frames and dispatches to the components
//!
//! One entry point per inbound text frame. Malformed frames are dropped with
//! a log; handler failures become `{success:false, message}` replies for
//! request-shaped frames or typed `error` events for signaling frames, and a
//! handler fault never tears down the process.

use std::sync::Arc;
use tracing::{debug, error, info};

use crate::auth::{create_verifier, verify_password};
use crate::error::{HubError, HubResult};
use crate::hub::Hub;
use crate::protocol::{ClientMessage, ProfilePayload, ReportOutcome, ServerMessage};
use crate::store::{retry_once, UserPatch};
use crate::types::{ConnId, UserId, UserProfile, USERNAME_MAX_LEN, USERNAME_MIN_LEN};
use crate::utils::{current_timestamp, generate_user_id};

/// Routes parsed frames to the hub components
pub struct MessageRouter {
    hub: Arc<Hub>,
}

impl MessageRouter {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    /// Handle one raw text frame from a connection.
    ///
    /// Returns the reply to send back, if the request produces one.
    pub async fn handle_frame(&self, conn_id: ConnId, text: &str) -> Option<ServerMessage> {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                self.hub.metrics.malformed_frames_total.inc();
                debug!(conn_id = %conn_id, error = %e, "Dropping malformed frame");
                return None;
            }
        };

        let request_type = request_type(&message);
        self.hub
            .metrics
            .frames_total
            .with_label_values(&[request_type])
            .inc();

        match self.dispatch(conn_id, message).await {
            Ok(reply) => reply,
            Err(err) => {
                self.hub
                    .metrics
                    .error_replies_total
                    .with_label_values(&[err.kind()])
                    .inc();
                if matches!(err, HubError::Internal { .. } | HubError::Transient { .. }) {
                    error!(conn_id = %conn_id, request = request_type, error = %err, "Handler failed");
                } else {
                    debug!(conn_id = %conn_id, request = request_type, error = %err, "Request rejected");
                }
                Some(failure_reply(request_type, &err))
            }
        }
    }

    async fn dispatch(
        &self,
        conn_id: ConnId,
        message: ClientMessage,
    ) -> HubResult<Option<ServerMessage>> {
        match message {
            ClientMessage::Register { username, password } => {
                self.handle_register(&username, &password).await
            }
            ClientMessage::Login { username, password } => {
                self.handle_login(conn_id, &username, &password).await
            }
            ClientMessage::AutoLogin { user_id, username } => {
                self.handle_auto_login(conn_id, user_id, &username).await
            }
            ClientMessage::Logout => {
                self.require_auth(conn_id)?;
                self.hub.handle_logout(conn_id)?;
                Ok(Some(ServerMessage::LogoutResponse {
                    success: true,
                    message: None,
                }))
            }
            ClientMessage::ChangeUsername { new_username } => {
                self.handle_change_username(conn_id, &new_username).await
            }
            ClientMessage::UpdateUserData {
                rate,
                match_history,
                memos,
                battle_records,
                registered_decks,
                current_match_id,
            } => {
                let (user_id, _) = self.require_auth(conn_id)?;
                let patch = UserPatch {
                    rate,
                    match_history,
                    memos,
                    battle_records,
                    registered_decks,
                    current_match_id: current_match_id.map(Some),
                    ..Default::default()
                };
                self.hub.store.patch_user(user_id, patch).await?;
                Ok(Some(ServerMessage::UpdateUserDataResponse {
                    success: true,
                    message: None,
                }))
            }
            ClientMessage::JoinQueue => self.handle_join_queue(conn_id).await,
            ClientMessage::LeaveQueue => {
                let (user_id, _) = self.require_auth(conn_id)?;
                if self.hub.queue.leave(user_id)? {
                    self.hub.sync_queue_metrics()?;
                    self.hub.notifier.broadcast_queue_count()?;
                }
                Ok(Some(ServerMessage::LeaveQueueResponse {
                    success: true,
                    message: None,
                }))
            }
            ClientMessage::WebrtcSignal { signal } => {
                self.require_auth(conn_id)?;
                self.hub.relay.forward_to_opponent(conn_id, signal)?;
                Ok(None)
            }
            ClientMessage::ReportResult { match_id, result } => {
                let (user_id, _) = self.require_auth(conn_id)?;
                let outcome = self
                    .hub
                    .coordinator
                    .handle_report(user_id, match_id, result)
                    .await?;
                let category = match outcome {
                    ReportOutcome::Pending => None,
                    ReportOutcome::Consistent => Some("consistent"),
                    ReportOutcome::Disputed => Some("disputed"),
                    ReportOutcome::Cancelled => Some("cancelled"),
                };
                if let Some(category) = category {
                    self.hub
                        .metrics
                        .matches_resolved_total
                        .with_label_values(&[category])
                        .inc();
                }
                Ok(Some(ServerMessage::ReportResultResponse {
                    success: true,
                    message: None,
                    outcome: Some(outcome),
                }))
            }
            ClientMessage::ClearMatchInfo => {
                let (user_id, _) = self.require_auth(conn_id)?;
                self.hub.sessions.clear_match(conn_id)?;
                self.hub
                    .store
                    .patch_user(
                        user_id,
                        UserPatch {
                            current_match_id: Some(None),
                            ..Default::default()
                        },
                    )
                    .await?;
                Ok(Some(ServerMessage::ClearMatchInfoResponse {
                    success: true,
                    message: None,
                }))
            }
            ClientMessage::GetRanking => {
                let limit = self.hub.config.ranking_limit;
                let store = self.hub.store.clone();
                let ranking = retry_once(|| store.top_by_rating(limit)).await?;
                Ok(Some(ServerMessage::GetRankingResponse {
                    success: true,
                    message: None,
                    ranking,
                }))
            }
            ClientMessage::StartBroadcast => {
                let (_, username) = self.require_auth(conn_id)?;
                let room_id = self.hub.rooms.create_room(conn_id, &username)?;
                self.hub.sync_room_metrics()?;
                self.hub.notifier.broadcast_room_list()?;
                Ok(Some(ServerMessage::StartBroadcastResponse {
                    success: true,
                    message: None,
                    room_id: Some(room_id),
                }))
            }
            ClientMessage::StopBroadcast { room_id } => {
                self.require_auth(conn_id)?;
                let room = self.hub.rooms.remove_room(&room_id, Some(conn_id))?;
                for spectator in &room.spectators {
                    let _ = self.hub.sessions.send_to(
                        *spectator,
                        ServerMessage::BroadcastStopped {
                            room_id: room_id.clone(),
                        },
                    )?;
                }
                self.hub.sync_room_metrics()?;
                self.hub.notifier.broadcast_room_list()?;
                Ok(Some(ServerMessage::StopBroadcastResponse {
                    success: true,
                    message: None,
                }))
            }
            ClientMessage::JoinSpectateRoom { room_id } => {
                let (broadcaster, cached_offer) = self.hub.rooms.join(&room_id, conn_id)?;
                let _ = self.hub.sessions.send_to(
                    broadcaster,
                    ServerMessage::NewSpectator {
                        room_id: room_id.clone(),
                        spectator_id: conn_id,
                    },
                )?;
                // Latecomer bootstrap: replay the cached broadcaster offer.
                if let Some(signal) = cached_offer {
                    let _ = self.hub.sessions.send_to(
                        conn_id,
                        ServerMessage::SpectateSignal {
                            room_id: room_id.clone(),
                            signal,
                        },
                    )?;
                }
                Ok(Some(ServerMessage::JoinSpectateRoomResponse {
                    success: true,
                    message: None,
                    room_id: Some(room_id),
                }))
            }
            ClientMessage::LeaveSpectateRoom { room_id } => {
                if let Some(broadcaster) = self.hub.rooms.leave(&room_id, conn_id)? {
                    let _ = self.hub.sessions.send_to(
                        broadcaster,
                        ServerMessage::SpectatorLeft {
                            room_id: room_id.clone(),
                            spectator_id: conn_id,
                        },
                    )?;
                }
                Ok(Some(ServerMessage::LeaveSpectateRoomResponse {
                    success: true,
                    message: None,
                }))
            }
            ClientMessage::SpectateSignal { room_id, signal } => {
                self.hub.relay.broadcast_to_room(&room_id, conn_id, signal)?;
                Ok(None)
            }
            ClientMessage::WebrtcSignalToSpectator {
                room_id,
                spectator_id,
                signal,
            } => {
                self.hub
                    .relay
                    .to_spectator(&room_id, conn_id, spectator_id, signal)?;
                Ok(None)
            }
            ClientMessage::WebrtcSignalToBroadcaster { room_id, signal } => {
                self.hub.relay.to_broadcaster(&room_id, conn_id, signal)?;
                Ok(None)
            }
            ClientMessage::GetBroadcastList => {
                self.hub.notifier.send_room_list(conn_id)?;
                Ok(None)
            }
        }
    }

    async fn handle_register(
        &self,
        username: &str,
        password: &str,
    ) -> HubResult<Option<ServerMessage>> {
        validate_username(username)?;
        if password.is_empty() {
            return Err(HubError::validation("password must not be empty"));
        }

        let verifier = create_verifier(password)?;
        let user_id = generate_user_id();
        self.hub
            .store
            .insert_user(user_id, username, &verifier)
            .await
            .map_err(|e| match e {
                crate::store::StoreError::UniqueViolation(_) => {
                    HubError::conflict(format!("username {username} is already taken"))
                }
                other => other.into(),
            })?;

        info!(username = %username, user_id = %user_id, "User registered");
        Ok(Some(ServerMessage::RegisterResponse {
            success: true,
            message: None,
        }))
    }

    async fn handle_login(
        &self,
        conn_id: ConnId,
        username: &str,
        password: &str,
    ) -> HubResult<Option<ServerMessage>> {
        let store = self.hub.store.clone();
        let user = retry_once(|| store.fetch_user_by_name(username))
            .await?
            .ok_or_else(|| HubError::auth("wrong username or password"))?;

        if !verify_password(password, &user.verifier)? {
            return Err(HubError::auth("wrong username or password"));
        }

        self.complete_login(conn_id, user).await.map(Some)
    }

    async fn handle_auto_login(
        &self,
        conn_id: ConnId,
        user_id: UserId,
        username: &str,
    ) -> HubResult<Option<ServerMessage>> {
        let store = self.hub.store.clone();
        let user = retry_once(|| store.fetch_user(user_id))
            .await
            .map_err(|e| match e {
                crate::store::StoreError::NotFound(_) => HubError::auth("auto login rejected"),
                other => other.into(),
            })?;

        // Re-bind only when the stored tuple matches exactly.
        if user.name != username {
            return Err(HubError::auth("auto login rejected"));
        }

        let reply = self.complete_login(conn_id, user).await?;
        if let ServerMessage::LoginResponse {
            success,
            message,
            profile,
        } = reply
        {
            Ok(Some(ServerMessage::AutoLoginResponse {
                success,
                message,
                profile,
            }))
        } else {
            Ok(Some(reply))
        }
    }

    /// Shared tail of login and auto_login: stamp the login time, bind the
    /// session (taking over any previous one) and return the profile.
    async fn complete_login(
        &self,
        conn_id: ConnId,
        user: UserProfile,
    ) -> HubResult<ServerMessage> {
        // A connection switching accounts goes through a clean logout first.
        if self.hub.sessions.identity(conn_id)?.is_some() {
            self.hub.handle_logout(conn_id)?;
        }

        self.hub
            .store
            .patch_user(
                user.id,
                UserPatch {
                    last_login_at: Some(current_timestamp()),
                    ..Default::default()
                },
            )
            .await?;

        self.hub.bind_session(conn_id, user.id, &user.name)?;
        info!(username = %user.name, conn_id = %conn_id, "User logged in");

        Ok(ServerMessage::LoginResponse {
            success: true,
            message: None,
            profile: Some(profile_payload(&user)),
        })
    }

    async fn handle_change_username(
        &self,
        conn_id: ConnId,
        new_username: &str,
    ) -> HubResult<Option<ServerMessage>> {
        let (user_id, old_name) = self.require_auth(conn_id)?;
        validate_username(new_username)?;

        self.hub
            .store
            .patch_user(
                user_id,
                UserPatch {
                    username: Some(new_username.to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| match e {
                crate::store::StoreError::UniqueViolation(_) => {
                    HubError::conflict(format!("username {new_username} is already taken"))
                }
                other => other.into(),
            })?;

        // Refresh the display name the session carries.
        self.hub.bind_session(conn_id, user_id, new_username)?;
        info!(old = %old_name, new = %new_username, "Username changed");

        Ok(Some(ServerMessage::ChangeUsernameResponse {
            success: true,
            message: None,
            username: Some(new_username.to_string()),
        }))
    }

    async fn handle_join_queue(&self, conn_id: ConnId) -> HubResult<Option<ServerMessage>> {
        let (user_id, username) = self.require_auth(conn_id)?;

        if !self.hub.queue.enqueue(user_id)? {
            return Err(HubError::conflict("already waiting in the queue"));
        }
        debug!(username = %username, "User joined the queue");

        self.hub.sync_queue_metrics()?;
        self.hub.notifier.broadcast_queue_count()?;
        self.hub.try_pair().await?;

        Ok(Some(ServerMessage::JoinQueueResponse {
            success: true,
            message: None,
        }))
    }

    /// Resolve the bound identity of a connection or fail with an auth error.
    fn require_auth(&self, conn_id: ConnId) -> HubResult<(UserId, String)> {
        self.hub
            .sessions
            .identity(conn_id)?
            .ok_or_else(|| HubError::auth("this request requires a logged-in session"))
    }
}

fn validate_username(username: &str) -> HubResult<()> {
    let len = username.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(HubError::validation(format!(
            "username must be {USERNAME_MIN_LEN}-{USERNAME_MAX_LEN} characters"
        )));
    }
    Ok(())
}

fn profile_payload(user: &UserProfile) -> ProfilePayload {
    ProfilePayload {
        user_id: user.id,
        username: user.name.clone(),
        rate: user.rate,
        match_history: user.match_history.clone(),
        memos: user.memos.clone(),
        battle_records: user.battle_records.clone(),
        registered_decks: user.registered_decks.clone(),
        current_match_id: user.current_match_id,
    }
}

/// Stable request-type tag, used for metrics labels and failure replies.
fn request_type(message: &ClientMessage) -> &'static str {
    match message {
        ClientMessage::Register { .. } => "register",
        ClientMessage::Login { .. } => "login",
        ClientMessage::AutoLogin { .. } => "auto_login",
        ClientMessage::Logout => "logout",
        ClientMessage::ChangeUsername { .. } => "change_username",
        ClientMessage::UpdateUserData { .. } => "update_user_data",
        ClientMessage::JoinQueue => "join_queue",
        ClientMessage::LeaveQueue => "leave_queue",
        ClientMessage::WebrtcSignal { .. } => "webrtc_signal",
        ClientMessage::ReportResult { .. } => "report_result",
        ClientMessage::ClearMatchInfo => "clear_match_info",
        ClientMessage::GetRanking => "get_ranking",
        ClientMessage::StartBroadcast => "start_broadcast",
        ClientMessage::StopBroadcast { .. } => "stop_broadcast",
        ClientMessage::JoinSpectateRoom { .. } => "join_spectate_room",
        ClientMessage::LeaveSpectateRoom { .. } => "leave_spectate_room",
        ClientMessage::SpectateSignal { .. } => "spectate_signal",
        ClientMessage::WebrtcSignalToSpectator { .. } => "webrtc_signal_to_spectator",
        ClientMessage::WebrtcSignalToBroadcaster { .. } => "webrtc_signal_to_broadcaster",
        ClientMessage::GetBroadcastList => "get_broadcast_list",
    }
}

/// Build the failure reply for a rejected request.
///
/// Request-shaped frames get their `_response` with `success:false`;
/// signaling frames, which have no response shape, get a typed error event.
fn failure_reply(request_type: &str, err: &HubError) -> ServerMessage {
    let message = Some(err.client_message());
    match request_type {
        "register" => ServerMessage::RegisterResponse {
            success: false,
            message,
        },
        "login" => ServerMessage::LoginResponse {
            success: false,
            message,
            profile: None,
        },
        "auto_login" => ServerMessage::AutoLoginResponse {
            success: false,
            message,
            profile: None,
        },
        "change_username" => ServerMessage::ChangeUsernameResponse {
            success: false,
            message,
            username: None,
        },
        "update_user_data" => ServerMessage::UpdateUserDataResponse {
            success: false,
            message,
        },
        "join_queue" => ServerMessage::JoinQueueResponse {
            success: false,
            message,
        },
        "leave_queue" => ServerMessage::LeaveQueueResponse {
            success: false,
            message,
        },
        "report_result" => ServerMessage::ReportResultResponse {
            success: false,
            message,
            outcome: None,
        },
        "start_broadcast" => ServerMessage::StartBroadcastResponse {
            success: false,
            message,
            room_id: None,
        },
        "stop_broadcast" => ServerMessage::StopBroadcastResponse {
            success: false,
            message,
        },
        "join_spectate_room" => ServerMessage::JoinSpectateRoomResponse {
            success: false,
            message,
            room_id: None,
        },
        "leave_spectate_room" => ServerMessage::LeaveSpectateRoomResponse {
            success: false,
            message,
        },
        "logout" => ServerMessage::LogoutResponse {
            success: false,
            message,
        },
        "clear_match_info" => ServerMessage::ClearMatchInfoResponse {
            success: false,
            message,
        },
        "get_ranking" => ServerMessage::GetRankingResponse {
            success: false,
            message,
            ranking: Vec::new(),
        },
        _ => ServerMessage::Error {
            kind: err.kind().to_string(),
            message: err.client_message(),
        },
    }
}
