//! Frame definitions for the `{type, …}` JSON envelope.
//!
//! Request `type` values are snake_case; field names are camelCase. Unknown
//! fields on inbound frames are tolerated (older clients attach timestamps
//! the hub ignores).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{
    ConnId, MatchId, RankingEntry, ReportValue, ResolutionCategory, RoomSummary, RoomToken, UserId,
};

/// Client → server frames
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Register {
        username: String,
        password: String,
    },
    Login {
        username: String,
        password: String,
    },
    AutoLogin {
        user_id: UserId,
        username: String,
    },
    Logout,
    ChangeUsername {
        new_username: String,
    },
    UpdateUserData {
        #[serde(default)]
        rate: Option<i32>,
        #[serde(default)]
        match_history: Option<Vec<String>>,
        #[serde(default)]
        memos: Option<Value>,
        #[serde(default)]
        battle_records: Option<Value>,
        #[serde(default)]
        registered_decks: Option<Value>,
        #[serde(default)]
        current_match_id: Option<MatchId>,
    },
    JoinQueue,
    LeaveQueue,
    WebrtcSignal {
        signal: Value,
    },
    ReportResult {
        match_id: MatchId,
        result: ReportValue,
    },
    ClearMatchInfo,
    GetRanking,
    StartBroadcast,
    StopBroadcast {
        room_id: RoomToken,
    },
    JoinSpectateRoom {
        room_id: RoomToken,
    },
    LeaveSpectateRoom {
        room_id: RoomToken,
    },
    SpectateSignal {
        room_id: RoomToken,
        signal: Value,
    },
    WebrtcSignalToSpectator {
        room_id: RoomToken,
        spectator_id: ConnId,
        signal: Value,
    },
    WebrtcSignalToBroadcaster {
        room_id: RoomToken,
        signal: Value,
    },
    GetBroadcastList,
}

/// Profile fields returned on successful login
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePayload {
    pub user_id: UserId,
    pub username: String,
    pub rate: i32,
    pub match_history: Vec<String>,
    pub memos: Option<Value>,
    pub battle_records: Option<Value>,
    pub registered_decks: Option<Value>,
    pub current_match_id: Option<MatchId>,
}

/// Acknowledgement detail for a report_result request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportOutcome {
    /// The opposite slot is still empty
    Pending,
    Consistent,
    Disputed,
    Cancelled,
}

impl From<ResolutionCategory> for ReportOutcome {
    fn from(category: ResolutionCategory) -> Self {
        match category {
            ResolutionCategory::Consistent => ReportOutcome::Consistent,
            ResolutionCategory::Disputed => ReportOutcome::Disputed,
            ResolutionCategory::Cancelled => ReportOutcome::Cancelled,
        }
    }
}

/// Server → client frames: request replies and pushed events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    // Request replies
    RegisterResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    LoginResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        profile: Option<ProfilePayload>,
    },
    AutoLoginResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        profile: Option<ProfilePayload>,
    },
    LogoutResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    ChangeUsernameResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    UpdateUserDataResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    JoinQueueResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    LeaveQueueResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    ReportResultResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        outcome: Option<ReportOutcome>,
    },
    ClearMatchInfoResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    GetRankingResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        ranking: Vec<RankingEntry>,
    },
    StartBroadcastResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomToken>,
    },
    StopBroadcastResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    JoinSpectateRoomResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomToken>,
    },
    LeaveSpectateRoomResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    // Pushed events
    MatchFound {
        match_id: MatchId,
        opponent_id: UserId,
        opponent_username: String,
        is_initiator: bool,
    },
    MatchResolved {
        match_id: MatchId,
        category: ResolutionCategory,
        rate: i32,
        match_history: Vec<String>,
    },
    WebrtcSignal {
        from: UserId,
        signal: Value,
    },
    SpectateSignal {
        room_id: RoomToken,
        signal: Value,
    },
    WebrtcSignalToBroadcaster {
        room_id: RoomToken,
        spectator_id: ConnId,
        signal: Value,
    },
    BroadcastListUpdate {
        rooms: Vec<RoomSummary>,
    },
    QueueCountUpdate {
        count: usize,
    },
    NewSpectator {
        room_id: RoomToken,
        spectator_id: ConnId,
    },
    SpectatorLeft {
        room_id: RoomToken,
        spectator_id: ConnId,
    },
    BroadcastStopped {
        room_id: RoomToken,
    },
    LogoutForced,
    Error {
        kind: String,
        message: String,
    },
}
