//! Common types used throughout the session hub

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for registered users
pub type UserId = Uuid;

/// Unique identifier for matches
pub type MatchId = Uuid;

/// Unique identifier for live connections, assigned at accept
pub type ConnId = Uuid;

/// Short opaque token identifying a spectate room
pub type RoomToken = String;

/// Initial rating for freshly registered users
pub const INITIAL_RATE: i32 = 1500;

/// Elo K-factor
pub const ELO_K: f64 = 32.0;

/// Elo reference scale
pub const ELO_SCALE: f64 = 400.0;

/// Maximum number of match history entries kept per user, newest first
pub const HISTORY_CAP: usize = 10;

/// Username length bounds (inclusive)
pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 15;

/// A player's self-declared outcome for a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportValue {
    Win,
    Lose,
    Cancel,
}

impl ReportValue {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportValue::Win => "win",
            ReportValue::Lose => "lose",
            ReportValue::Cancel => "cancel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "win" => Some(ReportValue::Win),
            "lose" => Some(ReportValue::Lose),
            "cancel" => Some(ReportValue::Cancel),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReportValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a match was resolved once both reports were present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionCategory {
    /// Exactly one win and one lose; rates change
    Consistent,
    /// Conflicting reports; rates unchanged
    Disputed,
    /// Both players reported cancel; rates unchanged
    Cancelled,
}

impl std::fmt::Display for ResolutionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionCategory::Consistent => write!(f, "consistent"),
            ResolutionCategory::Disputed => write!(f, "disputed"),
            ResolutionCategory::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Which report slot a player occupies in a match row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSlot {
    Player1,
    Player2,
}

/// Durable user record as seen by the hub
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    /// Opaque password verifier; never serialized to clients
    #[serde(skip_serializing)]
    pub verifier: String,
    pub rate: i32,
    /// Human-readable history entries, newest first, capped at [`HISTORY_CAP`]
    pub match_history: Vec<String>,
    pub memos: Option<serde_json::Value>,
    pub battle_records: Option<serde_json::Value>,
    pub registered_decks: Option<serde_json::Value>,
    pub current_match_id: Option<MatchId>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Durable match record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    pub id: MatchId,
    /// First player; also the signaling initiator
    pub player1: UserId,
    pub player2: UserId,
    pub report1: Option<ReportValue>,
    pub report2: Option<ReportValue>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl MatchRecord {
    /// Which slot does this user occupy, if any.
    pub fn slot_of(&self, user_id: UserId) -> Option<ReportSlot> {
        if self.player1 == user_id {
            Some(ReportSlot::Player1)
        } else if self.player2 == user_id {
            Some(ReportSlot::Player2)
        } else {
            None
        }
    }

    pub fn report_for(&self, slot: ReportSlot) -> Option<ReportValue> {
        match slot {
            ReportSlot::Player1 => self.report1,
            ReportSlot::Player2 => self.report2,
        }
    }

    pub fn opponent_of(&self, user_id: UserId) -> Option<UserId> {
        match self.slot_of(user_id)? {
            ReportSlot::Player1 => Some(self.player2),
            ReportSlot::Player2 => Some(self.player1),
        }
    }
}

/// One row of the public ranking
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingEntry {
    pub username: String,
    pub rate: i32,
}

/// Summary of an open spectate room, as pushed in list updates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: RoomToken,
    pub broadcaster_username: String,
}
