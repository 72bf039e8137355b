//! Utility functions for the session hub

use crate::types::{ConnId, MatchId, ResolutionCategory, RoomToken, UserId, HISTORY_CAP};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new unique user ID
pub fn generate_user_id() -> UserId {
    Uuid::new_v4()
}

/// Generate a new unique match ID
pub fn generate_match_id() -> MatchId {
    Uuid::new_v4()
}

/// Generate a new unique connection ID
pub fn generate_conn_id() -> ConnId {
    Uuid::new_v4()
}

/// Mint a short spectate room token (8 hex chars).
///
/// Room concurrency is low, so 32 bits of randomness is plenty; collisions
/// are rechecked against the registry at creation time.
pub fn generate_room_token() -> RoomToken {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Format a match-history entry for one player's view of a resolution.
///
/// Entries are human readable and cite the old and new rate for outcomes
/// that change it.
pub fn history_entry(
    category: ResolutionCategory,
    won: bool,
    old_rate: i32,
    new_rate: i32,
    opponent_name: &str,
    at: DateTime<Utc>,
) -> String {
    let stamp = at.format("%Y-%m-%d %H:%M");
    match category {
        ResolutionCategory::Consistent => {
            let label = if won { "勝利" } else { "敗北" };
            format!("{stamp} {label} {old_rate}→{new_rate} (vs {opponent_name})")
        }
        ResolutionCategory::Cancelled => format!("{stamp} 対戦中止 (vs {opponent_name})"),
        ResolutionCategory::Disputed => format!("{stamp} 結果不一致 (vs {opponent_name})"),
    }
}

/// Prepend an entry to a match history, enforcing the cap.
pub fn push_history(history: &mut Vec<String>, entry: String) {
    history.insert(0, entry);
    history.truncate(HISTORY_CAP);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique_ids() {
        assert_ne!(generate_user_id(), generate_user_id());
        assert_ne!(generate_match_id(), generate_match_id());
        assert_ne!(generate_conn_id(), generate_conn_id());
    }

    #[test]
    fn room_tokens_are_short_hex() {
        let token = generate_room_token();
        assert_eq!(token.len(), 8);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn history_entries_cite_rates() {
        let at = current_timestamp();
        let win = history_entry(ResolutionCategory::Consistent, true, 1500, 1516, "bob", at);
        assert!(win.contains("勝利"));
        assert!(win.contains("1500→1516"));
        assert!(win.contains("bob"));

        let cancel = history_entry(ResolutionCategory::Cancelled, false, 1500, 1500, "bob", at);
        assert!(cancel.contains("対戦中止"));

        let disputed = history_entry(ResolutionCategory::Disputed, false, 1500, 1500, "bob", at);
        assert!(disputed.contains("結果不一致"));
    }

    #[test]
    fn history_is_capped_newest_first() {
        let mut history: Vec<String> = (0..HISTORY_CAP).map(|i| format!("entry-{i}")).collect();
        push_history(&mut history, "newest".to_string());

        assert_eq!(history.len(), HISTORY_CAP);
        assert_eq!(history[0], "newest");
        assert!(!history.contains(&format!("entry-{}", HISTORY_CAP - 1)));
    }
}
