//! In-memory store gateway for tests and integration scenarios

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::store::gateway::{StoreError, StoreGateway, UserPatch};
use crate::types::{
    MatchId, MatchRecord, RankingEntry, ReportSlot, ReportValue, UserId, UserProfile, INITIAL_RATE,
};
use crate::utils::current_timestamp;

/// In-memory store implementation with the same guard semantics as the
/// SQLite gateway.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    users: RwLock<HashMap<UserId, UserProfile>>,
    matches: RwLock<HashMap<MatchId, MatchRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_failure() -> StoreError {
        StoreError::Transient("store lock poisoned".to_string())
    }
}

#[async_trait]
impl StoreGateway for InMemoryStore {
    async fn fetch_user(&self, id: UserId) -> Result<UserProfile, StoreError> {
        let users = self.users.read().map_err(|_| Self::lock_failure())?;
        users
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
    }

    async fn fetch_user_by_name(&self, name: &str) -> Result<Option<UserProfile>, StoreError> {
        let users = self.users.read().map_err(|_| Self::lock_failure())?;
        Ok(users.values().find(|u| u.name == name).cloned())
    }

    async fn insert_user(
        &self,
        id: UserId,
        name: &str,
        verifier: &str,
    ) -> Result<(), StoreError> {
        let mut users = self.users.write().map_err(|_| Self::lock_failure())?;

        if users.values().any(|u| u.name == name) {
            return Err(StoreError::UniqueViolation(format!(
                "username {name} already exists"
            )));
        }

        users.insert(
            id,
            UserProfile {
                id,
                name: name.to_string(),
                verifier: verifier.to_string(),
                rate: INITIAL_RATE,
                match_history: Vec::new(),
                memos: None,
                battle_records: None,
                registered_decks: None,
                current_match_id: None,
                created_at: current_timestamp(),
                last_login_at: None,
            },
        );

        Ok(())
    }

    async fn patch_user(&self, id: UserId, patch: UserPatch) -> Result<(), StoreError> {
        let mut users = self.users.write().map_err(|_| Self::lock_failure())?;

        if let Some(username) = &patch.username {
            if users.values().any(|u| u.name == *username && u.id != id) {
                return Err(StoreError::UniqueViolation(format!(
                    "username {username} already exists"
                )));
            }
        }

        let user = users
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;

        if let Some(rate) = patch.rate {
            user.rate = rate;
        }
        if let Some(history) = patch.match_history {
            user.match_history = history;
        }
        if let Some(memos) = patch.memos {
            user.memos = Some(memos);
        }
        if let Some(records) = patch.battle_records {
            user.battle_records = Some(records);
        }
        if let Some(decks) = patch.registered_decks {
            user.registered_decks = Some(decks);
        }
        if let Some(current) = patch.current_match_id {
            user.current_match_id = current;
        }
        if let Some(username) = patch.username {
            user.name = username;
        }
        if let Some(at) = patch.last_login_at {
            user.last_login_at = Some(at);
        }

        Ok(())
    }

    async fn insert_match(&self, id: MatchId, p1: UserId, p2: UserId) -> Result<(), StoreError> {
        let mut matches = self.matches.write().map_err(|_| Self::lock_failure())?;
        matches.insert(
            id,
            MatchRecord {
                id,
                player1: p1,
                player2: p2,
                report1: None,
                report2: None,
                resolved_at: None,
            },
        );
        Ok(())
    }

    async fn fetch_match(&self, id: MatchId) -> Result<MatchRecord, StoreError> {
        let matches = self.matches.read().map_err(|_| Self::lock_failure())?;
        matches
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("match {id}")))
    }

    async fn patch_match_report(
        &self,
        id: MatchId,
        slot: ReportSlot,
        value: ReportValue,
    ) -> Result<bool, StoreError> {
        let mut matches = self.matches.write().map_err(|_| Self::lock_failure())?;
        let Some(record) = matches.get_mut(&id) else {
            return Ok(false);
        };

        let target = match slot {
            ReportSlot::Player1 => &mut record.report1,
            ReportSlot::Player2 => &mut record.report2,
        };

        if target.is_some() {
            return Ok(false);
        }
        *target = Some(value);
        Ok(true)
    }

    async fn mark_match_resolved(
        &self,
        id: MatchId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut matches = self.matches.write().map_err(|_| Self::lock_failure())?;
        let Some(record) = matches.get_mut(&id) else {
            return Ok(false);
        };

        if record.resolved_at.is_some() {
            return Ok(false);
        }
        record.resolved_at = Some(at);
        Ok(true)
    }

    async fn top_by_rating(&self, limit: u32) -> Result<Vec<RankingEntry>, StoreError> {
        let users = self.users.read().map_err(|_| Self::lock_failure())?;

        let mut entries: Vec<RankingEntry> = users
            .values()
            .map(|u| RankingEntry {
                username: u.name.clone(),
                rate: u.rate,
            })
            .collect();

        entries.sort_by(|a, b| b.rate.cmp(&a.rate).then(a.username.cmp(&b.username)));
        entries.truncate(limit as usize);
        Ok(entries)
    }
}
