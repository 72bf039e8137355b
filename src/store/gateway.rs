//! Store gateway trait and shared store types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::future::Future;
use tracing::warn;

use crate::error::HubError;
use crate::types::{MatchId, MatchRecord, RankingEntry, ReportSlot, ReportValue, UserId, UserProfile};

/// Failures surfaced by store implementations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unique violation: {0}")]
    UniqueViolation(String),

    #[error("transient store failure: {0}")]
    Transient(String),
}

impl From<StoreError> for HubError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(message) => HubError::NotFound { message },
            StoreError::UniqueViolation(message) => HubError::Conflict { message },
            StoreError::Transient(message) => HubError::Transient { message },
        }
    }
}

/// Partial update to a user row.
///
/// `current_match_id` uses a nested Option so that `Some(None)` clears the
/// column while `None` leaves it untouched.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub rate: Option<i32>,
    pub match_history: Option<Vec<String>>,
    pub memos: Option<Value>,
    pub battle_records: Option<Value>,
    pub registered_decks: Option<Value>,
    pub current_match_id: Option<Option<MatchId>>,
    pub username: Option<String>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.rate.is_none()
            && self.match_history.is_none()
            && self.memos.is_none()
            && self.battle_records.is_none()
            && self.registered_decks.is_none()
            && self.current_match_id.is_none()
            && self.username.is_none()
            && self.last_login_at.is_none()
    }
}

/// Typed operations on the durable store.
///
/// All operations are atomic at the row level; the guarded mutations report
/// whether this caller performed the transition so resolution stays
/// idempotent under retry.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    async fn fetch_user(&self, id: UserId) -> Result<UserProfile, StoreError>;

    async fn fetch_user_by_name(&self, name: &str) -> Result<Option<UserProfile>, StoreError>;

    async fn insert_user(&self, id: UserId, name: &str, verifier: &str)
        -> Result<(), StoreError>;

    async fn patch_user(&self, id: UserId, patch: UserPatch) -> Result<(), StoreError>;

    async fn insert_match(&self, id: MatchId, p1: UserId, p2: UserId) -> Result<(), StoreError>;

    async fn fetch_match(&self, id: MatchId) -> Result<MatchRecord, StoreError>;

    /// Write a report into a slot. Returns false when the slot was already
    /// filled (or the row vanished), leaving the row untouched.
    async fn patch_match_report(
        &self,
        id: MatchId,
        slot: ReportSlot,
        value: ReportValue,
    ) -> Result<bool, StoreError>;

    /// Stamp `resolved_at` if still null. Returns true only for the caller
    /// that won the null→non-null transition.
    async fn mark_match_resolved(&self, id: MatchId, at: DateTime<Utc>)
        -> Result<bool, StoreError>;

    async fn top_by_rating(&self, limit: u32) -> Result<Vec<RankingEntry>, StoreError>;
}

/// Retry a side-effect-free store operation once on a transient failure.
pub async fn retry_once<T, F, Fut>(op: F) -> Result<T, StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    match op().await {
        Err(StoreError::Transient(message)) => {
            warn!("Transient store failure, retrying once: {}", message);
            op().await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn empty_patch_detection() {
        assert!(UserPatch::default().is_empty());

        let patch = UserPatch {
            rate: Some(1516),
            ..Default::default()
        };
        assert!(!patch.is_empty());

        // Clearing current_match_id is a non-empty patch.
        let patch = UserPatch {
            current_match_id: Some(None),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }

    #[tokio::test]
    async fn retry_once_retries_exactly_once() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, StoreError> = retry_once(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(StoreError::Transient("store unreachable".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_once_gives_up_after_second_failure() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, StoreError> = retry_once(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Transient("still down".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(StoreError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_once_does_not_retry_not_found() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, StoreError> = retry_once(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::NotFound("no such user".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
