//! Per-match lifecycle: creation, report collection, resolution, Elo update
//!
//! The coordinator persists every step through the store gateway and treats
//! session pointers as runtime hints only; resolution is decided from the
//! match row, never from connection state.

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{HubError, HubResult};
use crate::protocol::{ReportOutcome, ServerMessage};
use crate::rating::RatingCalculator;
use crate::session::SessionTable;
use crate::store::{StoreGateway, UserPatch};
use crate::types::{
    ConnId, MatchId, MatchRecord, ReportSlot, ReportValue, ResolutionCategory, UserId,
};
use crate::utils::{current_timestamp, generate_match_id, history_entry, push_history};

/// Decide the resolution category from the two reports.
///
/// The category is a pure function of the reports: both cancel is a
/// cancellation, exactly complementary win/lose is consistent, everything
/// else is disputed.
pub fn categorize(report1: ReportValue, report2: ReportValue) -> ResolutionCategory {
    use ReportValue::*;
    match (report1, report2) {
        (Cancel, Cancel) => ResolutionCategory::Cancelled,
        (Win, Lose) | (Lose, Win) => ResolutionCategory::Consistent,
        _ => ResolutionCategory::Disputed,
    }
}

/// Coordinates match creation and result reconciliation
pub struct MatchCoordinator {
    store: Arc<dyn StoreGateway>,
    sessions: Arc<SessionTable>,
    rating: Arc<dyn RatingCalculator>,
}

impl MatchCoordinator {
    pub fn new(
        store: Arc<dyn StoreGateway>,
        sessions: Arc<SessionTable>,
        rating: Arc<dyn RatingCalculator>,
    ) -> Self {
        Self {
            store,
            sessions,
            rating,
        }
    }

    /// Create a match for a freshly paired couple.
    ///
    /// The first player was earlier in the queue and becomes the signaling
    /// initiator. Both users' `currentMatchId` is persisted before the
    /// `match_found` notifications go out.
    pub async fn create_match(
        &self,
        initiator: (ConnId, UserId),
        follower: (ConnId, UserId),
    ) -> HubResult<MatchId> {
        let (conn1, p1) = initiator;
        let (conn2, p2) = follower;
        let match_id = generate_match_id();

        let user1 = self.store.fetch_user(p1).await?;
        let user2 = self.store.fetch_user(p2).await?;

        self.store.insert_match(match_id, p1, p2).await?;
        self.store
            .patch_user(
                p1,
                UserPatch {
                    current_match_id: Some(Some(match_id)),
                    ..Default::default()
                },
            )
            .await?;
        self.store
            .patch_user(
                p2,
                UserPatch {
                    current_match_id: Some(Some(match_id)),
                    ..Default::default()
                },
            )
            .await?;

        self.sessions.link_match(conn1, conn2, match_id)?;

        info!(
            match_id = %match_id,
            initiator = %user1.name,
            follower = %user2.name,
            "Match created"
        );

        self.sessions.send_to(
            conn1,
            ServerMessage::MatchFound {
                match_id,
                opponent_id: p2,
                opponent_username: user2.name,
                is_initiator: true,
            },
        )?;
        self.sessions.send_to(
            conn2,
            ServerMessage::MatchFound {
                match_id,
                opponent_id: p1,
                opponent_username: user1.name,
                is_initiator: false,
            },
        )?;

        Ok(match_id)
    }

    /// Record one player's report and resolve the match once both are in.
    pub async fn handle_report(
        &self,
        reporter: UserId,
        match_id: MatchId,
        result: ReportValue,
    ) -> HubResult<ReportOutcome> {
        let record = self.store.fetch_match(match_id).await?;

        if record.resolved_at.is_some() {
            return Err(HubError::invalid_state(format!(
                "match {match_id} is already resolved"
            )));
        }

        let slot = record.slot_of(reporter).ok_or_else(|| {
            HubError::invalid_state(format!("user {reporter} is not a player in match {match_id}"))
        })?;

        if record.report_for(slot).is_some() {
            return Err(HubError::conflict("result already reported for this match"));
        }

        // The null→non-null guard is enforced by the store row, so a racing
        // duplicate loses here even if it passed the check above.
        let landed = self.store.patch_match_report(match_id, slot, result).await?;
        if !landed {
            return Err(HubError::conflict("result already reported for this match"));
        }

        info!(
            match_id = %match_id,
            reporter = %reporter,
            result = %result,
            "Report recorded"
        );

        // Re-read to observe the opposite slot as persisted after our write.
        let record = self.store.fetch_match(match_id).await?;
        let opposite = match slot {
            ReportSlot::Player1 => record.report2,
            ReportSlot::Player2 => record.report1,
        };

        if opposite.is_none() {
            return Ok(ReportOutcome::Pending);
        }

        let category = self.resolve(record).await?;
        Ok(category.into())
    }

    /// Resolve a match whose two reports are both present.
    ///
    /// Idempotent under retry: only the caller that wins the `resolved_at`
    /// null→non-null transition applies rates, history, and notifications.
    async fn resolve(&self, record: MatchRecord) -> HubResult<ResolutionCategory> {
        let (Some(report1), Some(report2)) = (record.report1, record.report2) else {
            return Err(HubError::internal(format!(
                "resolution invoked with a missing report on match {}",
                record.id
            )));
        };

        let category = categorize(report1, report2);
        let resolved_at = current_timestamp();

        let won = self
            .store
            .mark_match_resolved(record.id, resolved_at)
            .await?;
        if !won {
            // A racing retry already resolved this match; its effects stand.
            warn!(match_id = %record.id, "Lost resolution race, skipping side effects");
            return Ok(category);
        }

        let user1 = self.store.fetch_user(record.player1).await?;
        let user2 = self.store.fetch_user(record.player2).await?;

        let (rate1, rate2) = match category {
            ResolutionCategory::Consistent => {
                if report1 == ReportValue::Win {
                    let rates = self.rating.rate_duel(user1.rate, user2.rate);
                    (rates.winner_new, rates.loser_new)
                } else {
                    let rates = self.rating.rate_duel(user2.rate, user1.rate);
                    (rates.loser_new, rates.winner_new)
                }
            }
            _ => (user1.rate, user2.rate),
        };

        let mut history1 = user1.match_history.clone();
        push_history(
            &mut history1,
            history_entry(
                category,
                report1 == ReportValue::Win,
                user1.rate,
                rate1,
                &user2.name,
                resolved_at,
            ),
        );
        let mut history2 = user2.match_history.clone();
        push_history(
            &mut history2,
            history_entry(
                category,
                report2 == ReportValue::Win,
                user2.rate,
                rate2,
                &user1.name,
                resolved_at,
            ),
        );

        self.store
            .patch_user(
                record.player1,
                UserPatch {
                    rate: Some(rate1),
                    match_history: Some(history1.clone()),
                    current_match_id: Some(None),
                    ..Default::default()
                },
            )
            .await?;
        self.store
            .patch_user(
                record.player2,
                UserPatch {
                    rate: Some(rate2),
                    match_history: Some(history2.clone()),
                    current_match_id: Some(None),
                    ..Default::default()
                },
            )
            .await?;

        // Session pointers are hints; drop them wherever the players are
        // still connected.
        for user_id in [record.player1, record.player2] {
            if let Some(conn) = self.sessions.resolve_user(user_id)? {
                self.sessions.clear_match(conn)?;
            }
        }

        info!(
            match_id = %record.id,
            category = %category,
            rate1 = rate1,
            rate2 = rate2,
            "Match resolved"
        );

        // Offline players simply miss the push; the persisted row is
        // authoritative on their next login.
        let _ = self.sessions.send_to_user(
            record.player1,
            ServerMessage::MatchResolved {
                match_id: record.id,
                category,
                rate: rate1,
                match_history: history1,
            },
        )?;
        let _ = self.sessions.send_to_user(
            record.player2,
            ServerMessage::MatchResolved {
                match_id: record.id,
                category,
                rate: rate2,
                match_history: history2,
            },
        )?;

        Ok(category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rating::EloDuelCalculator;
    use crate::store::InMemoryStore;
    use tokio::sync::mpsc;

    fn build_coordinator() -> (Arc<InMemoryStore>, Arc<SessionTable>, MatchCoordinator) {
        let store = Arc::new(InMemoryStore::new());
        let sessions = Arc::new(SessionTable::new());
        let coordinator = MatchCoordinator::new(
            store.clone(),
            sessions.clone(),
            Arc::new(EloDuelCalculator::new()),
        );
        (store, sessions, coordinator)
    }

    async fn connected_user(
        store: &InMemoryStore,
        sessions: &SessionTable,
        name: &str,
    ) -> (ConnId, UserId, mpsc::UnboundedReceiver<ServerMessage>) {
        let user_id = crate::utils::generate_user_id();
        store.insert_user(user_id, name, "$v$").await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = sessions.insert(tx).unwrap();
        sessions.bind_user(conn, user_id, name).unwrap();
        (conn, user_id, rx)
    }

    #[test]
    fn categorize_is_exhaustive() {
        use ReportValue::*;
        assert_eq!(categorize(Cancel, Cancel), ResolutionCategory::Cancelled);
        assert_eq!(categorize(Win, Lose), ResolutionCategory::Consistent);
        assert_eq!(categorize(Lose, Win), ResolutionCategory::Consistent);
        assert_eq!(categorize(Win, Win), ResolutionCategory::Disputed);
        assert_eq!(categorize(Lose, Lose), ResolutionCategory::Disputed);
        assert_eq!(categorize(Win, Cancel), ResolutionCategory::Disputed);
        assert_eq!(categorize(Cancel, Lose), ResolutionCategory::Disputed);
    }

    #[tokio::test]
    async fn create_match_links_and_notifies_both_sides() {
        let (store, sessions, coordinator) = build_coordinator();
        let (c1, alice, mut rx1) = connected_user(&store, &sessions, "alice").await;
        let (c2, bob, mut rx2) = connected_user(&store, &sessions, "bob").await;

        let match_id = coordinator
            .create_match((c1, alice), (c2, bob))
            .await
            .unwrap();

        let alice_row = store.fetch_user(alice).await.unwrap();
        let bob_row = store.fetch_user(bob).await.unwrap();
        assert_eq!(alice_row.current_match_id, Some(match_id));
        assert_eq!(bob_row.current_match_id, Some(match_id));

        match rx1.try_recv().unwrap() {
            ServerMessage::MatchFound {
                opponent_username,
                is_initiator,
                ..
            } => {
                assert_eq!(opponent_username, "bob");
                assert!(is_initiator);
            }
            other => panic!("unexpected message: {other:?}"),
        }
        match rx2.try_recv().unwrap() {
            ServerMessage::MatchFound { is_initiator, .. } => assert!(!is_initiator),
            other => panic!("unexpected message: {other:?}"),
        }

        assert_eq!(sessions.get(c1).unwrap().unwrap().opponent_conn, Some(c2));
    }

    #[tokio::test]
    async fn first_report_is_pending_second_resolves() {
        let (store, sessions, coordinator) = build_coordinator();
        let (c1, alice, mut rx1) = connected_user(&store, &sessions, "alice").await;
        let (c2, bob, mut rx2) = connected_user(&store, &sessions, "bob").await;
        let match_id = coordinator
            .create_match((c1, alice), (c2, bob))
            .await
            .unwrap();

        let outcome = coordinator
            .handle_report(alice, match_id, ReportValue::Win)
            .await
            .unwrap();
        assert_eq!(outcome, ReportOutcome::Pending);

        let outcome = coordinator
            .handle_report(bob, match_id, ReportValue::Lose)
            .await
            .unwrap();
        assert_eq!(outcome, ReportOutcome::Consistent);

        let alice_row = store.fetch_user(alice).await.unwrap();
        let bob_row = store.fetch_user(bob).await.unwrap();
        assert_eq!(alice_row.rate, 1516);
        assert_eq!(bob_row.rate, 1484);
        assert!(alice_row.current_match_id.is_none());
        assert!(bob_row.current_match_id.is_none());
        assert!(alice_row.match_history[0].contains("勝利"));
        assert!(alice_row.match_history[0].contains("1500→1516"));
        assert!(bob_row.match_history[0].contains("敗北"));
        assert!(bob_row.match_history[0].contains("1500→1484"));

        let record = store.fetch_match(match_id).await.unwrap();
        assert!(record.resolved_at.is_some());

        // Drain the match_found frames, then expect the resolution push.
        rx1.try_recv().unwrap();
        rx2.try_recv().unwrap();
        match rx1.try_recv().unwrap() {
            ServerMessage::MatchResolved { rate, category, .. } => {
                assert_eq!(rate, 1516);
                assert_eq!(category, ResolutionCategory::Consistent);
            }
            other => panic!("unexpected message: {other:?}"),
        }
        match rx2.try_recv().unwrap() {
            ServerMessage::MatchResolved { rate, .. } => assert_eq!(rate, 1484),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn mutual_cancel_keeps_rates() {
        let (store, sessions, coordinator) = build_coordinator();
        let (c1, alice, _rx1) = connected_user(&store, &sessions, "alice").await;
        let (c2, bob, _rx2) = connected_user(&store, &sessions, "bob").await;
        let match_id = coordinator
            .create_match((c1, alice), (c2, bob))
            .await
            .unwrap();

        coordinator
            .handle_report(alice, match_id, ReportValue::Cancel)
            .await
            .unwrap();
        let outcome = coordinator
            .handle_report(bob, match_id, ReportValue::Cancel)
            .await
            .unwrap();
        assert_eq!(outcome, ReportOutcome::Cancelled);

        let alice_row = store.fetch_user(alice).await.unwrap();
        assert_eq!(alice_row.rate, 1500);
        assert!(alice_row.match_history[0].contains("対戦中止"));
    }

    #[tokio::test]
    async fn conflicting_reports_are_disputed() {
        let (store, sessions, coordinator) = build_coordinator();
        let (c1, alice, _rx1) = connected_user(&store, &sessions, "alice").await;
        let (c2, bob, _rx2) = connected_user(&store, &sessions, "bob").await;
        let match_id = coordinator
            .create_match((c1, alice), (c2, bob))
            .await
            .unwrap();

        coordinator
            .handle_report(alice, match_id, ReportValue::Win)
            .await
            .unwrap();
        let outcome = coordinator
            .handle_report(bob, match_id, ReportValue::Win)
            .await
            .unwrap();
        assert_eq!(outcome, ReportOutcome::Disputed);

        let alice_row = store.fetch_user(alice).await.unwrap();
        let bob_row = store.fetch_user(bob).await.unwrap();
        assert_eq!(alice_row.rate, 1500);
        assert_eq!(bob_row.rate, 1500);
        assert!(alice_row.match_history[0].contains("結果不一致"));
        assert!(bob_row.match_history[0].contains("結果不一致"));
    }

    #[tokio::test]
    async fn duplicate_report_is_rejected_and_first_stands() {
        let (store, sessions, coordinator) = build_coordinator();
        let (c1, alice, _rx1) = connected_user(&store, &sessions, "alice").await;
        let (c2, bob, _rx2) = connected_user(&store, &sessions, "bob").await;
        let match_id = coordinator
            .create_match((c1, alice), (c2, bob))
            .await
            .unwrap();

        coordinator
            .handle_report(alice, match_id, ReportValue::Win)
            .await
            .unwrap();
        let err = coordinator
            .handle_report(alice, match_id, ReportValue::Lose)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");

        // Bob's lose resolves with alice's first report in effect.
        let outcome = coordinator
            .handle_report(bob, match_id, ReportValue::Lose)
            .await
            .unwrap();
        assert_eq!(outcome, ReportOutcome::Consistent);
        assert_eq!(store.fetch_user(alice).await.unwrap().rate, 1516);
        assert_eq!(store.fetch_user(bob).await.unwrap().rate, 1484);
    }

    #[tokio::test]
    async fn report_on_resolved_match_is_a_state_error() {
        let (store, sessions, coordinator) = build_coordinator();
        let (c1, alice, _rx1) = connected_user(&store, &sessions, "alice").await;
        let (c2, bob, _rx2) = connected_user(&store, &sessions, "bob").await;
        let match_id = coordinator
            .create_match((c1, alice), (c2, bob))
            .await
            .unwrap();

        coordinator
            .handle_report(alice, match_id, ReportValue::Win)
            .await
            .unwrap();
        coordinator
            .handle_report(bob, match_id, ReportValue::Lose)
            .await
            .unwrap();

        let err = coordinator
            .handle_report(bob, match_id, ReportValue::Win)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "state");
    }

    #[tokio::test]
    async fn outsider_report_is_rejected() {
        let (store, sessions, coordinator) = build_coordinator();
        let (c1, alice, _rx1) = connected_user(&store, &sessions, "alice").await;
        let (c2, bob, _rx2) = connected_user(&store, &sessions, "bob").await;
        let (_c3, mallory, _rx3) = connected_user(&store, &sessions, "mallory").await;
        let match_id = coordinator
            .create_match((c1, alice), (c2, bob))
            .await
            .unwrap();

        let err = coordinator
            .handle_report(mallory, match_id, ReportValue::Win)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "state");
    }

    #[tokio::test]
    async fn resolution_reaches_players_even_without_session_pointers() {
        let (store, sessions, coordinator) = build_coordinator();
        let (c1, alice, _rx1) = connected_user(&store, &sessions, "alice").await;
        let (c2, bob, _rx2) = connected_user(&store, &sessions, "bob").await;
        let match_id = coordinator
            .create_match((c1, alice), (c2, bob))
            .await
            .unwrap();

        // clear_match_info before resolution: pointers gone, store intact.
        sessions.clear_match(c1).unwrap();
        sessions.clear_match(c2).unwrap();

        coordinator
            .handle_report(alice, match_id, ReportValue::Win)
            .await
            .unwrap();
        let outcome = coordinator
            .handle_report(bob, match_id, ReportValue::Lose)
            .await
            .unwrap();
        assert_eq!(outcome, ReportOutcome::Consistent);
        assert_eq!(store.fetch_user(alice).await.unwrap().rate, 1516);
    }
}
