//! Elo rating calculator for 1v1 matches
//!
//! Rates are integers; the winner's delta is rounded from the underlying
//! Elo update and the loser receives its exact negation, so every consistent
//! resolution is zero-sum by construction.

use serde::{Deserialize, Serialize};
use skillratings::elo::{elo, EloConfig, EloRating};
use skillratings::Outcomes;

use crate::types::{ELO_K, ELO_SCALE};

/// New rates for the two sides of a resolved duel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuelRates {
    pub winner_new: i32,
    pub loser_new: i32,
    /// Points transferred from loser to winner
    pub delta: i32,
}

/// Trait for calculating rate updates after a consistent resolution
pub trait RatingCalculator: Send + Sync {
    /// Compute new rates given the winner's and loser's current rates.
    fn rate_duel(&self, winner_rate: i32, loser_rate: i32) -> DuelRates;

    /// The winner's expected score before the match (0.0 to 1.0).
    fn expected_score(&self, winner_rate: i32, loser_rate: i32) -> f64;
}

/// Elo with a fixed K-factor
#[derive(Debug, Clone)]
pub struct EloDuelCalculator {
    config: EloConfig,
}

impl EloDuelCalculator {
    pub fn new() -> Self {
        Self {
            config: EloConfig { k: ELO_K },
        }
    }
}

impl Default for EloDuelCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl RatingCalculator for EloDuelCalculator {
    fn rate_duel(&self, winner_rate: i32, loser_rate: i32) -> DuelRates {
        let winner = EloRating {
            rating: winner_rate as f64,
        };
        let loser = EloRating {
            rating: loser_rate as f64,
        };

        let (winner_after, _) = elo(&winner, &loser, &Outcomes::WIN, &self.config);
        let delta = (winner_after.rating - winner.rating).round() as i32;

        DuelRates {
            winner_new: winner_rate + delta,
            loser_new: loser_rate - delta,
            delta,
        }
    }

    fn expected_score(&self, winner_rate: i32, loser_rate: i32) -> f64 {
        1.0 / (1.0 + 10f64.powf((loser_rate - winner_rate) as f64 / ELO_SCALE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_rates_transfer_half_k() {
        let calc = EloDuelCalculator::new();
        let rates = calc.rate_duel(1500, 1500);

        assert_eq!(rates.delta, 16);
        assert_eq!(rates.winner_new, 1516);
        assert_eq!(rates.loser_new, 1484);
    }

    #[test]
    fn upsets_transfer_more_points() {
        let calc = EloDuelCalculator::new();

        let favorite = calc.rate_duel(1700, 1300);
        let upset = calc.rate_duel(1300, 1700);

        assert!(favorite.delta < 16);
        assert!(upset.delta > 16);
        assert!(favorite.delta >= 1);
        assert!(upset.delta <= 31);
    }

    #[test]
    fn every_duel_is_zero_sum() {
        let calc = EloDuelCalculator::new();
        for (w, l) in [(1500, 1500), (1650, 1490), (1200, 1950), (2200, 1000)] {
            let rates = calc.rate_duel(w, l);
            assert_eq!(
                (rates.winner_new - w) + (rates.loser_new - l),
                0,
                "duel {w} vs {l} must be zero-sum"
            );
        }
    }

    #[test]
    fn expected_score_matches_the_formula() {
        let calc = EloDuelCalculator::new();
        assert!((calc.expected_score(1500, 1500) - 0.5).abs() < 1e-9);

        // 400 points of advantage is ~10:1 odds.
        let e = calc.expected_score(1900, 1500);
        assert!((e - 10.0 / 11.0).abs() < 1e-9);
    }

    #[test]
    fn delta_tracks_expected_score() {
        let calc = EloDuelCalculator::new();
        for (w, l) in [(1500, 1500), (1600, 1400), (1400, 1600)] {
            let rates = calc.rate_duel(w, l);
            let expected = calc.expected_score(w, l);
            let by_hand = (ELO_K * (1.0 - expected)).round() as i32;
            assert_eq!(rates.delta, by_hand);
        }
    }
}
