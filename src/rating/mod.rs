//! Rating calculations for resolved matches

pub mod elo;

pub use elo::{DuelRates, EloDuelCalculator, RatingCalculator};
