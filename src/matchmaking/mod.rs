//! Matchmaking: the waiting queue and the per-match coordinator

pub mod coordinator;
pub mod queue;

pub use coordinator::MatchCoordinator;
pub use queue::MatchQueue;
