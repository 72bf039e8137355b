//! Duel Hub - Realtime session hub for a rated 1v1 card game
//!
//! This crate multiplexes persistent WebSocket connections, runs a FIFO
//! matchmaking queue, reconciles two-sided match reports into Elo updates,
//! relays WebRTC signaling between peers, and manages spectate rooms.

pub mod auth;
pub mod config;
pub mod error;
pub mod hub;
pub mod matchmaking;
pub mod metrics;
pub mod notifier;
pub mod protocol;
pub mod rating;
pub mod relay;
pub mod router;
pub mod server;
pub mod session;
pub mod spectate;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{HubError, HubResult, Result};
pub use types::*;

// Re-export key components
pub use hub::Hub;
pub use router::MessageRouter;
pub use store::{InMemoryStore, SqliteStore, StoreGateway};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
