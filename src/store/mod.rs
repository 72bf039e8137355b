//! Durable store access for users and matches
//!
//! The hub treats the store as a passive key/value and relational sink behind
//! the [`StoreGateway`] trait, with a SQLite implementation for production
//! and an in-memory implementation for tests.

pub mod gateway;
pub mod memory;
pub mod sqlite;

pub use gateway::{retry_once, StoreError, StoreGateway, UserPatch};
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
