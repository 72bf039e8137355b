//! Client-server wire protocol for the session hub

pub mod messages;

pub use messages::{ClientMessage, ProfilePayload, ReportOutcome, ServerMessage};
