//! Error types for the session hub
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Result alias for component operations whose failures are surfaced to
/// clients with a stable kind tag
pub type HubResult<T> = std::result::Result<T, HubError>;

/// Custom error types for hub scenarios that are surfaced to clients
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Authentication required: {message}")]
    Auth { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Transient store failure: {message}")]
    Transient { message: String },

    #[error("Internal hub error: {message}")]
    Internal { message: String },
}

impl HubError {
    /// Stable kind tag included in failure replies.
    pub fn kind(&self) -> &'static str {
        match self {
            HubError::Validation { .. } => "validation",
            HubError::Auth { .. } => "auth",
            HubError::Conflict { .. } => "conflict",
            HubError::NotFound { .. } => "not_found",
            HubError::InvalidState { .. } => "state",
            HubError::Transient { .. } => "transient",
            HubError::Internal { .. } => "internal",
        }
    }

    /// Message safe to show a client. Internal details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            HubError::Internal { .. } => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        HubError::Validation {
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        HubError::Auth {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        HubError::Conflict {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        HubError::NotFound {
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        HubError::InvalidState {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        HubError::Internal {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(HubError::validation("x").kind(), "validation");
        assert_eq!(HubError::auth("x").kind(), "auth");
        assert_eq!(HubError::conflict("x").kind(), "conflict");
        assert_eq!(HubError::not_found("x").kind(), "not_found");
        assert_eq!(HubError::invalid_state("x").kind(), "state");
        assert_eq!(HubError::internal("x").kind(), "internal");
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let err = HubError::internal("lock poisoned in session table");
        assert_eq!(err.client_message(), "internal error");

        let err = HubError::conflict("username already taken");
        assert!(err.client_message().contains("username already taken"));
    }
}
