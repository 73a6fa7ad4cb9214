//! Error types for precis-core

use thiserror::Error;

/// Result type alias using precis-core's `SyncError`
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while authenticating, talking to the remote store,
/// or running a sync cycle.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Consent denied, bad redirect or a rejected code exchange.
    /// The user has to log in again.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// No refresh token is available.
    #[error("Not logged in")]
    NotLoggedIn,

    /// The remote store rejected the access token (HTTP 401).
    #[error("Access token expired")]
    TokenExpired,

    /// The refresh token was rejected by the provider; the session was logged out.
    #[error("Session expired, please log in again")]
    SessionExpired,

    /// Transient transport or server failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Local store failure
    #[error("Local store error: {0}")]
    Store(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// `resolve_settings_conflict` was called with nothing to resolve.
    #[error("No settings conflict is pending")]
    NoPendingConflict,
}

impl From<reqwest::Error> for SyncError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error.to_string())
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Store(error.to_string())
    }
}

impl SyncError {
    /// Whether the next trigger or timer may simply try again.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::TokenExpired)
    }

    /// Whether the user has to go through `login` before syncing again.
    pub const fn requires_login(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::NotLoggedIn | Self::SessionExpired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::Network("timeout".into()).is_retryable());
        assert!(SyncError::TokenExpired.is_retryable());
        assert!(!SyncError::SessionExpired.is_retryable());
        assert!(!SyncError::Store("disk full".into()).is_retryable());
    }

    #[test]
    fn login_required_errors() {
        assert!(SyncError::NotLoggedIn.requires_login());
        assert!(SyncError::SessionExpired.requires_login());
        assert!(SyncError::Auth("denied".into()).requires_login());
        assert!(!SyncError::Network("offline".into()).requires_login());
    }
}
