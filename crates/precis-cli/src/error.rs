use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Sync(#[from] precis_core::SyncError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(
        "Sync is not configured. Set PRECIS_OAUTH_CLIENT_ID and PRECIS_OAUTH_PROXY_URL (a .env file works too)."
    )]
    SyncNotConfigured,
}
