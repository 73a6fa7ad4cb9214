//! Sync configuration.
//!
//! Provides a `SyncConfig` used by every client to discover the OAuth
//! endpoints, the token-exchange proxy and the remote document API, plus the
//! timing knobs of the sync engine.

use std::env;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};
use crate::util::{is_http_url, normalize_text_option};

const ENV_CLIENT_ID: &str = "PRECIS_OAUTH_CLIENT_ID";
const ENV_PROXY_URL: &str = "PRECIS_OAUTH_PROXY_URL";
const ENV_REDIRECT_URI: &str = "PRECIS_OAUTH_REDIRECT_URI";
const ENV_AUTH_URL: &str = "PRECIS_OAUTH_AUTH_URL";
const ENV_REVOKE_URL: &str = "PRECIS_OAUTH_REVOKE_URL";
const ENV_USERINFO_URL: &str = "PRECIS_OAUTH_USERINFO_URL";
const ENV_DRIVE_API_BASE: &str = "PRECIS_DRIVE_API_BASE";
const ENV_DRIVE_UPLOAD_BASE: &str = "PRECIS_DRIVE_UPLOAD_BASE";
const ENV_DEBOUNCE_SECS: &str = "PRECIS_SYNC_DEBOUNCE_SECS";
const ENV_INTERVAL_MINUTES: &str = "PRECIS_SYNC_INTERVAL_MINUTES";

const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const DEFAULT_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
const DEFAULT_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";
const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8765/callback";
const DEFAULT_DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const DEFAULT_DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const DEFAULT_SCOPES: [&str; 4] = [
    "openid",
    "email",
    "profile",
    "https://www.googleapis.com/auth/drive.appdata",
];

/// Debounce between a local mutation and the sync cycle it triggers.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(10);
/// Period of the background schedule while auto-sync is on.
pub const DEFAULT_PERIODIC_INTERVAL: Duration = Duration::from_secs(30 * 60);
/// A cached access token is considered stale this long before it expires.
pub const DEFAULT_TOKEN_SKEW: Duration = Duration::from_secs(60);
/// How long tombstones are kept and pushed before being purged.
pub const DEFAULT_TOMBSTONE_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Runtime configuration of the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Public OAuth client id (the secret lives in the exchange proxy).
    pub client_id: String,
    /// Provider authorization endpoint.
    pub auth_url: String,
    /// Redirect URI registered for the client.
    pub redirect_uri: String,
    /// Requested OAuth scopes.
    pub scopes: Vec<String>,
    /// Base URL of the trusted proxy exposing `/exchange` and `/refresh`.
    pub proxy_base_url: String,
    /// Provider token revocation endpoint.
    pub revoke_url: String,
    /// Provider userinfo endpoint.
    pub userinfo_url: String,
    /// Remote document API base.
    pub drive_api_base: String,
    /// Remote document upload API base.
    pub drive_upload_base: String,
    pub debounce: Duration,
    pub periodic_interval: Duration,
    pub token_skew: Duration,
    pub tombstone_retention: Duration,
}

impl SyncConfig {
    /// Build a configuration with default endpoints and timings.
    pub fn new(client_id: impl Into<String>, proxy_base_url: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            scopes: DEFAULT_SCOPES.iter().map(ToString::to_string).collect(),
            proxy_base_url: proxy_base_url.into().trim_end_matches('/').to_string(),
            revoke_url: DEFAULT_REVOKE_URL.to_string(),
            userinfo_url: DEFAULT_USERINFO_URL.to_string(),
            drive_api_base: DEFAULT_DRIVE_API_BASE.to_string(),
            drive_upload_base: DEFAULT_DRIVE_UPLOAD_BASE.to_string(),
            debounce: DEFAULT_DEBOUNCE,
            periodic_interval: DEFAULT_PERIODIC_INTERVAL,
            token_skew: DEFAULT_TOKEN_SKEW,
            tombstone_retention: DEFAULT_TOMBSTONE_RETENTION,
        }
    }

    /// Load configuration from `PRECIS_*` environment variables.
    ///
    /// Returns `Ok(None)` when neither the client id nor the proxy URL is set.
    /// Returns an error when only a partial configuration is provided.
    pub fn from_env() -> SyncResult<Option<Self>> {
        parse_config(|key| env::var(key).ok())
    }

    /// Override the debounce delay.
    #[must_use]
    pub const fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Tombstone retention in milliseconds.
    pub fn tombstone_retention_ms(&self) -> i64 {
        duration_ms(self.tombstone_retention)
    }

    /// Token expiry skew in milliseconds.
    pub fn token_skew_ms(&self) -> i64 {
        duration_ms(self.token_skew)
    }

    /// Space-separated scope string for the authorization request.
    pub fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn parse_config(lookup: impl Fn(&str) -> Option<String>) -> SyncResult<Option<SyncConfig>> {
    let client_id = normalize_text_option(lookup(ENV_CLIENT_ID));
    let proxy_url = normalize_text_option(lookup(ENV_PROXY_URL));

    let (client_id, proxy_url) = match (client_id, proxy_url) {
        (None, None) => return Ok(None),
        (Some(client_id), Some(proxy_url)) => (client_id, proxy_url),
        (None, Some(_)) => {
            return Err(SyncError::InvalidConfiguration(format!(
                "Sync configuration is incomplete. Missing: {ENV_CLIENT_ID}"
            )))
        }
        (Some(_), None) => {
            return Err(SyncError::InvalidConfiguration(format!(
                "Sync configuration is incomplete. Missing: {ENV_PROXY_URL}"
            )))
        }
    };

    let mut config = SyncConfig::new(client_id, require_http_url(proxy_url, ENV_PROXY_URL)?);

    if let Some(value) = normalize_text_option(lookup(ENV_REDIRECT_URI)) {
        config.redirect_uri = require_http_url(value, ENV_REDIRECT_URI)?;
    }
    if let Some(value) = normalize_text_option(lookup(ENV_AUTH_URL)) {
        config.auth_url = require_http_url(value, ENV_AUTH_URL)?;
    }
    if let Some(value) = normalize_text_option(lookup(ENV_REVOKE_URL)) {
        config.revoke_url = require_http_url(value, ENV_REVOKE_URL)?;
    }
    if let Some(value) = normalize_text_option(lookup(ENV_USERINFO_URL)) {
        config.userinfo_url = require_http_url(value, ENV_USERINFO_URL)?;
    }
    if let Some(value) = normalize_text_option(lookup(ENV_DRIVE_API_BASE)) {
        config.drive_api_base = require_http_url(value, ENV_DRIVE_API_BASE)?;
    }
    if let Some(value) = normalize_text_option(lookup(ENV_DRIVE_UPLOAD_BASE)) {
        config.drive_upload_base = require_http_url(value, ENV_DRIVE_UPLOAD_BASE)?;
    }
    if let Some(secs) = parse_u64(lookup(ENV_DEBOUNCE_SECS), ENV_DEBOUNCE_SECS)? {
        config.debounce = Duration::from_secs(secs);
    }
    if let Some(minutes) = parse_u64(lookup(ENV_INTERVAL_MINUTES), ENV_INTERVAL_MINUTES)? {
        if minutes == 0 {
            return Err(SyncError::InvalidConfiguration(format!(
                "{ENV_INTERVAL_MINUTES} must be at least 1"
            )));
        }
        config.periodic_interval = Duration::from_secs(minutes * 60);
    }

    Ok(Some(config))
}

fn require_http_url(value: String, key: &str) -> SyncResult<String> {
    if is_http_url(&value) {
        Ok(value.trim_end_matches('/').to_string())
    } else {
        Err(SyncError::InvalidConfiguration(format!(
            "{key} must start with http:// or https://"
        )))
    }
}

fn parse_u64(value: Option<String>, key: &str) -> SyncResult<Option<u64>> {
    normalize_text_option(value)
        .map(|raw| {
            raw.parse::<u64>().map_err(|_| {
                SyncError::InvalidConfiguration(format!("{key} must be a whole number, got '{raw}'"))
            })
        })
        .transpose()
}
