//! OAuth2 token lifecycle.
//!
//! [`TokenManager`] runs the interactive authorization-code + PKCE login,
//! keeps a short-lived access token cached in memory and refreshes it
//! through the token-exchange proxy. The long-lived refresh token lives in
//! the persisted session only.

mod client;
mod pkce;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use url::Url;

pub use client::{HttpOAuthClient, OAuthBackend, TokenResponse};
pub use pkce::{
    build_authorization_url, extract_authorization_code, generate_state, s256_challenge, PkcePair,
};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::models::{SyncSession, UserProfile};
use crate::session::SessionState;

/// Shows the authorization URL to the user and waits for the redirect.
#[async_trait]
pub trait AuthorizationPrompt: Send + Sync {
    /// Returns the full redirect URL the provider sent the browser to.
    async fn authorize(&self, authorization_url: &Url) -> SyncResult<Url>;
}

/// Tokens obtained by an interactive login.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix ms
    pub expires_at: i64,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TokenGrant")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expiry: i64,
    last_updated: i64,
}

pub struct TokenManager {
    config: SyncConfig,
    backend: Arc<dyn OAuthBackend>,
    prompt: Arc<dyn AuthorizationPrompt>,
    session: Arc<SessionState>,
    clock: Arc<dyn Clock>,
    cache: Mutex<Option<CachedToken>>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl TokenManager {
    pub fn new(
        config: SyncConfig,
        backend: Arc<dyn OAuthBackend>,
        prompt: Arc<dyn AuthorizationPrompt>,
        session: Arc<SessionState>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            backend,
            prompt,
            session,
            clock,
            cache: Mutex::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Run the interactive login and exchange the code for tokens.
    ///
    /// The caller persists the grant into the session; the access token is
    /// cached here right away.
    pub async fn authenticate(&self) -> SyncResult<TokenGrant> {
        let pkce = PkcePair::generate();
        let state = generate_state();
        let authorization_url = build_authorization_url(&self.config, &pkce.challenge, &state)?;

        tracing::info!("Waiting for authorization in the browser");
        let redirect = self.prompt.authorize(&authorization_url).await?;
        let code = extract_authorization_code(&redirect, &state)?;

        let tokens = self
            .backend
            .exchange_code(&code, &pkce.verifier, &self.config.redirect_uri)
            .await?;
        let refresh_token = tokens.refresh_token.clone().ok_or_else(|| {
            SyncError::Auth("Token exchange did not return a refresh token".to_string())
        })?;

        let now = self.clock.now_ms();
        let grant = TokenGrant {
            expires_at: tokens.expires_at_ms(now),
            access_token: tokens.access_token,
            refresh_token,
        };
        self.prime(&grant.access_token, grant.expires_at, now);
        tracing::info!("Authorization code exchanged");
        Ok(grant)
    }

    /// Access token valid for at least the configured skew.
    pub async fn get_valid_access_token(&self) -> SyncResult<String> {
        let now = self.clock.now_ms();
        if let Some(token) = self.cached(now) {
            return Ok(token);
        }

        let session = self.session.snapshot();
        if let Some(token) = session.access_token {
            if self.is_fresh(session.token_expiry, now) {
                self.prime(&token, session.token_expiry, now);
                return Ok(token);
            }
        }

        self.refresh().await
    }

    /// Mint a new access token from the persisted refresh token.
    pub async fn refresh(&self) -> SyncResult<String> {
        let _gate = self.refresh_gate.lock().await;
        let refresh_token = self
            .session
            .snapshot()
            .refresh_token
            .ok_or(SyncError::NotLoggedIn)?;

        tracing::debug!("Refreshing access token");
        match self.backend.refresh(&refresh_token).await {
            Ok(tokens) => {
                let now = self.clock.now_ms();
                let expires_at = tokens.expires_at_ms(now);
                let applied = self.session.update(|session| {
                    // A logout or re-login during the request wins.
                    if session.refresh_token.as_deref() != Some(refresh_token.as_str()) {
                        return false;
                    }
                    session.access_token = Some(tokens.access_token.clone());
                    session.token_expiry = expires_at;
                    if let Some(rotated) = &tokens.refresh_token {
                        session.refresh_token = Some(rotated.clone());
                    }
                    true
                })?;
                if !applied {
                    tracing::info!("Session changed while refreshing; discarding token");
                    return Err(SyncError::NotLoggedIn);
                }
                self.prime(&tokens.access_token, expires_at, now);
                Ok(tokens.access_token)
            }
            Err(SyncError::SessionExpired) => {
                tracing::warn!("Refresh token rejected by provider; logging out");
                self.invalidate();
                self.session.update(SyncSession::clear_credentials)?;
                Err(SyncError::SessionExpired)
            }
            Err(error @ SyncError::Network(_)) => Err(error),
            Err(other) => Err(SyncError::Network(other.to_string())),
        }
    }

    /// Best-effort revocation of the current grant. Never fails.
    pub async fn revoke(&self) {
        let session = self.session.snapshot();
        let Some(token) = session.refresh_token.or(session.access_token) else {
            return;
        };
        if let Err(error) = self.backend.revoke(&token).await {
            tracing::warn!("Token revocation failed: {}", error);
        }
    }

    /// Drop the cached access token.
    pub fn invalidate(&self) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Load the signed-in user's profile.
    pub async fn fetch_profile(&self) -> SyncResult<UserProfile> {
        let token = self.get_valid_access_token().await?;
        self.backend.fetch_profile(&token).await
    }

    /// When the cached token was last replaced (Unix ms).
    pub fn cache_updated_at(&self) -> Option<i64> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|cached| cached.last_updated)
    }

    fn is_fresh(&self, expiry: i64, now: i64) -> bool {
        now < expiry.saturating_sub(self.config.token_skew_ms())
    }

    fn cached(&self, now: i64) -> Option<String> {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .as_ref()
            .filter(|cached| self.is_fresh(cached.expiry, now))
            .map(|cached| cached.token.clone())
    }

    fn prime(&self, token: &str, expiry: i64, now: i64) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(CachedToken {
            token: token.to_string(),
            expiry,
            last_updated: now,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{EchoPrompt, FakeOAuthBackend};
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::MemorySessionStore;

    const HOUR_MS: i64 = 60 * 60 * 1000;

    struct Harness {
        manager: TokenManager,
        backend: Arc<FakeOAuthBackend>,
        session: Arc<SessionState>,
        clock: Arc<ManualClock>,
    }

    fn harness(session: SyncSession) -> Harness {
        harness_with_prompt(session, EchoPrompt::default())
    }

    fn harness_with_prompt(session: SyncSession, prompt: EchoPrompt) -> Harness {
        let backend = Arc::new(FakeOAuthBackend::default());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let session = Arc::new(
            SessionState::load(Arc::new(MemorySessionStore::with_session(session))).unwrap(),
        );
        let manager = TokenManager::new(
            SyncConfig::new("client", "https://proxy.example.com"),
            backend.clone(),
            Arc::new(prompt),
            session.clone(),
            clock.clone(),
        );
        Harness {
            manager,
            backend,
            session,
            clock,
        }
    }

    fn logged_in(expiry: i64) -> SyncSession {
        SyncSession {
            is_logged_in: true,
            access_token: Some("persisted".to_string()),
            refresh_token: Some("refresh".to_string()),
            token_expiry: expiry,
            ..SyncSession::default()
        }
    }

    #[tokio::test]
    async fn authenticate_exchanges_code_and_caches_token() {
        let h = harness(SyncSession::default());
        let grant = h.manager.authenticate().await.unwrap();

        assert_eq!(grant.access_token, "access-0");
        assert_eq!(grant.refresh_token, "refresh-0");
        assert_eq!(grant.expires_at, 1_000_000 + HOUR_MS);
        assert_eq!(h.manager.cache_updated_at(), Some(1_000_000));
        assert_eq!(h.manager.get_valid_access_token().await.unwrap(), "access-0");
        assert_eq!(h.backend.refresh_count(), 0);
    }

    #[tokio::test]
    async fn denied_consent_is_an_auth_error() {
        let h = harness_with_prompt(SyncSession::default(), EchoPrompt { deny: true });
        let err = h.manager.authenticate().await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
        assert_eq!(h.backend.exchanges.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_exchange_is_an_auth_error() {
        let h = harness(SyncSession::default());
        h.backend
            .fail_exchange(SyncError::Auth("bad code (400)".to_string()));
        assert!(matches!(
            h.manager.authenticate().await,
            Err(SyncError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn persisted_token_is_used_when_fresh() {
        let h = harness(logged_in(1_000_000 + HOUR_MS));
        assert_eq!(h.manager.get_valid_access_token().await.unwrap(), "persisted");
        assert_eq!(h.backend.refresh_count(), 0);
    }

    #[tokio::test]
    async fn token_inside_skew_window_is_refreshed() {
        // Expires in 30 s, which is inside the 60 s skew.
        let h = harness(logged_in(1_000_000 + 30_000));
        assert_eq!(h.manager.get_valid_access_token().await.unwrap(), "access-1");
        assert_eq!(h.backend.refresh_count(), 1);

        let session = h.session.snapshot();
        assert_eq!(session.access_token.as_deref(), Some("access-1"));
        assert_eq!(session.token_expiry, 1_000_000 + HOUR_MS);
    }

    #[tokio::test]
    async fn cached_token_expires_with_clock() {
        let h = harness(logged_in(0));
        assert_eq!(h.manager.get_valid_access_token().await.unwrap(), "access-1");
        assert_eq!(h.manager.get_valid_access_token().await.unwrap(), "access-1");

        h.clock.advance_ms(HOUR_MS);
        assert_eq!(h.manager.get_valid_access_token().await.unwrap(), "access-2");
        assert_eq!(h.backend.refresh_count(), 2);
    }

    #[tokio::test]
    async fn missing_refresh_token_is_not_logged_in() {
        let h = harness(SyncSession::default());
        assert!(matches!(
            h.manager.get_valid_access_token().await,
            Err(SyncError::NotLoggedIn)
        ));
    }

    #[tokio::test]
    async fn invalid_grant_forces_logout() {
        let h = harness(logged_in(0));
        h.backend.fail_next_refresh(SyncError::SessionExpired);

        assert!(matches!(
            h.manager.get_valid_access_token().await,
            Err(SyncError::SessionExpired)
        ));
        let session = h.session.snapshot();
        assert!(!session.is_logged_in);
        assert!(session.refresh_token.is_none());
        assert!(session.needs_settings_conflict_check);
    }

    #[tokio::test]
    async fn other_refresh_failures_keep_session() {
        let h = harness(logged_in(0));
        h.backend
            .fail_next_refresh(SyncError::Store("unexpected".to_string()));

        assert!(matches!(h.manager.refresh().await, Err(SyncError::Network(_))));
        assert!(h.session.snapshot().is_logged_in);
    }

    #[tokio::test]
    async fn invalidate_forces_next_call_to_refresh() {
        let h = harness(logged_in(0));
        h.manager.get_valid_access_token().await.unwrap();
        h.manager.invalidate();
        assert_eq!(h.manager.cache_updated_at(), None);

        // The refreshed token is still persisted, so no second refresh.
        assert_eq!(h.manager.get_valid_access_token().await.unwrap(), "access-1");
        assert_eq!(h.backend.refresh_count(), 1);
    }

    #[tokio::test]
    async fn revoke_swallows_failures() {
        let h = harness(logged_in(0));
        h.backend.fail_revoke();
        h.manager.revoke().await;
        assert_eq!(
            h.backend.revocations.lock().unwrap().as_slice(),
            ["refresh".to_string()]
        );
    }

    #[tokio::test]
    async fn refresh_result_is_discarded_after_logout() {
        let h = harness(logged_in(0));
        h.session.update(SyncSession::clear_credentials).unwrap();
        assert!(matches!(
            h.manager.refresh().await,
            Err(SyncError::NotLoggedIn)
        ));
    }
}
