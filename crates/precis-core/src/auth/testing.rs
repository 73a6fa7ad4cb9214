//! In-process OAuth doubles shared by the auth and sync tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use url::Url;

use super::{AuthorizationPrompt, OAuthBackend, TokenResponse};
use crate::error::{SyncError, SyncResult};
use crate::models::UserProfile;

pub fn tokens(access: &str, refresh: Option<&str>, expires_in: i64) -> TokenResponse {
    TokenResponse {
        access_token: access.to_string(),
        refresh_token: refresh.map(ToString::to_string),
        expires_in: Some(expires_in),
    }
}

/// Backend that mints `access-N` tokens and counts calls.
///
/// Queued refresh errors are returned before any token is minted.
#[derive(Default)]
pub struct FakeOAuthBackend {
    pub exchanges: AtomicUsize,
    pub refreshes: AtomicUsize,
    pub revocations: Mutex<Vec<String>>,
    refresh_errors: Mutex<VecDeque<SyncError>>,
    exchange_error: Mutex<Option<SyncError>>,
    fail_revoke: Mutex<bool>,
}

impl FakeOAuthBackend {
    pub fn fail_next_refresh(&self, error: SyncError) {
        self.refresh_errors
            .lock()
            .unwrap()
            .push_back(error);
    }

    pub fn fail_exchange(&self, error: SyncError) {
        *self.exchange_error.lock().unwrap() = Some(error);
    }

    pub fn fail_revoke(&self) {
        *self.fail_revoke.lock().unwrap() = true;
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OAuthBackend for FakeOAuthBackend {
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        _redirect_uri: &str,
    ) -> SyncResult<TokenResponse> {
        assert_eq!(code, "test-code");
        assert!(code_verifier.len() >= 43);
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.exchange_error.lock().unwrap().take() {
            return Err(error);
        }
        Ok(tokens("access-0", Some("refresh-0"), 3600))
    }

    async fn refresh(&self, _refresh_token: &str) -> SyncResult<TokenResponse> {
        let count = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = self.refresh_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(tokens(&format!("access-{count}"), None, 3600))
    }

    async fn revoke(&self, token: &str) -> SyncResult<()> {
        self.revocations.lock().unwrap().push(token.to_string());
        if *self.fail_revoke.lock().unwrap() {
            return Err(SyncError::Network("revoke endpoint down".to_string()));
        }
        Ok(())
    }

    async fn fetch_profile(&self, _access_token: &str) -> SyncResult<UserProfile> {
        Ok(UserProfile {
            email: Some("user@example.com".to_string()),
            name: Some("Test User".to_string()),
            picture: None,
        })
    }
}

/// Prompt that "consents" immediately by echoing the state back with a code.
#[derive(Default)]
pub struct EchoPrompt {
    pub deny: bool,
}

#[async_trait]
impl AuthorizationPrompt for EchoPrompt {
    async fn authorize(&self, authorization_url: &Url) -> SyncResult<Url> {
        let state = authorization_url
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();
        let redirect = if self.deny {
            format!("http://127.0.0.1:8765/callback?error=access_denied&state={state}")
        } else {
            format!("http://127.0.0.1:8765/callback?code=test-code&state={state}")
        };
        Ok(Url::parse(&redirect).unwrap())
    }
}
