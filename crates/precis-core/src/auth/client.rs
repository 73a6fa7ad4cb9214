//! HTTP client for the token-exchange proxy and the provider endpoints.
//!
//! The client secret never ships with the app: code exchange and refresh go
//! through a trusted proxy exposing `POST /exchange` and `POST /refresh`.
//! Revocation and userinfo talk to the provider directly.

use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::models::UserProfile;
use crate::util::{oauth_error_code, parse_api_error};

/// Lifetime assumed when the provider omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECONDS: i64 = 3600;

/// Tokens returned by an exchange or refresh.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenResponse {
    /// Absolute expiry (Unix ms) relative to `now_ms`.
    #[must_use]
    pub fn expires_at_ms(&self, now_ms: i64) -> i64 {
        let seconds = self
            .expires_in
            .filter(|seconds| *seconds > 0)
            .unwrap_or(DEFAULT_EXPIRES_IN_SECONDS);
        now_ms.saturating_add(seconds.saturating_mul(1000))
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Network side of the token lifecycle.
#[async_trait]
pub trait OAuthBackend: Send + Sync {
    /// Trade an authorization code for tokens. Failures are `SyncError::Auth`.
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> SyncResult<TokenResponse>;

    /// Mint a new access token. `invalid_grant` maps to
    /// `SyncError::SessionExpired`; anything else is `SyncError::Network`.
    async fn refresh(&self, refresh_token: &str) -> SyncResult<TokenResponse>;

    async fn revoke(&self, token: &str) -> SyncResult<()>;

    async fn fetch_profile(&self, access_token: &str) -> SyncResult<UserProfile>;
}

/// reqwest-backed [`OAuthBackend`].
#[derive(Clone)]
pub struct HttpOAuthClient {
    proxy_base_url: String,
    revoke_url: String,
    userinfo_url: String,
    client: Client,
}

impl HttpOAuthClient {
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        Ok(Self::with_client(config, Client::builder().build()?))
    }

    #[must_use]
    pub fn with_client(config: &SyncConfig, client: Client) -> Self {
        Self {
            proxy_base_url: config.proxy_base_url.trim_end_matches('/').to_string(),
            revoke_url: config.revoke_url.clone(),
            userinfo_url: config.userinfo_url.clone(),
            client,
        }
    }

    fn proxy_request(&self, path: &str, payload: &serde_json::Value) -> RequestBuilder {
        self.client
            .post(format!("{}/{path}", self.proxy_base_url))
            .header("Accept", "application/json")
            .json(payload)
    }
}

#[async_trait]
impl OAuthBackend for HttpOAuthClient {
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> SyncResult<TokenResponse> {
        let payload = serde_json::json!({
            "code": code,
            "code_verifier": code_verifier,
            "redirect_uri": redirect_uri,
        });
        let response = self
            .proxy_request("exchange", &payload)
            .send()
            .await
            .map_err(|error| SyncError::Auth(format!("Token exchange failed: {error}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Auth(parse_api_error(status, &body)));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|error| SyncError::Auth(format!("Malformed token response: {error}")))
    }

    async fn refresh(&self, refresh_token: &str) -> SyncResult<TokenResponse> {
        let payload = serde_json::json!({ "refresh_token": refresh_token });
        let response = self.proxy_request("refresh", &payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_refresh_failure(status, &body));
        }

        Ok(response.json::<TokenResponse>().await?)
    }

    async fn revoke(&self, token: &str) -> SyncResult<()> {
        let response = self
            .client
            .get(&self.revoke_url)
            .query(&[("token", token)])
            .send()
            .await?;

        // Revoking an already-invalid token is reported as 400 by the provider.
        if response.status().is_success() || response.status() == StatusCode::BAD_REQUEST {
            return Ok(());
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(SyncError::Network(parse_api_error(status, &body)))
    }

    async fn fetch_profile(&self, access_token: &str) -> SyncResult<UserProfile> {
        let response = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;
        read_profile(response).await
    }
}

async fn read_profile(response: Response) -> SyncResult<UserProfile> {
    match response.status() {
        status if status.is_success() => Ok(response.json::<UserProfile>().await?),
        StatusCode::UNAUTHORIZED => Err(SyncError::TokenExpired),
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(SyncError::Network(parse_api_error(status, &body)))
        }
    }
}

fn classify_refresh_failure(status: StatusCode, body: &str) -> SyncError {
    if oauth_error_code(body).as_deref() == Some("invalid_grant") {
        SyncError::SessionExpired
    } else {
        SyncError::Network(parse_api_error(status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_grant_means_session_expired() {
        let body = r#"{"error":"invalid_grant","error_description":"Token has been revoked."}"#;
        assert!(matches!(
            classify_refresh_failure(StatusCode::BAD_REQUEST, body),
            SyncError::SessionExpired
        ));
    }

    #[test]
    fn other_refresh_failures_are_transient() {
        let err = classify_refresh_failure(StatusCode::BAD_GATEWAY, "upstream down");
        assert!(matches!(err, SyncError::Network(ref message) if message.contains("502")));
    }

    fn response(status: u16, body: &'static str) -> Response {
        Response::from(
            http::Response::builder()
                .status(status)
                .body(body)
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn profile_reads_userinfo_payload() {
        let profile = read_profile(response(
            200,
            r#"{"email":"user@example.com","name":"User"}"#,
        ))
        .await
        .unwrap();
        assert_eq!(profile.email.as_deref(), Some("user@example.com"));
    }

    #[tokio::test]
    async fn profile_status_mapping() {
        assert!(matches!(
            read_profile(response(401, "")).await,
            Err(SyncError::TokenExpired)
        ));
        assert!(matches!(
            read_profile(response(404, "")).await,
            Err(SyncError::Network(ref message)) if message == "HTTP 404"
        ));
        assert!(matches!(
            read_profile(response(500, r#"{"error":{"message":"Backend Error"}}"#)).await,
            Err(SyncError::Network(ref message)) if message == "Backend Error (500)"
        ));
    }

    #[test]
    fn expires_at_defaults_to_an_hour() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"a"}"#).unwrap();
        assert_eq!(response.expires_at_ms(1_000), 1_000 + 3_600_000);

        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"a","expires_in":60}"#).unwrap();
        assert_eq!(response.expires_at_ms(0), 60_000);
    }

    #[test]
    fn token_response_debug_redacts() {
        let response = TokenResponse {
            access_token: "secret-access".to_string(),
            refresh_token: Some("secret-refresh".to_string()),
            expires_in: Some(3600),
        };
        let rendered = format!("{response:?}");
        assert!(!rendered.contains("secret-access"));
        assert!(!rendered.contains("secret-refresh"));
    }
}
