//! PKCE (RFC 7636) helpers and authorization-redirect parsing.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

const VERIFIER_LEN: usize = 64;
const STATE_LEN: usize = 32;
const UNRESERVED: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Code verifier and its S256 challenge.
#[derive(Clone, PartialEq, Eq)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PkcePair")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

impl PkcePair {
    /// Generate a fresh random verifier/challenge pair.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let verifier: String = (0..VERIFIER_LEN)
            .map(|_| char::from(UNRESERVED[rng.gen_range(0..UNRESERVED.len())]))
            .collect();
        let challenge = s256_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }
}

/// `BASE64URL(SHA256(verifier))` without padding.
pub fn s256_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Random anti-CSRF `state` value.
pub fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LEN)
        .map(char::from)
        .collect()
}

/// Build the interactive authorization URL for the code + PKCE flow.
pub fn build_authorization_url(
    config: &SyncConfig,
    challenge: &str,
    state: &str,
) -> SyncResult<Url> {
    let mut url = Url::parse(&config.auth_url).map_err(|error| {
        SyncError::InvalidConfiguration(format!("invalid authorization URL: {error}"))
    })?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", &config.redirect_uri)
        .append_pair("scope", &config.scope_param())
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("state", state)
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent");
    Ok(url)
}

/// Pull the authorization code out of the provider's redirect.
///
/// A provider `error` (e.g. `access_denied`) or a state mismatch fails with
/// `SyncError::Auth`.
pub fn extract_authorization_code(redirect: &Url, expected_state: &str) -> SyncResult<String> {
    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in redirect.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(SyncError::Auth(if error == "access_denied" {
            "User denied consent".to_string()
        } else {
            format!("Authorization failed: {error}")
        }));
    }
    if state.as_deref() != Some(expected_state) {
        return Err(SyncError::Auth(
            "Authorization state mismatch; please try again".to_string(),
        ));
    }
    code.filter(|code| !code.trim().is_empty())
        .ok_or_else(|| SyncError::Auth("Authorization response did not include a code".to_string()))
}
