//! Browser consent through a loopback redirect listener.

use std::time::Duration;

use async_trait::async_trait;
use precis_core::{AuthorizationPrompt, SyncError, SyncResult};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const MAX_REQUEST_BYTES: usize = 8 * 1024;
const CALLBACK_PAGE: &str = "<html><body><p>Précis is signed in. You can close this window.</p></body></html>";

/// Prints the consent URL and waits for the provider to redirect back to
/// the configured loopback `redirect_uri`.
pub struct LoopbackPrompt {
    redirect_uri: Url,
    timeout: Duration,
}

impl LoopbackPrompt {
    pub fn new(redirect_uri: &str) -> SyncResult<Self> {
        let redirect_uri = Url::parse(redirect_uri)
            .map_err(|error| SyncError::InvalidConfiguration(format!("redirect_uri: {error}")))?;
        if redirect_uri.host_str().is_none() || redirect_uri.port_or_known_default().is_none() {
            return Err(SyncError::InvalidConfiguration(
                "redirect_uri must name a loopback host and port".to_string(),
            ));
        }
        Ok(Self {
            redirect_uri,
            timeout: CALLBACK_TIMEOUT,
        })
    }

    fn bind_address(&self) -> String {
        let host = self.redirect_uri.host_str().unwrap_or("127.0.0.1");
        let port = self.redirect_uri.port_or_known_default().unwrap_or(80);
        format!("{host}:{port}")
    }

    async fn wait_for_callback(&self, listener: TcpListener) -> SyncResult<Url> {
        loop {
            let (mut stream, peer) = listener
                .accept()
                .await
                .map_err(|error| SyncError::Auth(format!("Callback listener failed: {error}")))?;

            let mut buffer = vec![0_u8; MAX_REQUEST_BYTES];
            let read = stream
                .read(&mut buffer)
                .await
                .map_err(|error| SyncError::Auth(format!("Callback read failed: {error}")))?;
            let request = String::from_utf8_lossy(&buffer[..read]);

            match parse_callback_request(&request, &self.redirect_uri) {
                Some(url) => {
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{CALLBACK_PAGE}",
                        CALLBACK_PAGE.len()
                    );
                    if let Err(error) = stream.write_all(response.as_bytes()).await {
                        tracing::debug!(%error, "Failed to answer OAuth callback");
                    }
                    return Ok(url);
                }
                None => {
                    tracing::debug!(%peer, "Ignoring unrelated request on callback listener");
                    let _ = stream
                        .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                        .await;
                }
            }
        }
    }
}

#[async_trait]
impl AuthorizationPrompt for LoopbackPrompt {
    async fn authorize(&self, authorization_url: &Url) -> SyncResult<Url> {
        let listener = TcpListener::bind(self.bind_address())
            .await
            .map_err(|error| SyncError::Auth(format!("Cannot listen for callback: {error}")))?;

        eprintln!("Open this URL in your browser to sign in:\n\n  {authorization_url}\n");
        tracing::info!(redirect_uri = %self.redirect_uri, "Waiting for OAuth callback");

        tokio::time::timeout(self.timeout, self.wait_for_callback(listener))
            .await
            .map_err(|_| SyncError::Auth("Timed out waiting for sign-in".to_string()))?
    }
}

/// Rebuild the full redirect URL from a raw HTTP request, if the request
/// targets the redirect path.
pub fn parse_callback_request(request: &str, redirect_uri: &Url) -> Option<Url> {
    let request_line = request.lines().next()?;
    let mut parts = request_line.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }
    let target = parts.next()?;

    let url = redirect_uri.join(target).ok()?;
    (url.path() == redirect_uri.path()).then_some(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redirect() -> Url {
        Url::parse("http://127.0.0.1:8765/callback").unwrap()
    }

    #[test]
    fn callback_request_yields_redirect_url() {
        let request = "GET /callback?code=abc&state=xyz HTTP/1.1\r\nHost: 127.0.0.1:8765\r\n\r\n";
        let url = parse_callback_request(request, &redirect()).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8765/callback?code=abc&state=xyz");
    }

    #[test]
    fn unrelated_requests_are_ignored() {
        assert!(parse_callback_request("GET /favicon.ico HTTP/1.1\r\n\r\n", &redirect()).is_none());
        assert!(parse_callback_request("POST /callback HTTP/1.1\r\n\r\n", &redirect()).is_none());
        assert!(parse_callback_request("", &redirect()).is_none());
    }

    #[test]
    fn redirect_uri_must_be_a_url() {
        assert!(LoopbackPrompt::new("not a url").is_err());
        assert!(LoopbackPrompt::new("http://127.0.0.1:8765/callback").is_ok());
    }

    #[tokio::test]
    async fn listener_returns_callback_url() {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let prompt = LoopbackPrompt::new(&format!("http://127.0.0.1:{port}/callback")).unwrap();
        let listener = TcpListener::bind(prompt.bind_address()).await.unwrap();

        let client = tokio::spawn(async move {
            let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
                .await
                .unwrap();
            stream
                .write_all(b"GET /callback?code=c&state=s HTTP/1.1\r\nHost: localhost\r\n\r\n")
                .await
                .unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).await.unwrap();
            response
        });

        let url = prompt.wait_for_callback(listener).await.unwrap();
        assert_eq!(url.query(), Some("code=c&state=s"));
        assert!(client.await.unwrap().starts_with("HTTP/1.1 200 OK"));
    }
}
