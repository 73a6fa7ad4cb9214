//! Shared utility functions used across multiple modules.

use reqwest::StatusCode;
use serde::Deserialize;

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorField>,
    error_description: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiErrorField {
    Code(String),
    Detailed { message: Option<String> },
}

/// Turn an HTTP error response into a short human-readable message.
///
/// Understands both OAuth-style (`error`, `error_description`) and
/// Google-API-style (`error.message`) bodies.
pub fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        let nested = match payload.error {
            Some(ApiErrorField::Code(code)) => Some(code),
            Some(ApiErrorField::Detailed { message }) => message,
            None => None,
        };
        if let Some(message) = payload.error_description.or(payload.message).or(nested) {
            return format!("{} ({})", compact_text(&message), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", compact_text(trimmed), status.as_u16())
    }
}

/// Extract the OAuth `error` code (e.g. `invalid_grant`) from a response body.
pub fn oauth_error_code(body: &str) -> Option<String> {
    match serde_json::from_str::<ApiErrorBody>(body).ok()?.error? {
        ApiErrorField::Code(code) => Some(code),
        ApiErrorField::Detailed { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_option_rejects_empty() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some("   ".to_string())), None);
    }

    #[test]
    fn normalize_text_option_trims_value() {
        assert_eq!(
            normalize_text_option(Some(" https://example.com ".to_string())),
            Some("https://example.com".to_string())
        );
    }

    #[test]
    fn is_http_url_accepts_valid_schemes() {
        assert!(is_http_url("http://localhost"));
        assert!(is_http_url("https://example.com"));
        assert!(!is_http_url("ftp://example.com"));
        assert!(!is_http_url("example.com"));
    }

    #[test]
    fn parse_api_error_prefers_description() {
        let body = r#"{"error":"invalid_grant","error_description":"Token has been revoked."}"#;
        assert_eq!(
            parse_api_error(StatusCode::BAD_REQUEST, body),
            "Token has been revoked. (400)"
        );
    }

    #[test]
    fn parse_api_error_reads_nested_google_message() {
        let body = r#"{"error":{"code":403,"message":"Insufficient scope"}}"#;
        assert_eq!(
            parse_api_error(StatusCode::FORBIDDEN, body),
            "Insufficient scope (403)"
        );
    }

    #[test]
    fn parse_api_error_falls_back_to_status() {
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, "  "), "HTTP 502");
    }

    #[test]
    fn oauth_error_code_reads_flat_code_only() {
        assert_eq!(
            oauth_error_code(r#"{"error":"invalid_grant"}"#).as_deref(),
            Some("invalid_grant")
        );
        assert_eq!(oauth_error_code(r#"{"error":{"message":"x"}}"#), None);
        assert_eq!(oauth_error_code("not json"), None);
    }
}
