//! Shared HTTP plumbing for remote adapters.
//!
//! Maps transport failures and status codes onto [`ProviderError`] kinds so
//! every HTTP adapter classifies failures identically.

use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::OnceLock;
use std::time::Duration;

use super::ProviderError;

/// Process-wide client; per-request timeouts are set on each call.
pub(crate) fn client() -> &'static Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new())
    })
}

/// Classify a failed `send()`.
pub(crate) fn send_error(error: reqwest::Error, timeout: Duration) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::Unavailable(error.to_string())
    }
}

/// Pass successful responses through; classify the rest.
pub(crate) async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, retry_after, body))
}

pub(crate) fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: String,
) -> ProviderError {
    let message = format!("HTTP {}: {}", status.as_u16(), truncate(&body, 200));
    match status.as_u16() {
        401 | 403 => ProviderError::AuthFailure(message),
        429 => ProviderError::RateLimited { retry_after },
        408 | 500..=599 => ProviderError::Unavailable(message),
        // Other client errors will not succeed on retry.
        _ => ProviderError::MalformedResponse(message),
    }
}

/// Decode a JSON body.
pub(crate) async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))
}

/// Reject empty completions.
pub(crate) fn non_empty(content: String) -> Result<String, ProviderError> {
    if content.trim().is_empty() {
        Err(ProviderError::MalformedResponse(
            "response contained no text".to_string(),
        ))
    } else {
        Ok(content)
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let classify = |code: u16| {
            classify_status(StatusCode::from_u16(code).unwrap(), None, String::new())
        };
        assert!(matches!(classify(401), ProviderError::AuthFailure(_)));
        assert!(matches!(classify(403), ProviderError::AuthFailure(_)));
        assert!(matches!(classify(429), ProviderError::RateLimited { .. }));
        assert!(matches!(classify(408), ProviderError::Unavailable(_)));
        assert!(matches!(classify(503), ProviderError::Unavailable(_)));
        assert!(matches!(classify(400), ProviderError::MalformedResponse(_)));
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", "7".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));
        assert_eq!(retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn test_empty_content_rejected() {
        assert!(non_empty("  ".to_string()).is_err());
        assert_eq!(non_empty("ok".to_string()).unwrap(), "ok");
    }
}
