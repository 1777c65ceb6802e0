use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;

/// User agent sent with every request, as feeds commonly require one.
const USER_AGENT: &str = concat!("gleaner/", env!("CARGO_PKG_VERSION"));

/// Response bodies are capped to keep a hostile feed from exhausting memory.
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Failure kinds a fetch can surface. Callers discriminate: a 404 is an
/// individually-broken feed, a DNS miss gets its own user guidance, and
/// everything else counts toward the scheduler's connection-error streak.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Explicit HTTP 404
    #[error("not found (404)")]
    NotFound,
    /// Request exceeded its deadline
    #[error("request timed out")]
    Timeout,
    /// Hostname did not resolve
    #[error("host not found")]
    DnsNotFound,
    /// Non-2xx HTTP response other than 404
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the size cap
    #[error("response too large")]
    TooLarge,
    /// Any other network-level failure (connect, TLS, reset, ...)
    #[error("connection error: {0}")]
    Connection(String),
}

impl FetchError {
    /// Anything except an explicit 404 counts as a connection-class outcome
    /// for the scheduler's escalation streak.
    pub fn is_connection_class(&self) -> bool {
        !matches!(self, FetchError::NotFound)
    }
}

/// Build the shared HTTP client: identifying user agent, transparent
/// gzip/deflate decompression, rustls.
pub fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .gzip(true)
        .deflate(true)
        .build()
        // Builder only fails on TLS backend misconfiguration, which is a
        // startup-time programming error.
        .unwrap_or_default()
}

/// Fetch a URL's body with a deadline and a streamed size cap.
pub async fn fetch_bytes(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<Vec<u8>, FetchError> {
    let response = tokio::time::timeout(timeout, client.get(url).send())
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(classify)?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(FetchError::NotFound);
    }
    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    // Fast path: Content-Length already over the cap
    if let Some(len) = response.content_length() {
        if len as usize > MAX_BODY_SIZE {
            return Err(FetchError::TooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    let read = async {
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(classify)?;
            if bytes.len().saturating_add(chunk.len()) > MAX_BODY_SIZE {
                return Err(FetchError::TooLarge);
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(())
    };
    tokio::time::timeout(timeout, read)
        .await
        .map_err(|_| FetchError::Timeout)??;

    Ok(bytes)
}

/// Map a reqwest error onto the fetch taxonomy. DNS failures are buried in
/// the error source chain, so this walks it looking for resolver wording —
/// the same pragmatic matching the store uses for SQLite lock errors.
fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::Timeout;
    }

    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&err);
    while let Some(cause) = source {
        let text = cause.to_string().to_lowercase();
        if text.contains("dns error")
            || text.contains("failed to lookup address")
            || text.contains("name or service not known")
            || text.contains("no record found")
        {
            return FetchError::DnsNotFound;
        }
        source = cause.source();
    }

    FetchError::Connection(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let client = build_client();
        let bytes = fetch_bytes(&client, &server.uri(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn test_fetch_404_is_distinct() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = build_client();
        let err = fetch_bytes(&client, &server.uri(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NotFound));
        assert!(!err.is_connection_class());
    }

    #[tokio::test]
    async fn test_fetch_500_is_connection_class() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = build_client();
        let err = fetch_bytes(&client, &server.uri(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus(500)));
        assert!(err.is_connection_class());
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let client = build_client();
        let err = fetch_bytes(&client, &server.uri(), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout));
    }

    #[tokio::test]
    async fn test_fetch_oversized_body_rejected() {
        let server = MockServer::start().await;
        let body = vec![b'x'; MAX_BODY_SIZE + 1];
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&server)
            .await;

        let client = build_client();
        let err = fetch_bytes(&client, &server.uri(), Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::TooLarge));
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_dns() {
        let client = build_client();
        let err = fetch_bytes(
            &client,
            "http://no-such-host.invalid/feed",
            Duration::from_secs(10),
        )
        .await
        .unwrap_err();
        assert!(
            matches!(err, FetchError::DnsNotFound | FetchError::Connection(_)),
            "resolver failure should classify as DNS (or connection on odd platforms), got {err:?}"
        );
    }
}
