use std::time::Duration;

use thiserror::Error;

use crate::feed::parser::{parse_feed, ParseResult};
use crate::fetch::client::{fetch_bytes, FetchError};

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(20);

/// A feed endpoint resolved from a user-entered URL.
#[derive(Debug, Clone)]
pub struct DiscoveredFeed {
    /// URL of the machine-readable feed itself
    pub feed_url: String,
    /// Feed title as the document declares it
    pub title: String,
    /// The feed's site link, if advertised
    pub site_url: Option<String>,
}

/// Discovery failures, discriminated so the caller can render different
/// guidance for "that address does not exist" vs. "there is no feed there".
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The page exists but neither it nor any advertised `<link>` parses as
    /// a feed
    #[error("no feed found")]
    NoFeed,
    /// HTTP 404 from the seed URL or the advertised feed link
    #[error("not found (404)")]
    NotFound,
    /// Hostname did not resolve
    #[error("host not found")]
    DnsNotFound,
    /// Request exceeded the discovery timeout
    #[error("request timed out")]
    Timeout,
    /// Any other network failure
    #[error("network error: {0}")]
    Network(String),
}

impl From<FetchError> for DiscoveryError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotFound => DiscoveryError::NotFound,
            FetchError::Timeout => DiscoveryError::Timeout,
            FetchError::DnsNotFound => DiscoveryError::DnsNotFound,
            other => DiscoveryError::Network(other.to_string()),
        }
    }
}

/// Find the actual feed endpoint behind a user-entered URL or bare domain.
///
/// The input gets `http://` prepended when it has no scheme. The URL is
/// fetched and parsed directly as a feed; failing that, the body is treated
/// as HTML and scanned for a `<link type="application/rss+xml">` or
/// `<link type="application/atom+xml">` element whose `href` (resolved
/// against the original URL) is fetched and must itself parse as a feed.
pub async fn discover_feed(
    client: &reqwest::Client,
    input: &str,
) -> Result<DiscoveredFeed, DiscoveryError> {
    let seed_url = normalize_input(input);

    let bytes = fetch_bytes(client, &seed_url, DISCOVERY_TIMEOUT).await?;

    // A direct feed URL is the common case
    if let Ok(parsed) = parse_feed(&bytes) {
        return Ok(discovered(seed_url, parsed));
    }

    // Not a feed: treat the body as HTML and look for an advertised feed link
    let html = String::from_utf8_lossy(&bytes);
    let candidate = find_feed_link_in_html(&html, &seed_url).ok_or(DiscoveryError::NoFeed)?;

    let bytes = fetch_bytes(client, &candidate, DISCOVERY_TIMEOUT).await?;
    match parse_feed(&bytes) {
        Ok(parsed) => Ok(discovered(candidate, parsed)),
        Err(_) => Err(DiscoveryError::NoFeed),
    }
}

fn discovered(feed_url: String, parsed: ParseResult) -> DiscoveredFeed {
    let site_url = parsed
        .document
        .meta
        .link
        .filter(|link| link != &feed_url);
    DiscoveredFeed {
        feed_url,
        title: parsed.document.meta.title,
        site_url,
    }
}

/// Prepend a scheme when the user typed a bare domain.
fn normalize_input(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

// ============================================================================
// HTML Link Sniffing
// ============================================================================

/// Scan HTML for a `<link>` tag with an RSS/Atom type attribute and return
/// its `href` resolved against the page URL.
///
/// Simple string scanning, no HTML parser dependency; handles attribute
/// ordering variations and both quote styles.
fn find_feed_link_in_html(html: &str, base_url: &str) -> Option<String> {
    let html_lower = html.to_lowercase();
    let mut search_from = 0;

    while let Some(link_start) = html_lower[search_from..].find("<link") {
        let abs_start = search_from + link_start;
        let remaining = &html_lower[abs_start..];

        let tag_end = match remaining.find('>') {
            Some(pos) => pos,
            None => break,
        };
        let tag = &remaining[..=tag_end];

        if is_feed_type(tag) {
            // Extract href from the original (non-lowered) HTML to preserve
            // URL case
            let original_tag = &html[abs_start..abs_start + tag_end + 1];
            if let Some(href) = extract_attr_value(original_tag, "href") {
                return Some(resolve_url(href, base_url));
            }
        }

        search_from = abs_start + tag_end + 1;
    }

    None
}

/// Checks if a lowercased `<link>` tag has an RSS or Atom feed type.
fn is_feed_type(tag: &str) -> bool {
    tag.contains("application/rss+xml") || tag.contains("application/atom+xml")
}

/// Extracts the value of an attribute from a tag string (case-preserving).
fn extract_attr_value<'a>(tag: &'a str, attr_name: &str) -> Option<&'a str> {
    let tag_lower = tag.to_lowercase();
    let attr_prefix = format!("{attr_name}=");

    let attr_start = tag_lower.find(&attr_prefix)?;
    let value_start = attr_start + attr_prefix.len();

    if value_start >= tag.len() {
        return None;
    }

    let rest = &tag[value_start..];
    let quote = rest.as_bytes().first()?;
    if *quote != b'"' && *quote != b'\'' {
        return None;
    }

    let quote_char = *quote as char;
    let inner = &rest[1..];
    let end = inner.find(quote_char)?;

    Some(&inner[..end])
}

/// Resolves a potentially relative URL against a base URL.
fn resolve_url(href: &str, base_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_owned();
    }

    // Protocol-relative: normalize through the URL parser
    if href.starts_with("//") {
        let with_scheme = format!("https:{}", href);
        if let Ok(parsed) = url::Url::parse(&with_scheme) {
            return parsed.to_string();
        }
    }

    if let Ok(base) = url::Url::parse(base_url) {
        if let Ok(resolved) = base.join(href) {
            return resolved.to_string();
        }
    }

    href.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example Blog</title>
    <link>https://example.com</link>
    <item><guid>1</guid><title>Post</title><link>https://example.com/1</link></item>
  </channel>
</rss>"#;

    #[test]
    fn test_normalize_bare_domain() {
        assert_eq!(normalize_input("example.com"), "http://example.com");
        assert_eq!(
            normalize_input("https://example.com/feed"),
            "https://example.com/feed"
        );
        assert_eq!(normalize_input("  example.com  "), "http://example.com");
    }

    #[test]
    fn test_find_rss_link() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/rss+xml" href="/feed.xml" title="RSS">
        </head><body></body></html>"#;
        assert_eq!(
            find_feed_link_in_html(html, "https://example.com"),
            Some("https://example.com/feed.xml".to_owned())
        );
    }

    #[test]
    fn test_find_atom_link_reversed_attrs() {
        let html = r#"<html><head>
            <link href="https://example.com/atom.xml" type="application/atom+xml">
        </head><body></body></html>"#;
        assert_eq!(
            find_feed_link_in_html(html, "https://example.com"),
            Some("https://example.com/atom.xml".to_owned())
        );
    }

    #[test]
    fn test_find_feed_link_single_quotes() {
        let html = "<html><head><link type='application/rss+xml' href='/rss'></head></html>";
        assert_eq!(
            find_feed_link_in_html(html, "https://example.com"),
            Some("https://example.com/rss".to_owned())
        );
    }

    #[test]
    fn test_no_feed_link_in_html() {
        let html = r#"<html><head><link rel="stylesheet" href="/style.css"></head></html>"#;
        assert_eq!(find_feed_link_in_html(html, "https://example.com"), None);
    }

    #[test]
    fn test_resolve_urls() {
        assert_eq!(
            resolve_url("/feed.xml", "https://example.com/page"),
            "https://example.com/feed.xml"
        );
        assert_eq!(
            resolve_url("feed.xml", "https://example.com/blog/"),
            "https://example.com/blog/feed.xml"
        );
        assert_eq!(
            resolve_url("//cdn.example.com/feed", "https://example.com"),
            "https://cdn.example.com/feed"
        );
        assert_eq!(
            resolve_url("https://other.com/feed", "https://example.com"),
            "https://other.com/feed"
        );
    }

    // --- wiremock integration ---

    #[tokio::test]
    async fn test_discover_direct_feed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/feed.xml", server.uri());
        let feed = discover_feed(&client, &url).await.unwrap();
        assert_eq!(feed.feed_url, url);
        assert_eq!(feed.title, "Example Blog");
        assert!(feed.site_url.is_some());
    }

    #[tokio::test]
    async fn test_discover_via_html_link() {
        let server = MockServer::start().await;
        let html = format!(
            r#"<html><head>
                <link rel="alternate" type="application/rss+xml" href="{}/found.xml">
            </head><body>blog</body></html>"#,
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/found.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let feed = discover_feed(&client, &server.uri()).await.unwrap();
        assert_eq!(feed.feed_url, format!("{}/found.xml", server.uri()));
        assert_eq!(feed.title, "Example Blog");
    }

    #[tokio::test]
    async fn test_discover_relative_html_link() {
        let server = MockServer::start().await;
        let html = r#"<html><head>
            <link rel="alternate" type="application/rss+xml" href="/found.xml">
        </head></html>"#;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/found.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let feed = discover_feed(&client, &server.uri()).await.unwrap();
        assert_eq!(feed.feed_url, format!("{}/found.xml", server.uri()));
    }

    #[tokio::test]
    async fn test_discover_no_feed_anywhere() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<html><body>nothing here</body></html>"),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = discover_feed(&client, &server.uri()).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::NoFeed));
    }

    #[tokio::test]
    async fn test_discover_candidate_that_is_not_a_feed() {
        let server = MockServer::start().await;
        let html = r#"<html><head>
            <link type="application/rss+xml" href="/lies.xml">
        </head></html>"#;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/lies.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not xml</html>"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = discover_feed(&client, &server.uri()).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::NoFeed));
    }

    #[tokio::test]
    async fn test_discover_404_is_distinct() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = discover_feed(&client, &format!("{}/gone", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NotFound));
    }
}
