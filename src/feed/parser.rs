use std::borrow::Cow;

use thiserror::Error;

/// Errors from feed parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Input is not RSS/Atom (HTML, garbage, truncated XML). Distinguishable
    /// so discovery can fall back to HTML link sniffing.
    #[error("not a feed: {0}")]
    NotAFeed(String),
}

/// Feed-level metadata extracted from the document.
#[derive(Debug, Clone)]
pub struct FeedMeta {
    pub title: String,
    /// The feed's own site link, if it advertises one
    pub link: Option<String>,
}

/// One enclosure as the feed declares it; filtering to audio happens at
/// ingestion, not here.
#[derive(Debug, Clone)]
pub struct RawEnclosure {
    pub url: String,
    pub mime_type: String,
}

/// One article as parsed from the document, before reconciliation.
#[derive(Debug, Clone)]
pub struct RawArticle {
    pub title: String,
    /// Body/description text as given by the feed
    pub description: Option<String>,
    pub link: String,
    /// Feed-provided GUID; `None` means "identify by link"
    pub guid: Option<String>,
    /// Publish time in ms since epoch
    pub pub_date: Option<i64>,
    pub enclosures: Vec<RawEnclosure>,
}

/// Normalized feed document: metadata plus articles in feed order
/// (assumed newest-first, as feeds conventionally emit them).
#[derive(Debug, Clone)]
pub struct FeedDocument {
    pub meta: FeedMeta,
    pub articles: Vec<RawArticle>,
}

/// Result of parsing, with a count of entries dropped for having neither
/// a guid nor a link (nothing to key identity on).
#[derive(Debug)]
pub struct ParseResult {
    pub document: FeedDocument,
    pub skipped: usize,
}

/// Parse raw feed bytes into a normalized document.
///
/// Character encoding is normalized first: when the XML declaration names an
/// encoding other than UTF-8, the body is decoded to UTF-8 before parsing.
/// An unsupported declared encoding falls back silently to the raw bytes.
pub fn parse_feed(bytes: &[u8]) -> Result<ParseResult, ParseError> {
    let bytes = normalize_encoding(bytes);
    let feed =
        feed_rs::parser::parse(bytes.as_ref()).map_err(|e| ParseError::NotAFeed(e.to_string()))?;

    let meta = FeedMeta {
        title: feed
            .title
            .map(|t| t.content)
            .unwrap_or_else(|| "Untitled Feed".to_string()),
        link: feed.links.first().map(|l| l.href.clone()),
    };

    let mut skipped = 0;
    let articles = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let link = entry.links.first().map(|l| l.href.clone());
            let guid = if entry.id.trim().is_empty() {
                None
            } else {
                Some(entry.id.trim().to_string())
            };

            // Identity needs a guid or a link; an entry with neither cannot
            // be reconciled and is dropped.
            let link = match (link, &guid) {
                (Some(link), _) => link,
                (None, Some(_)) => String::new(),
                (None, None) => {
                    skipped += 1;
                    return None;
                }
            };

            let pub_date = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.timestamp_millis());
            let description = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body));
            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string());

            let enclosures = entry
                .media
                .iter()
                .flat_map(|media| media.content.iter())
                .filter_map(|content| {
                    let url = content.url.as_ref()?.to_string();
                    let mime_type = content
                        .content_type
                        .as_ref()
                        .map(|mime| mime.essence().to_string())
                        .unwrap_or_default();
                    Some(RawEnclosure { url, mime_type })
                })
                .collect();

            Some(RawArticle {
                title,
                description,
                link,
                guid,
                pub_date,
                enclosures,
            })
        })
        .collect();

    Ok(ParseResult {
        document: FeedDocument { meta, articles },
        skipped,
    })
}

// ============================================================================
// Encoding Normalization
// ============================================================================

/// Decode the document to UTF-8 when its XML declaration names another
/// encoding. The declaration is rewritten to utf-8 so the XML parser does
/// not re-apply the original label to already-decoded text.
fn normalize_encoding(bytes: &[u8]) -> Cow<'_, [u8]> {
    let Some(label) = declared_encoding(bytes) else {
        return Cow::Borrowed(bytes);
    };
    if label.eq_ignore_ascii_case("utf-8") || label.eq_ignore_ascii_case("utf8") {
        return Cow::Borrowed(bytes);
    }
    let Some(encoding) = encoding_rs::Encoding::for_label(label.as_bytes()) else {
        tracing::debug!(encoding = %label, "unsupported declared encoding, using raw bytes");
        return Cow::Borrowed(bytes);
    };

    let (decoded, _, _) = encoding.decode(bytes);
    let double_quoted = format!("encoding=\"{label}\"");
    let single_quoted = format!("encoding='{label}'");
    let rewritten = if decoded.contains(&double_quoted) {
        decoded.replacen(&double_quoted, "encoding=\"utf-8\"", 1)
    } else {
        decoded.replacen(&single_quoted, "encoding='utf-8'", 1)
    };
    Cow::Owned(rewritten.into_bytes())
}

/// Pull the encoding label out of the XML declaration, if any. Labels are
/// ASCII, so a lossy byte-level scan of the document head is safe for every
/// ASCII-superset encoding.
fn declared_encoding(bytes: &[u8]) -> Option<String> {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(256)]);
    let decl_start = head.find("<?xml")?;
    let decl_end = head[decl_start..].find("?>")? + decl_start;
    let decl = &head[decl_start..decl_end];

    let attr = decl.find("encoding")?;
    let rest = decl[attr + "encoding".len()..].trim_start();
    let rest = rest.strip_prefix('=')?.trim_start();
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let inner = &rest[1..];
    let end = inner.find(quote)?;
    Some(inner[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example Blog</title>
    <link>https://example.com</link>
    <item>
      <guid>post-1</guid>
      <title>First Post</title>
      <link>https://example.com/post/1</link>
      <description>Body one</description>
      <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
    </item>
    <item>
      <title>No Guid</title>
      <link>https://example.com/post/2</link>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example Atom</title>
  <link href="https://example.com"/>
  <entry>
    <id>atom-1</id>
    <title>Atom Post</title>
    <link href="https://example.com/atom/1"/>
    <updated>2024-01-01T00:00:00Z</updated>
    <summary>Atom body</summary>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss() {
        let result = parse_feed(RSS.as_bytes()).unwrap();
        let doc = result.document;
        assert_eq!(doc.meta.title, "Example Blog");
        assert_eq!(doc.articles.len(), 2);

        let first = &doc.articles[0];
        assert_eq!(first.guid.as_deref(), Some("post-1"));
        assert_eq!(first.link, "https://example.com/post/1");
        assert_eq!(first.description.as_deref(), Some("Body one"));
        assert_eq!(first.pub_date, Some(1_704_067_200_000));

        let second = &doc.articles[1];
        assert_eq!(second.guid, None, "guid-less entry identified by link");
        assert_eq!(second.pub_date, None);
    }

    #[test]
    fn test_parse_atom() {
        let result = parse_feed(ATOM.as_bytes()).unwrap();
        let doc = result.document;
        assert_eq!(doc.meta.title, "Example Atom");
        assert_eq!(doc.articles.len(), 1);
        assert_eq!(doc.articles[0].guid.as_deref(), Some("atom-1"));
        assert_eq!(doc.articles[0].description.as_deref(), Some("Atom body"));
        // Atom has no pubDate; updated fills in
        assert_eq!(doc.articles[0].pub_date, Some(1_704_067_200_000));
    }

    #[test]
    fn test_parse_not_a_feed() {
        let result = parse_feed(b"<html><body>nope</body></html>");
        assert!(matches!(result, Err(ParseError::NotAFeed(_))));
    }

    #[test]
    fn test_parse_enclosures_passed_through() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Pod</title>
  <item>
    <guid>ep-1</guid>
    <title>Episode 1</title>
    <link>https://pod.example/1</link>
    <enclosure url="https://cdn.example/1.mp3" type="audio/mpeg" length="123"/>
  </item>
</channel></rss>"#;
        let result = parse_feed(rss.as_bytes()).unwrap();
        let enclosures = &result.document.articles[0].enclosures;
        assert_eq!(enclosures.len(), 1);
        assert_eq!(enclosures[0].url, "https://cdn.example/1.mp3");
        assert_eq!(enclosures[0].mime_type, "audio/mpeg");
    }

    #[test]
    fn test_parse_latin1_declaration() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"<?xml version=\"1.0\" encoding=\"iso-8859-1\"?>\n");
        bytes.extend_from_slice(b"<rss version=\"2.0\"><channel><title>Caf\xe9</title>");
        bytes.extend_from_slice(
            b"<item><guid>1</guid><title>Entr\xe9e</title><link>https://x.example/1</link></item>",
        );
        bytes.extend_from_slice(b"</channel></rss>");

        let result = parse_feed(&bytes).unwrap();
        assert_eq!(result.document.meta.title, "Caf\u{e9}");
        assert_eq!(result.document.articles[0].title, "Entr\u{e9}e");
    }

    #[test]
    fn test_unknown_declared_encoding_falls_back() {
        let rss = r#"<?xml version="1.0" encoding="x-no-such-encoding"?>
<rss version="2.0"><channel><title>Plain</title>
  <item><guid>1</guid><title>Post</title><link>https://x.example/1</link></item>
</channel></rss>"#;
        let result = parse_feed(rss.as_bytes()).unwrap();
        assert_eq!(result.document.meta.title, "Plain");
    }

    #[test]
    fn test_declared_encoding_extraction() {
        assert_eq!(
            declared_encoding(b"<?xml version=\"1.0\" encoding=\"windows-1252\"?><rss/>"),
            Some("windows-1252".to_string())
        );
        assert_eq!(
            declared_encoding(b"<?xml version='1.0' encoding='utf-8'?><rss/>"),
            Some("utf-8".to_string())
        );
        assert_eq!(declared_encoding(b"<?xml version=\"1.0\"?><rss/>"), None);
        assert_eq!(declared_encoding(b"<rss/>"), None);
    }
}
