use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Store-level errors surfaced by digest and query operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A digest was attempted with no harvested articles. Rejected without
    /// mutation so a transient empty parse cannot wipe abandonment tracking.
    #[error("refusing to digest an empty harvest")]
    EmptyHarvest,

    /// Another instance of the application has locked the database
    #[error("another instance appears to be running; close it and try again")]
    InstanceLocked,

    /// Migration failed
    #[error("database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Enclosure list could not be encoded/decoded
    #[error("enclosure serialization error: {0}")]
    Enclosures(#[from] serde_json::Error),
}

impl StoreError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return StoreError::InstanceLocked;
        }

        StoreError::Database(err)
    }
}

// ============================================================================
// Harvest Input
// ============================================================================

/// One article as handed to the store by a harvest, already normalized by the
/// feed parser but not yet reconciled against existing records.
#[derive(Debug, Clone)]
pub struct HarvestedArticle {
    /// Feed-provided GUID; `None` or empty means "identify by link"
    pub guid: Option<String>,
    pub link: String,
    pub title: String,
    /// Article body/description as given by the feed
    pub content: Option<String>,
    /// Publish time in ms since epoch; `None` pins to first-observation time
    pub pub_time: Option<i64>,
    pub enclosures: Vec<Enclosure>,
}

impl HarvestedArticle {
    /// Stable identity: the feed-provided GUID, or the link when absent.
    /// Immutable once a record is created.
    pub fn identity(&self) -> &str {
        match self.guid.as_deref() {
            Some(guid) if !guid.is_empty() => guid,
            _ => &self.link,
        }
    }
}

/// Attached media, restricted to audio at ingestion time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    pub url: String,
    #[serde(rename = "type")]
    pub mime_type: String,
}

impl Enclosure {
    /// Only audio enclosures with a URL survive ingestion.
    pub fn is_audio(&self) -> bool {
        !self.url.is_empty() && self.mime_type == "audio/mpeg"
    }
}

// ============================================================================
// Stored Records
// ============================================================================

/// Article record owned by the store.
///
/// `guid` is unique across the whole store, not just within a feed;
/// reconciliation and lookups key off it globally. `pub_time` is set once
/// (feed-provided date or first-observation wall clock) and never recomputed,
/// so sort order is stable across runs.
#[derive(Debug, Clone)]
pub struct Article {
    pub id: i64,
    pub feed_url: String,
    pub guid: String,
    pub link: String,
    pub title: String,
    pub content: Option<String>,
    pub pub_time: i64,
    pub is_read: bool,
    pub is_abandoned: bool,
    /// Tag ids attached to this article (unordered, unique)
    pub tags: Vec<i64>,
    pub enclosures: Vec<Enclosure>,
}

/// Internal row type for article queries (used by sqlx FromRow).
/// Converts to [`Article`] via `into_article()` which decodes the enclosure
/// JSON column; tags are attached separately by the query layer.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub id: i64,
    pub feed_url: String,
    pub guid: String,
    pub link: String,
    pub title: String,
    pub content: Option<String>,
    pub pub_time: i64,
    pub is_read: bool,
    pub is_abandoned: bool,
    pub enclosures: Option<String>,
}

impl ArticleDbRow {
    pub(crate) fn into_article(self) -> Article {
        let enclosures = self
            .enclosures
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default();
        Article {
            id: self.id,
            feed_url: self.feed_url,
            guid: self.guid,
            link: self.link,
            title: self.title,
            content: self.content,
            pub_time: self.pub_time,
            is_read: self.is_read,
            is_abandoned: self.is_abandoned,
            tags: Vec::new(),
            enclosures,
        }
    }
}

/// Tag definition. Names are deduplicated on add (case-sensitive exact
/// match), so `add_tag` with an existing name returns the existing row.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

/// Feed record persisted for the catalog: `url` is the primary key the whole
/// core keys against. `average_activity` (whole hours between publications,
/// 0 = very active/unknown) is written back by the scheduler.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FeedRecord {
    pub url: String,
    pub title: String,
    pub site_url: Option<String>,
    pub category: Option<String>,
    pub average_activity: i64,
    pub added_at: i64,
    #[sqlx(skip)]
    pub unread_count: i64,
}

// ============================================================================
// Query Results
// ============================================================================

/// What a digest did to the store, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DigestOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub abandoned: usize,
}

/// One page of filtered articles plus unread bookkeeping over the *full*
/// filtered result, so the UI can report "N unread above/below this page"
/// without a second query.
#[derive(Debug)]
pub struct ArticlePage {
    /// The `[from, to)` slice of the sorted, filtered result
    pub articles: Vec<Article>,
    /// Total article count matching the filter (not just this page)
    pub num_all: i64,
    /// Unread articles at index < `from`
    pub unread_before: i64,
    /// Unread articles at index >= `to`
    pub unread_after: i64,
}
