//! In-memory feed catalog keyed by feed URL.
//!
//! The catalog is the identity authority the rest of the core keys against:
//! feed URL is the primary key, and `average_activity` is the one scalar the
//! scheduler writes back. Changes are announced on a typed broadcast channel
//! so listeners (unread totals, persistence) can react without the catalog
//! knowing about them.

use std::collections::HashMap;

use tokio::sync::{broadcast, RwLock};

use crate::storage::{Database, FeedRecord, StoreError};

/// Typed change notifications emitted by the catalog.
#[derive(Debug, Clone)]
pub enum CatalogEvent {
    FeedAdded { url: String },
    FeedRemoved { url: String },
    /// Metadata of an existing feed changed (title refresh, activity update)
    ModelChanged,
}

pub struct FeedCatalog {
    db: Database,
    feeds: RwLock<HashMap<String, FeedRecord>>,
    events: broadcast::Sender<CatalogEvent>,
}

impl FeedCatalog {
    /// Build the catalog from the persisted feed rows.
    pub async fn load(db: Database) -> Result<Self, StoreError> {
        let rows = db.get_feeds_with_unread_counts().await?;
        let feeds = rows
            .into_iter()
            .map(|record| (record.url.clone(), record))
            .collect();
        let (events, _) = broadcast::channel(16);
        Ok(Self {
            db,
            feeds: RwLock::new(feeds),
            events,
        })
    }

    /// Subscribe to catalog change events. Each receiver sees every event
    /// emitted after the call.
    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: CatalogEvent) {
        // No receivers is fine; events are best-effort notifications.
        let _ = self.events.send(event);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get_feed_by_url(&self, url: &str) -> Option<FeedRecord> {
        self.feeds.read().await.get(url).cloned()
    }

    pub async fn feed_urls(&self) -> Vec<String> {
        self.feeds.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.feeds.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.feeds.read().await.is_empty()
    }

    /// `(url, average_activity)` pairs for basket computation.
    pub async fn activity_snapshot(&self) -> Vec<(String, i64)> {
        self.feeds
            .read()
            .await
            .values()
            .map(|f| (f.url.clone(), f.average_activity))
            .collect()
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Subscribe to a feed (or refresh an existing subscription's metadata).
    pub async fn add_feed(&self, record: FeedRecord) -> Result<(), StoreError> {
        self.db.upsert_feed(&record).await?;
        let url = record.url.clone();
        let existed = self
            .feeds
            .write()
            .await
            .insert(url.clone(), record)
            .is_some();
        if existed {
            self.emit(CatalogEvent::ModelChanged);
        } else {
            self.emit(CatalogEvent::FeedAdded { url });
        }
        Ok(())
    }

    /// Unsubscribe. Cascades: every article of the feed is deleted from the
    /// store unconditionally.
    pub async fn remove_feed(&self, url: &str) -> Result<bool, StoreError> {
        let existed = self.db.delete_feed(url).await?;
        self.db.remove_all_for_feed(url).await?;
        self.feeds.write().await.remove(url);
        if existed {
            self.emit(CatalogEvent::FeedRemoved {
                url: url.to_string(),
            });
        }
        Ok(existed)
    }

    /// Write back the scheduler's estimated publication cadence for a feed,
    /// both in memory and in the persisted row.
    pub async fn set_average_activity(&self, url: &str, hours: i64) -> Result<(), StoreError> {
        self.db.set_average_activity(url, hours).await?;
        if let Some(feed) = self.feeds.write().await.get_mut(url) {
            feed.average_activity = hours;
        }
        self.emit(CatalogEvent::ModelChanged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::HarvestedArticle;

    fn record(url: &str, title: &str) -> FeedRecord {
        FeedRecord {
            url: url.to_string(),
            title: title.to_string(),
            site_url: None,
            category: None,
            average_activity: 0,
            added_at: 0,
            unread_count: 0,
        }
    }

    async fn catalog() -> FeedCatalog {
        let db = Database::open(":memory:").await.unwrap();
        FeedCatalog::load(db).await.unwrap()
    }

    #[tokio::test]
    async fn test_add_and_lookup() {
        let cat = catalog().await;
        cat.add_feed(record("https://a.example/rss", "A"))
            .await
            .unwrap();

        let feed = cat.get_feed_by_url("https://a.example/rss").await.unwrap();
        assert_eq!(feed.title, "A");
        assert_eq!(cat.len().await, 1);
    }

    #[tokio::test]
    async fn test_events_on_add_remove() {
        let cat = catalog().await;
        let mut rx = cat.subscribe();

        cat.add_feed(record("https://a.example/rss", "A"))
            .await
            .unwrap();
        cat.remove_feed("https://a.example/rss").await.unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            CatalogEvent::FeedAdded { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            CatalogEvent::FeedRemoved { .. }
        ));
    }

    #[tokio::test]
    async fn test_remove_cascades_articles() {
        let db = Database::open(":memory:").await.unwrap();
        let cat = FeedCatalog::load(db.clone()).await.unwrap();
        cat.add_feed(record("https://a.example/rss", "A"))
            .await
            .unwrap();

        db.digest(
            "https://a.example/rss",
            &[HarvestedArticle {
                guid: None,
                link: "l1".to_string(),
                title: "t".to_string(),
                content: None,
                pub_time: Some(1),
                enclosures: Vec::new(),
            }],
        )
        .await
        .unwrap();

        assert!(cat.remove_feed("https://a.example/rss").await.unwrap());
        assert!(db.get_article("l1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_activity_write_back_persists() {
        let db = Database::open(":memory:").await.unwrap();
        let cat = FeedCatalog::load(db.clone()).await.unwrap();
        cat.add_feed(record("https://a.example/rss", "A"))
            .await
            .unwrap();

        cat.set_average_activity("https://a.example/rss", 7)
            .await
            .unwrap();

        let snapshot = cat.activity_snapshot().await;
        assert_eq!(snapshot, vec![("https://a.example/rss".to_string(), 7)]);

        // Survives a catalog rebuild from the same database
        let reloaded = FeedCatalog::load(db).await.unwrap();
        let feed = reloaded
            .get_feed_by_url("https://a.example/rss")
            .await
            .unwrap();
        assert_eq!(feed.average_activity, 7);
    }
}
