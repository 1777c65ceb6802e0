use super::schema::Database;
use super::types::{FeedRecord, StoreError};

/// Row type for the feed + unread count join
type FeedRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    i64,
    i64,
    i64,
);

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Insert or refresh a feed row. The URL is the identity; a re-add of a
    /// known URL updates presentation fields and leaves activity data alone.
    pub async fn upsert_feed(&self, feed: &FeedRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO feeds (url, title, site_url, category, average_activity, added_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                site_url = excluded.site_url,
                category = excluded.category
        "#,
        )
        .bind(&feed.url)
        .bind(&feed.title)
        .bind(&feed.site_url)
        .bind(&feed.category)
        .bind(feed.average_activity)
        .bind(feed.added_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a single feed by its URL.
    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<FeedRecord>, StoreError> {
        let row = sqlx::query_as::<_, FeedRecord>(
            r#"
            SELECT url, title, site_url, category, average_activity, added_at
            FROM feeds
            WHERE url = ?
        "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// All feeds with their unread article counts, ordered by title.
    pub async fn get_feeds_with_unread_counts(&self) -> Result<Vec<FeedRecord>, StoreError> {
        let rows: Vec<FeedRow> = sqlx::query_as(
            r#"
            SELECT
                f.url, f.title, f.site_url, f.category, f.average_activity, f.added_at,
                COUNT(CASE WHEN a.is_read = 0 THEN 1 END) as unread_count
            FROM feeds f
            LEFT JOIN articles a ON f.url = a.feed_url
            GROUP BY f.url
            ORDER BY f.title
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let feeds = rows
            .into_iter()
            .map(
                |(url, title, site_url, category, average_activity, added_at, unread_count)| {
                    FeedRecord {
                        url,
                        title,
                        site_url,
                        category,
                        average_activity,
                        added_at,
                        unread_count,
                    }
                },
            )
            .collect();

        Ok(feeds)
    }

    /// Persist the scheduler's estimated hours-between-publications for a feed.
    pub async fn set_average_activity(&self, url: &str, hours: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE feeds SET average_activity = ? WHERE url = ?")
            .bind(hours)
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a feed row. Articles are cascaded separately via
    /// [`Database::remove_all_for_feed`] (the store does not own feed
    /// lifecycle, only the article side of the cascade).
    pub async fn delete_feed(&self, url: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM feeds WHERE url = ?")
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
