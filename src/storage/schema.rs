use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use tokio::sync::Mutex;

use super::types::StoreError;

// ============================================================================
// Database
// ============================================================================

/// Shared handle to the article store. Cloning is cheap (pool + lock handles).
///
/// Digest is a read-modify-write over a working set keyed by feed + guid, so
/// at most one digest may run at a time; `digest_gate` serializes them in
/// FIFO order (tokio's `Mutex` is queue-fair). Read queries are deliberately
/// *not* serialized against digests — reading mid-digest is an accepted
/// trade-off of the design, not a bug.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    pub(crate) digest_gate: Arc<Mutex<()>>,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InstanceLocked` if another instance has the
    /// database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `StoreError::Migration` or `StoreError::Database` otherwise.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: wait up to 5s for locks before SQLITE_BUSY.
        // foreign_keys must be set per-connection; pragma() on the options
        // ensures every pooled connection inherits both.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StoreError::from_sqlx)?
            .pragma("busy_timeout", "5000")
            .pragma("foreign_keys", "ON");

        // SQLite is single-writer; 5 connections covers the peak concurrent
        // readers (fetch wave digests + catalog queries + CLI output).
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;

        let db = Self {
            pool,
            digest_gate: Arc::new(Mutex::new(())),
        };
        db.migrate().await.map_err(|e| {
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("database table is locked")
                || error_string.contains("sqlite_busy")
                || error_string.contains("sqlite_locked")
            {
                StoreError::InstanceLocked
            } else {
                StoreError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op. If any step fails the whole migration rolls back.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Feeds: url is the primary key the whole core keys against.
        // average_activity is the scheduler's write-back scalar (whole hours).
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                url TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                site_url TEXT,
                category TEXT,
                average_activity INTEGER NOT NULL DEFAULT 0,
                added_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Articles: guid is UNIQUE across the whole store (not per feed) —
        // reconciliation keys off it globally. feed_url is a plain foreign
        // key by convention; the catalog owns feed lifecycle and cascades
        // via remove_all_for_feed.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                feed_url TEXT NOT NULL,
                guid TEXT NOT NULL UNIQUE,
                link TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT,
                pub_time INTEGER NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                is_abandoned INTEGER NOT NULL DEFAULT 0,
                enclosures TEXT
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Tag assignments cascade away with either side's deletion.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS article_tags (
                guid TEXT NOT NULL REFERENCES articles(guid) ON DELETE CASCADE,
                tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                UNIQUE(guid, tag_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Small key-value store for app state (last download stamp, etc.)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS app_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_feed ON articles(feed_url)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_pub ON articles(pub_time DESC)")
            .execute(&mut *tx)
            .await?;
        // Composite index for unread count aggregation per feed
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_feed_read ON articles(feed_url, is_read)",
        )
        .execute(&mut *tx)
        .await?;
        // Retention sweep filters on abandonment + age
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_abandoned ON articles(is_abandoned, pub_time)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_article_tags_tag ON article_tags(tag_id)")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory_and_remigrate() {
        let db = Database::open(":memory:").await.unwrap();
        // Migrations are idempotent
        db.migrate().await.unwrap();
    }
}
