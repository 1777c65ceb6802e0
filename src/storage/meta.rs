use super::schema::Database;
use super::types::StoreError;

/// Key under which the last successful full-download stamp is persisted.
const LAST_FEEDS_DOWNLOAD: &str = "last_feeds_download";

impl Database {
    /// Read an app-state value by key.
    pub async fn get_meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM app_meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    /// Upsert an app-state value.
    pub async fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO app_meta (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Timestamp (ms) of the last successful full download, 0 if never run.
    pub async fn last_feeds_download(&self) -> Result<i64, StoreError> {
        Ok(self
            .get_meta(LAST_FEEDS_DOWNLOAD)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// Stamp the last-download time. Called as soon as a download wave starts
    /// so basket computation stays sane even if the run is interrupted.
    pub async fn set_last_feeds_download(&self, time_ms: i64) -> Result<(), StoreError> {
        self.set_meta(LAST_FEEDS_DOWNLOAD, &time_ms.to_string())
            .await
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;

    #[tokio::test]
    async fn test_meta_roundtrip() {
        let db = Database::open(":memory:").await.unwrap();
        assert_eq!(db.get_meta("missing").await.unwrap(), None);

        db.set_meta("k", "v1").await.unwrap();
        assert_eq!(db.get_meta("k").await.unwrap().as_deref(), Some("v1"));

        db.set_meta("k", "v2").await.unwrap();
        assert_eq!(db.get_meta("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_last_download_defaults_to_zero() {
        let db = Database::open(":memory:").await.unwrap();
        assert_eq!(db.last_feeds_download().await.unwrap(), 0);

        db.set_last_feeds_download(1_700_000_000_000).await.unwrap();
        assert_eq!(db.last_feeds_download().await.unwrap(), 1_700_000_000_000);
    }
}
