use super::schema::Database;
use super::types::{StoreError, Tag};

impl Database {
    // ========================================================================
    // Tag Operations
    // ========================================================================

    /// Create a tag, or return the existing one when the name (exact,
    /// case-sensitive) is already taken.
    pub async fn add_tag(&self, name: &str) -> Result<Tag, StoreError> {
        if let Some(existing) = sqlx::query_as::<_, Tag>("SELECT id, name FROM tags WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(existing);
        }

        let tag = sqlx::query_as::<_, Tag>("INSERT INTO tags (name) VALUES (?) RETURNING id, name")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(tag)
    }

    /// Rename an existing tag.
    pub async fn rename_tag(&self, tag_id: i64, name: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE tags SET name = ? WHERE id = ?")
            .bind(name)
            .bind(tag_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All tag definitions, by name.
    pub async fn get_tags(&self) -> Result<Vec<Tag>, StoreError> {
        let tags = sqlx::query_as::<_, Tag>("SELECT id, name FROM tags ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(tags)
    }

    /// Attach a tag to an article. Idempotent: re-tagging is a no-op.
    pub async fn tag_article(&self, guid: &str, tag_id: i64) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO article_tags (guid, tag_id) VALUES (?, ?)")
            .bind(guid)
            .bind(tag_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Detach a tag from an article.
    pub async fn untag_article(&self, guid: &str, tag_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM article_tags WHERE guid = ? AND tag_id = ?")
            .bind(guid)
            .bind(tag_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a tag definition. Assignments cascade away, stripping the tag
    /// from every article that referenced it.
    pub async fn remove_tag(&self, tag_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM tags WHERE id = ?")
            .bind(tag_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, HarvestedArticle};

    fn article(link: &str) -> HarvestedArticle {
        HarvestedArticle {
            guid: None,
            link: link.to_string(),
            title: link.to_string(),
            content: None,
            pub_time: Some(1_000),
            enclosures: Vec::new(),
        }
    }

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_add_tag_dedupes_by_name() {
        let db = test_db().await;
        let first = db.add_tag("x").await.unwrap();
        let second = db.add_tag("x").await.unwrap();
        assert_eq!(first.id, second.id);

        // Case-sensitive exact match: different case is a different tag
        let upper = db.add_tag("X").await.unwrap();
        assert_ne!(first.id, upper.id);
    }

    #[tokio::test]
    async fn test_rename_tag() {
        let db = test_db().await;
        let tag = db.add_tag("old").await.unwrap();
        db.rename_tag(tag.id, "new").await.unwrap();

        let tags = db.get_tags().await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "new");
    }

    #[tokio::test]
    async fn test_tag_article_idempotent() {
        let db = test_db().await;
        db.digest("https://f.example/rss", &[article("l1")])
            .await
            .unwrap();
        let tag = db.add_tag("x").await.unwrap();

        db.tag_article("l1", tag.id).await.unwrap();
        db.tag_article("l1", tag.id).await.unwrap();

        let got = db.get_article("l1").await.unwrap().unwrap();
        assert_eq!(got.tags, vec![tag.id]);
    }

    #[tokio::test]
    async fn test_untag_article() {
        let db = test_db().await;
        db.digest("https://f.example/rss", &[article("l1")])
            .await
            .unwrap();
        let tag = db.add_tag("x").await.unwrap();
        db.tag_article("l1", tag.id).await.unwrap();

        db.untag_article("l1", tag.id).await.unwrap();
        let got = db.get_article("l1").await.unwrap().unwrap();
        assert!(got.tags.is_empty());
    }

    #[tokio::test]
    async fn test_remove_tag_strips_articles() {
        let db = test_db().await;
        db.digest("https://f.example/rss", &[article("l1"), article("l2")])
            .await
            .unwrap();
        let tag = db.add_tag("x").await.unwrap();
        db.tag_article("l1", tag.id).await.unwrap();
        db.tag_article("l2", tag.id).await.unwrap();

        db.remove_tag(tag.id).await.unwrap();

        assert!(db.get_tags().await.unwrap().is_empty());
        assert!(db.get_article("l1").await.unwrap().unwrap().tags.is_empty());
        assert!(db.get_article("l2").await.unwrap().unwrap().tags.is_empty());
    }
}
