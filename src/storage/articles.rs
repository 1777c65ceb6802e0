use std::collections::{HashMap, HashSet};

use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};

use super::schema::Database;
use super::types::{
    Article, ArticleDbRow, ArticlePage, DigestOutcome, Enclosure, HarvestedArticle, StoreError,
};

const ARTICLE_COLUMNS: &str =
    "id, feed_url, guid, link, title, content, pub_time, is_read, is_abandoned, enclosures";

impl Database {
    // ========================================================================
    // Digest (reconciliation)
    // ========================================================================

    /// Merge one feed's harvest into the store.
    ///
    /// At most one digest runs at a time; calls arriving while another digest
    /// is in flight queue behind it in FIFO order (the gate is a queue-fair
    /// async mutex). The reconciliation reads a working set, then decides
    /// per harvested article:
    ///
    /// - match by guid → refresh title/content if they drifted, clear the
    ///   abandonment flag if the article reappeared; read state and tags are
    ///   never touched
    /// - no match → insert a new record; `pub_time` comes from the feed's
    ///   publish date, or the wall clock at first observation, and is never
    ///   recomputed afterwards
    ///
    /// Working-set records of this feed that no harvested article claimed are
    /// flagged abandoned. A changed link on an existing guid is never
    /// persisted — drift detection compares title and content only.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EmptyHarvest`] without touching the store when
    /// the harvest is empty, so a transient empty parse cannot mass-abandon
    /// a feed's articles.
    pub async fn digest(
        &self,
        feed_url: &str,
        harvest: &[HarvestedArticle],
    ) -> Result<DigestOutcome, StoreError> {
        if harvest.is_empty() {
            return Err(StoreError::EmptyHarvest);
        }

        let gate = self.digest_gate.clone();
        let _serialized = gate.lock().await;

        let now = Utc::now().timestamp_millis();

        // Working set: every active record of this feed, plus any record
        // (abandoned or not, any feed) whose guid matches a harvested
        // identity. The second clause is what lets a previously-abandoned
        // article be found again and merged instead of duplicated.
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE (feed_url = "
        ));
        builder.push_bind(feed_url);
        builder.push(" AND is_abandoned = 0) OR guid IN (");
        let mut separated = builder.separated(", ");
        for article in harvest {
            separated.push_bind(article.identity());
        }
        separated.push_unseparated(")");

        let rows: Vec<ArticleDbRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        let mut unresolved: HashMap<String, ArticleDbRow> = rows
            .into_iter()
            .map(|row| (row.guid.clone(), row))
            .collect();

        let mut outcome = DigestOutcome::default();
        let mut seen: HashSet<&str> = HashSet::with_capacity(harvest.len());
        let mut tx = self.pool.begin().await?;

        for article in harvest {
            let identity = article.identity();
            // A feed occasionally repeats an item in one document; only the
            // first occurrence participates in reconciliation.
            if !seen.insert(identity) {
                continue;
            }

            match unresolved.remove(identity) {
                Some(existing) => {
                    let drifted = existing.title != article.title
                        || existing.content.as_deref() != article.content.as_deref();
                    if drifted || existing.is_abandoned {
                        sqlx::query(
                            "UPDATE articles SET title = ?, content = ?, is_abandoned = 0 WHERE guid = ?",
                        )
                        .bind(&article.title)
                        .bind(&article.content)
                        .bind(identity)
                        .execute(&mut *tx)
                        .await?;
                        outcome.updated += 1;
                    }
                }
                None => {
                    let audio: Vec<&Enclosure> = article
                        .enclosures
                        .iter()
                        .filter(|e| e.is_audio())
                        .collect();
                    let enclosures_json = if audio.is_empty() {
                        None
                    } else {
                        Some(serde_json::to_string(&audio)?)
                    };

                    sqlx::query(
                        r#"
                        INSERT INTO articles
                            (feed_url, guid, link, title, content, pub_time, is_read, is_abandoned, enclosures)
                        VALUES (?, ?, ?, ?, ?, ?, 0, 0, ?)
                    "#,
                    )
                    .bind(feed_url)
                    .bind(identity)
                    .bind(&article.link)
                    .bind(&article.title)
                    .bind(&article.content)
                    .bind(article.pub_time.unwrap_or(now))
                    .bind(enclosures_json)
                    .execute(&mut *tx)
                    .await?;
                    outcome.inserted += 1;
                }
            }
        }

        // Whatever is left belonged to this feed's active set but was absent
        // from the harvest: it vanished from the feed.
        let vanished: Vec<String> = unresolved
            .into_values()
            .filter(|row| row.feed_url == feed_url && !row.is_abandoned)
            .map(|row| row.guid)
            .collect();

        if !vanished.is_empty() {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("UPDATE articles SET is_abandoned = 1 WHERE guid IN (");
            let mut separated = builder.separated(", ");
            for guid in &vanished {
                separated.push_bind(guid);
            }
            separated.push_unseparated(")");
            builder.build().execute(&mut *tx).await?;
            outcome.abandoned = vanished.len();
        }

        tx.commit().await?;

        tracing::debug!(
            feed = %feed_url,
            inserted = outcome.inserted,
            updated = outcome.updated,
            abandoned = outcome.abandoned,
            "digest applied"
        );

        Ok(outcome)
    }

    // ========================================================================
    // Read State
    // ========================================================================

    /// Set the read state of every record sharing this guid (normally one).
    pub async fn set_read_state(&self, guid: &str, is_read: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE articles SET is_read = ? WHERE guid = ?")
            .bind(is_read)
            .bind(guid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bulk mark every currently-unread article of the given feeds as read.
    /// Returns the number of articles flipped; repeat calls are no-ops.
    pub async fn mark_all_read(&self, feed_urls: &[String]) -> Result<u64, StoreError> {
        if feed_urls.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE articles SET is_read = 1 WHERE is_read = 0 AND feed_url IN (");
        let mut separated = builder.separated(", ");
        for url in feed_urls {
            separated.push_bind(url);
        }
        separated.push_unseparated(")");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Count of unread articles for one feed.
    pub async fn count_unread(&self, feed_url: &str) -> Result<i64, StoreError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM articles WHERE feed_url = ? AND is_read = 0")
                .bind(feed_url)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    // ========================================================================
    // Retrieval
    // ========================================================================

    /// One page of articles for a set of feeds, newest first.
    ///
    /// The `[from, to)` slice is taken over the filtered result sorted by
    /// `pub_time` descending (ties broken by insertion order, newest row
    /// first). `unread_before`/`unread_after` count unread articles strictly
    /// above and below the page across the *full* filtered result.
    pub async fn get_articles(
        &self,
        feed_urls: &[String],
        from: i64,
        to: i64,
        tag: Option<i64>,
    ) -> Result<ArticlePage, StoreError> {
        if feed_urls.is_empty() {
            return Ok(ArticlePage {
                articles: Vec::new(),
                num_all: 0,
                unread_before: 0,
                unread_after: 0,
            });
        }

        let page_len = (to - from).max(0);

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {ARTICLE_COLUMNS} FROM articles"));
        push_filter(&mut builder, feed_urls, tag);
        builder.push(" ORDER BY pub_time DESC, id DESC LIMIT ");
        builder.push_bind(page_len);
        builder.push(" OFFSET ");
        builder.push_bind(from.max(0));
        let rows: Vec<ArticleDbRow> = builder.build_query_as().fetch_all(&self.pool).await?;

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM articles");
        push_filter(&mut builder, feed_urls, tag);
        let (num_all,): (i64,) = builder.build_query_as().fetch_one(&self.pool).await?;

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT COUNT(*) FROM (SELECT is_read FROM articles",
        );
        push_filter(&mut builder, feed_urls, tag);
        builder.push(" ORDER BY pub_time DESC, id DESC LIMIT ");
        builder.push_bind(from.max(0));
        builder.push(") WHERE is_read = 0");
        let (unread_before,): (i64,) = builder.build_query_as().fetch_one(&self.pool).await?;

        // LIMIT -1 is SQLite for "no limit"; the OFFSET skips the page and
        // everything above it.
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT COUNT(*) FROM (SELECT is_read FROM articles",
        );
        push_filter(&mut builder, feed_urls, tag);
        builder.push(" ORDER BY pub_time DESC, id DESC LIMIT -1 OFFSET ");
        builder.push_bind(to.max(0));
        builder.push(") WHERE is_read = 0");
        let (unread_after,): (i64,) = builder.build_query_as().fetch_one(&self.pool).await?;

        let mut articles: Vec<Article> = rows
            .into_iter()
            .map(ArticleDbRow::into_article)
            .collect();
        self.attach_tags(&mut articles).await?;

        Ok(ArticlePage {
            articles,
            num_all,
            unread_before,
            unread_after,
        })
    }

    /// Every article of one feed, newest first. Mostly a test and CLI helper;
    /// the paginated path is [`Database::get_articles`].
    pub async fn get_all_for_feed(&self, feed_url: &str) -> Result<Vec<Article>, StoreError> {
        let rows: Vec<ArticleDbRow> = sqlx::query_as(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE feed_url = ? ORDER BY pub_time DESC, id DESC"
        ))
        .bind(feed_url)
        .fetch_all(&self.pool)
        .await?;

        let mut articles: Vec<Article> = rows
            .into_iter()
            .map(ArticleDbRow::into_article)
            .collect();
        self.attach_tags(&mut articles).await?;
        Ok(articles)
    }

    /// Look up one article by its guid.
    pub async fn get_article(&self, guid: &str) -> Result<Option<Article>, StoreError> {
        let row: Option<ArticleDbRow> = sqlx::query_as(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE guid = ?"
        ))
        .bind(guid)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let mut articles = vec![row.into_article()];
                self.attach_tags(&mut articles).await?;
                Ok(articles.pop())
            }
            None => Ok(None),
        }
    }

    /// Populate `tags` on each article from the assignment table.
    async fn attach_tags(&self, articles: &mut [Article]) -> Result<(), StoreError> {
        if articles.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT guid, tag_id FROM article_tags WHERE guid IN (");
        let mut separated = builder.separated(", ");
        for article in articles.iter() {
            separated.push_bind(article.guid.clone());
        }
        separated.push_unseparated(")");

        let rows: Vec<(String, i64)> = builder.build_query_as().fetch_all(&self.pool).await?;
        if rows.is_empty() {
            return Ok(());
        }

        let mut by_guid: HashMap<String, Vec<i64>> = HashMap::new();
        for (guid, tag_id) in rows {
            by_guid.entry(guid).or_default().push(tag_id);
        }
        for article in articles.iter_mut() {
            if let Some(tags) = by_guid.remove(&article.guid) {
                article.tags = tags;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Retention sweep: delete abandoned articles older than `time_ms`.
    /// With `leave_tagged`, articles carrying any tag survive regardless of
    /// age. Non-abandoned articles are never deleted here.
    pub async fn remove_older_than(
        &self,
        time_ms: i64,
        leave_tagged: bool,
    ) -> Result<u64, StoreError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM articles WHERE pub_time < ");
        builder.push_bind(time_ms);
        builder.push(" AND is_abandoned = 1");
        if leave_tagged {
            builder.push(
                " AND NOT EXISTS (SELECT 1 FROM article_tags WHERE article_tags.guid = articles.guid)",
            );
        }

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Cascade delete of every article belonging to a feed, used when the
    /// subscription itself is removed. Tag assignments cascade with the rows.
    pub async fn remove_all_for_feed(&self, feed_url: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM articles WHERE feed_url = ?")
            .bind(feed_url)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Shared WHERE clause for the paginated queries: feed membership plus an
/// optional tag filter.
fn push_filter<'a>(
    builder: &mut QueryBuilder<'a, Sqlite>,
    feed_urls: &'a [String],
    tag: Option<i64>,
) {
    builder.push(" WHERE feed_url IN (");
    let mut separated = builder.separated(", ");
    for url in feed_urls {
        separated.push_bind(url);
    }
    separated.push_unseparated(")");

    if let Some(tag_id) = tag {
        builder.push(
            " AND EXISTS (SELECT 1 FROM article_tags at WHERE at.guid = articles.guid AND at.tag_id = ",
        );
        builder.push_bind(tag_id);
        builder.push(")");
    }
}
