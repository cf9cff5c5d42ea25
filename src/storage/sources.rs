use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{DatabaseError, NewSource, Source, SourceKind, SourceOutcome, SourceRow};

const SOURCE_COLUMNS: &str = "id, name, kind, url, enabled, favicon_url, category, \
                              last_fetched, last_error, created_at";

impl Database {
    // ========================================================================
    // Source Operations
    // ========================================================================

    /// Save a new source and return it with its assigned id.
    pub async fn add_source(&self, source: &NewSource) -> Result<Source, DatabaseError> {
        let missing_url = source.url.as_deref().map_or(true, |u| u.trim().is_empty());
        if source.kind == SourceKind::Rss && missing_url {
            return Err(DatabaseError::InvalidRow(
                "rss sources need a url".to_string(),
            ));
        }

        let now = chrono::Utc::now().timestamp();
        let row = sqlx::query_as::<_, SourceRow>(&format!(
            "INSERT INTO sources (name, kind, url, enabled, favicon_url, category, created_at) \
             VALUES (?, ?, ?, 1, ?, ?, ?) RETURNING {}",
            SOURCE_COLUMNS
        ))
        .bind(&source.name)
        .bind(source.kind.as_str())
        .bind(&source.url)
        .bind(&source.favicon_url)
        .bind(&source.category)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(id = row.id, name = %row.name, kind = %row.kind, "Added source");
        row.into_source()
    }

    /// All sources, oldest first.
    pub async fn list_sources(&self) -> Result<Vec<Source>, DatabaseError> {
        let rows = sqlx::query_as::<_, SourceRow>(&format!(
            "SELECT {} FROM sources ORDER BY id",
            SOURCE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SourceRow::into_source).collect()
    }

    /// Sources the scheduler should fetch.
    pub async fn list_enabled_sources(&self) -> Result<Vec<Source>, DatabaseError> {
        let rows = sqlx::query_as::<_, SourceRow>(&format!(
            "SELECT {} FROM sources WHERE enabled = 1 ORDER BY id",
            SOURCE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SourceRow::into_source).collect()
    }

    pub async fn get_source(&self, source_id: i64) -> Result<Option<Source>, DatabaseError> {
        let row = sqlx::query_as::<_, SourceRow>(&format!(
            "SELECT {} FROM sources WHERE id = ?",
            SOURCE_COLUMNS
        ))
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SourceRow::into_source).transpose()
    }

    /// RSS sources with a stored URL; used to skip re-adding a feed.
    pub async fn find_rss_source_by_url(&self, url: &str) -> Result<Option<Source>, DatabaseError> {
        let row = sqlx::query_as::<_, SourceRow>(&format!(
            "SELECT {} FROM sources WHERE kind = 'rss' AND url = ? LIMIT 1",
            SOURCE_COLUMNS
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SourceRow::into_source).transpose()
    }

    /// Delete a source and (via ON DELETE CASCADE) its items.
    /// Returns whether a row was removed.
    pub async fn delete_source(&self, source_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_source_enabled(&self, source_id: i64, enabled: bool) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE sources SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Favicon
    // ========================================================================

    /// Store `favicon_url` unless the source already has one; returns the
    /// value now on record. The first writer wins.
    pub async fn get_or_set_source_favicon(
        &self,
        source_id: i64,
        favicon_url: &str,
    ) -> Result<String, DatabaseError> {
        sqlx::query(
            "UPDATE sources SET favicon_url = ? \
             WHERE id = ? AND (favicon_url IS NULL OR favicon_url = '')",
        )
        .bind(favicon_url)
        .bind(source_id)
        .execute(&self.pool)
        .await?;

        let stored: Option<(Option<String>,)> =
            sqlx::query_as("SELECT favicon_url FROM sources WHERE id = ?")
                .bind(source_id)
                .fetch_optional(&self.pool)
                .await?;

        match stored {
            Some((Some(url),)) => Ok(url),
            Some((None,)) => Ok(favicon_url.to_string()),
            None => Err(DatabaseError::InvalidRow(format!(
                "source {} does not exist",
                source_id
            ))),
        }
    }

    /// RSS sources that have no favicon yet.
    pub async fn sources_missing_favicon(&self) -> Result<Vec<Source>, DatabaseError> {
        let rows = sqlx::query_as::<_, SourceRow>(&format!(
            "SELECT {} FROM sources \
             WHERE kind = 'rss' AND url IS NOT NULL AND (favicon_url IS NULL OR favicon_url = '') \
             ORDER BY id",
            SOURCE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SourceRow::into_source).collect()
    }

    // ========================================================================
    // Fetch Status
    // ========================================================================

    /// Batch update `last_fetched` / `last_error` in a single UPDATE statement.
    ///
    /// `last_fetched` moves only for sources that succeeded; `last_error` is
    /// set or cleared for all of them.
    pub async fn record_source_results(&self, outcomes: &[SourceOutcome]) -> Result<(), DatabaseError> {
        if outcomes.is_empty() {
            return Ok(());
        }
        let now = chrono::Utc::now().timestamp();

        // UPDATE sources SET last_error = CASE id WHEN 1 THEN 'e' WHEN 2 THEN NULL END,
        //     last_fetched = CASE id WHEN 2 THEN now ELSE last_fetched END
        // WHERE id IN (1, 2)
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE sources SET last_error = CASE id ");
        for outcome in outcomes {
            builder.push("WHEN ");
            builder.push_bind(outcome.source_id);
            builder.push(" THEN ");
            builder.push_bind(outcome.error.as_deref());
            builder.push(" ");
        }
        builder.push("END, last_fetched = ");
        let succeeded: Vec<i64> = outcomes
            .iter()
            .filter(|o| o.error.is_none())
            .map(|o| o.source_id)
            .collect();
        if succeeded.is_empty() {
            builder.push("last_fetched");
        } else {
            builder.push("CASE id ");
            for source_id in &succeeded {
                builder.push("WHEN ");
                builder.push_bind(*source_id);
                builder.push(" THEN ");
                builder.push_bind(now);
                builder.push(" ");
            }
            builder.push("ELSE last_fetched END");
        }
        builder.push(" WHERE id IN (");
        let mut separated = builder.separated(", ");
        for outcome in outcomes {
            separated.push_bind(outcome.source_id);
        }
        separated.push_unseparated(")");

        builder.build().execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, NewSource, SourceKind, SourceOutcome};
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_add_and_list_sources() {
        let db = test_db().await;
        let rss = db
            .add_source(&NewSource::rss("Example", "https://example.com/feed"))
            .await
            .unwrap();
        let hot = db
            .add_source(&NewSource::hot_topic("Weibo", SourceKind::Weibo))
            .await
            .unwrap();

        assert!(rss.enabled);
        assert_eq!(rss.kind, SourceKind::Rss);
        assert_eq!(hot.url, None);

        let all = db.list_sources().await.unwrap();
        assert_eq!(all.iter().map(|s| s.id).collect::<Vec<_>>(), vec![rss.id, hot.id]);
    }

    #[tokio::test]
    async fn test_rss_source_requires_url() {
        let db = test_db().await;
        let mut source = NewSource::rss("Broken", "");
        assert!(db.add_source(&source).await.is_err());
        source.url = None;
        assert!(db.add_source(&source).await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_sources_not_listed_for_fetch() {
        let db = test_db().await;
        let a = db.add_source(&NewSource::rss("A", "https://a.test/rss")).await.unwrap();
        let b = db.add_source(&NewSource::rss("B", "https://b.test/rss")).await.unwrap();
        assert!(db.set_source_enabled(a.id, false).await.unwrap());

        let enabled = db.list_enabled_sources().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, b.id);
    }

    #[tokio::test]
    async fn test_delete_source() {
        let db = test_db().await;
        let a = db.add_source(&NewSource::rss("A", "https://a.test/rss")).await.unwrap();
        assert!(db.delete_source(a.id).await.unwrap());
        assert!(!db.delete_source(a.id).await.unwrap());
        assert!(db.get_source(a.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_favicon_first_writer_wins() {
        let db = test_db().await;
        let a = db.add_source(&NewSource::rss("A", "https://a.test/rss")).await.unwrap();

        let first = db
            .get_or_set_source_favicon(a.id, "https://icons.test/a.png")
            .await
            .unwrap();
        let second = db
            .get_or_set_source_favicon(a.id, "https://icons.test/other.png")
            .await
            .unwrap();

        assert_eq!(first, "https://icons.test/a.png");
        assert_eq!(second, "https://icons.test/a.png");
        assert!(db.sources_missing_favicon().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_favicon_unknown_source() {
        let db = test_db().await;
        assert!(db.get_or_set_source_favicon(42, "https://x.test/i.png").await.is_err());
    }

    #[tokio::test]
    async fn test_record_source_results() {
        let db = test_db().await;
        let ok = db.add_source(&NewSource::rss("Ok", "https://ok.test/rss")).await.unwrap();
        let bad = db.add_source(&NewSource::rss("Bad", "https://bad.test/rss")).await.unwrap();

        db.record_source_results(&[
            SourceOutcome { source_id: ok.id, error: None },
            SourceOutcome { source_id: bad.id, error: Some("HTTP error: status 500".to_string()) },
        ])
        .await
        .unwrap();

        let ok = db.get_source(ok.id).await.unwrap().unwrap();
        let bad = db.get_source(bad.id).await.unwrap().unwrap();
        assert!(ok.last_fetched.is_some());
        assert_eq!(ok.last_error, None);
        assert_eq!(bad.last_fetched, None);
        assert_eq!(bad.last_error.as_deref(), Some("HTTP error: status 500"));

        // A later success clears the error
        db.record_source_results(&[SourceOutcome { source_id: bad.id, error: None }])
            .await
            .unwrap();
        let bad = db.get_source(bad.id).await.unwrap().unwrap();
        assert_eq!(bad.last_error, None);
        assert!(bad.last_fetched.is_some());
    }
}
