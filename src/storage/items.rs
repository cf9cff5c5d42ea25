use super::schema::Database;
use super::types::{DatabaseError, FeedItem, ItemRow, StoredItem};

/// Maximum number of items returned from a single listing (OOM protection)
const MAX_ITEMS: i64 = 2000;

impl Database {
    // ========================================================================
    // Item Ingestion
    // ========================================================================

    /// Insert every item not already stored; returns how many were new.
    ///
    /// An item is "already stored" when any row shares its link, or, for
    /// items without a link, its `(title, publish_time)`. The check and the
    /// insert are one `INSERT ... SELECT ... WHERE NOT EXISTS` statement per
    /// item, so duplicates inside `items` itself are caught too.
    pub async fn insert_items_if_absent(
        &self,
        source_id: i64,
        items: &[FeedItem],
    ) -> Result<usize, DatabaseError> {
        if items.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let _writer = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;

        for item in items {
            let tags = serde_json::to_string(&item.tags)
                .map_err(|e| DatabaseError::InvalidRow(e.to_string()))?;
            let publish_time = item.publish_time.timestamp();

            let result = sqlx::query(
                r#"
                INSERT INTO items
                    (source_id, source_name, title, link, summary, tags, favicon_url, publish_time, fetched_at)
                SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?
                WHERE NOT EXISTS (
                    SELECT 1 FROM items
                    WHERE (?4 IS NOT NULL AND link = ?4)
                       OR (?4 IS NULL AND title = ?3 AND publish_time = ?8)
                )
            "#,
            )
            .bind(source_id)
            .bind(&item.source_name)
            .bind(&item.title)
            .bind(&item.link)
            .bind(&item.summary)
            .bind(&tags)
            .bind(&item.favicon_url)
            .bind(publish_time)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;

        tracing::debug!(
            source_id = source_id,
            offered = items.len(),
            inserted = inserted,
            "Inserted items"
        );
        Ok(inserted)
    }

    // ========================================================================
    // Item Queries
    // ========================================================================

    /// Newest items first, optionally for one source. `limit` is capped at 2000.
    pub async fn list_items(
        &self,
        source_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<StoredItem>, DatabaseError> {
        let limit = limit.clamp(1, MAX_ITEMS);
        let rows = sqlx::query_as::<_, ItemRow>(
            r#"
            SELECT id, source_id, title, link, summary, tags, source_name,
                   favicon_url, publish_time, fetched_at
            FROM items
            WHERE (? IS NULL OR source_id = ?)
            ORDER BY publish_time DESC, id DESC
            LIMIT ?
        "#,
        )
        .bind(source_id)
        .bind(source_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ItemRow::into_stored).collect())
    }

    pub async fn count_items(&self) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, FeedItem, NewSource};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    async fn test_db() -> (Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let source = db
            .add_source(&NewSource::rss("Test Feed", "https://feed.example.com/rss"))
            .await
            .unwrap();
        (db, source.id)
    }

    fn item(title: &str, link: Option<&str>, day: u32) -> FeedItem {
        FeedItem {
            title: title.to_string(),
            link: link.map(str::to_string),
            publish_time: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
            summary: format!("About {}", title),
            tags: vec!["rust".to_string()],
            source_name: "Test Feed".to_string(),
            favicon_url: None,
        }
    }

    #[tokio::test]
    async fn test_insert_items() {
        let (db, source_id) = test_db().await;
        let items = vec![
            item("One", Some("https://feed.example.com/1"), 1),
            item("Two", Some("https://feed.example.com/2"), 2),
        ];
        assert_eq!(db.insert_items_if_absent(source_id, &items).await.unwrap(), 2);
        assert_eq!(db.count_items().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let (db, source_id) = test_db().await;
        let items = vec![
            item("One", Some("https://feed.example.com/1"), 1),
            item("No link", None, 3),
        ];
        assert_eq!(db.insert_items_if_absent(source_id, &items).await.unwrap(), 2);
        assert_eq!(db.insert_items_if_absent(source_id, &items).await.unwrap(), 0);
        assert_eq!(db.count_items().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_link_identity_ignores_title_changes() {
        let (db, source_id) = test_db().await;
        db.insert_items_if_absent(source_id, &[item("Original", Some("https://x.test/a"), 1)])
            .await
            .unwrap();
        let renamed = item("Renamed", Some("https://x.test/a"), 2);
        assert_eq!(db.insert_items_if_absent(source_id, &[renamed]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_linkless_identity_is_title_and_time() {
        let (db, source_id) = test_db().await;
        let first = item("Same title", None, 1);
        let later = item("Same title", None, 2);
        assert_eq!(db.insert_items_if_absent(source_id, &[first.clone()]).await.unwrap(), 1);
        assert_eq!(db.insert_items_if_absent(source_id, &[later]).await.unwrap(), 1);
        assert_eq!(db.insert_items_if_absent(source_id, &[first]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicates_within_one_batch() {
        let (db, source_id) = test_db().await;
        let items = vec![
            item("One", Some("https://x.test/1"), 1),
            item("One again", Some("https://x.test/1"), 1),
        ];
        assert_eq!(db.insert_items_if_absent(source_id, &items).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_do_not_duplicate() {
        let (db, source_id) = test_db().await;
        let items: Vec<FeedItem> = (1..=20)
            .map(|i| item(&format!("Item {}", i), Some(&format!("https://x.test/{}", i)), 1))
            .collect();

        let (a, b) = tokio::join!(
            db.insert_items_if_absent(source_id, &items),
            db.insert_items_if_absent(source_id, &items)
        );
        assert_eq!(a.unwrap() + b.unwrap(), 20);
        assert_eq!(db.count_items().await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_list_items_newest_first_with_tags() {
        let (db, source_id) = test_db().await;
        db.insert_items_if_absent(
            source_id,
            &[
                item("Old", Some("https://x.test/old"), 1),
                item("New", Some("https://x.test/new"), 5),
            ],
        )
        .await
        .unwrap();

        let listed = db.list_items(None, 10).await.unwrap();
        assert_eq!(listed[0].item.title, "New");
        assert_eq!(listed[1].item.title, "Old");
        assert_eq!(listed[0].item.tags, vec!["rust".to_string()]);
        assert_eq!(listed[0].source_id, source_id);

        let limited = db.list_items(Some(source_id), 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert!(db.list_items(Some(source_id + 99), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_source_cascades_to_items() {
        let (db, source_id) = test_db().await;
        db.insert_items_if_absent(source_id, &[item("One", Some("https://x.test/1"), 1)])
            .await
            .unwrap();
        db.delete_source(source_id).await.unwrap();
        assert_eq!(db.count_items().await.unwrap(), 0);
    }
}
