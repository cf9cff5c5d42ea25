mod items;
mod schema;
mod sources;
mod types;

use async_trait::async_trait;

pub use schema::Database;
pub use types::{
    DatabaseError, FeedItem, NewSource, Source, SourceKind, SourceOutcome, StoredItem,
};

/// What the fetch scheduler needs from persistence.
///
/// `Database` is the production implementation; scheduler tests use an
/// in-memory fake.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn list_enabled_sources(&self) -> Result<Vec<Source>, DatabaseError>;

    /// Inserts items not already present and returns the number inserted.
    async fn insert_items_if_absent(
        &self,
        source_id: i64,
        items: &[FeedItem],
    ) -> Result<usize, DatabaseError>;

    /// Stores `favicon_url` if the source has none and returns the stored value.
    async fn get_or_set_source_favicon(
        &self,
        source_id: i64,
        favicon_url: &str,
    ) -> Result<String, DatabaseError>;

    async fn record_source_results(&self, _outcomes: &[SourceOutcome]) -> Result<(), DatabaseError> {
        Ok(())
    }
}

#[async_trait]
impl Storage for Database {
    async fn list_enabled_sources(&self) -> Result<Vec<Source>, DatabaseError> {
        Database::list_enabled_sources(self).await
    }

    async fn insert_items_if_absent(
        &self,
        source_id: i64,
        items: &[FeedItem],
    ) -> Result<usize, DatabaseError> {
        Database::insert_items_if_absent(self, source_id, items).await
    }

    async fn get_or_set_source_favicon(
        &self,
        source_id: i64,
        favicon_url: &str,
    ) -> Result<String, DatabaseError> {
        Database::get_or_set_source_favicon(self, source_id, favicon_url).await
    }

    async fn record_source_results(&self, outcomes: &[SourceOutcome]) -> Result<(), DatabaseError> {
        Database::record_source_results(self, outcomes).await
    }
}
