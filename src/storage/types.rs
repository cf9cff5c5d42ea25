use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("The database is locked by another feedpulse process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A stored row could not be mapped back to a domain value
    #[error("Invalid stored row: {0}")]
    InvalidRow(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error, folding SQLite lock conditions into `InstanceLocked`.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

pub(crate) fn is_lock_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
    lower.contains("database is locked")
        || lower.contains("database table is locked")
        || lower.contains("sqlite_busy")
        || lower.contains("sqlite_locked")
        || lower.contains("unable to open database file")
}

// ============================================================================
// Source
// ============================================================================

/// What kind of upstream a source pulls from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rss,
    Zhihu,
    Weibo,
    Xiaohongshu,
    Forum,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Rss => "rss",
            SourceKind::Zhihu => "zhihu",
            SourceKind::Weibo => "weibo",
            SourceKind::Xiaohongshu => "xiaohongshu",
            SourceKind::Forum => "forum",
        }
    }

    /// Zhihu, Weibo and Xiaohongshu trending lists.
    pub fn is_hot_topic(&self) -> bool {
        matches!(
            self,
            SourceKind::Zhihu | SourceKind::Weibo | SourceKind::Xiaohongshu
        )
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rss" => Ok(SourceKind::Rss),
            "zhihu" | "zhihu-hot" => Ok(SourceKind::Zhihu),
            "weibo" | "weibo-hot" => Ok(SourceKind::Weibo),
            "xiaohongshu" | "xhs" => Ok(SourceKind::Xiaohongshu),
            "forum" => Ok(SourceKind::Forum),
            other => Err(format!("unknown source type: {}", other)),
        }
    }
}

/// A persisted source.
///
/// `favicon_url` starts empty and is written once, the first time a favicon
/// resolves; later fetch cycles reuse it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub kind: SourceKind,
    pub url: Option<String>,
    pub enabled: bool,
    pub favicon_url: Option<String>,
    /// Hot-topic category filter (Xiaohongshu uses it).
    pub category: Option<String>,
    pub last_fetched: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
}

/// Fields supplied when saving a new source.
#[derive(Debug, Clone)]
pub struct NewSource {
    pub name: String,
    pub kind: SourceKind,
    pub url: Option<String>,
    pub category: Option<String>,
    pub favicon_url: Option<String>,
}

impl NewSource {
    pub fn rss(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SourceKind::Rss,
            url: Some(url.into()),
            category: None,
            favicon_url: None,
        }
    }

    pub fn hot_topic(name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            url: None,
            category: None,
            favicon_url: None,
        }
    }
}

/// Result of one source's fetch, written back as `last_fetched` / `last_error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOutcome {
    pub source_id: i64,
    pub error: Option<String>,
}

// ============================================================================
// Items
// ============================================================================

/// One normalized entry, whatever upstream it came from.
///
/// Deduplication identity is `link` when present, else `(title, publish_time)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub title: String,
    pub link: Option<String>,
    pub publish_time: DateTime<Utc>,
    /// Plain text, at most 300 characters.
    pub summary: String,
    pub tags: Vec<String>,
    pub source_name: String,
    pub favicon_url: Option<String>,
}

/// A [`FeedItem`] as read back from the database.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredItem {
    pub id: i64,
    pub source_id: i64,
    #[serde(flatten)]
    pub item: FeedItem,
    pub fetched_at: i64,
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SourceRow {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub url: Option<String>,
    pub enabled: bool,
    pub favicon_url: Option<String>,
    pub category: Option<String>,
    pub last_fetched: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
}

impl SourceRow {
    pub(crate) fn into_source(self) -> Result<Source, DatabaseError> {
        let kind = self
            .kind
            .parse::<SourceKind>()
            .map_err(DatabaseError::InvalidRow)?;
        Ok(Source {
            id: self.id,
            name: self.name,
            kind,
            url: self.url,
            enabled: self.enabled,
            favicon_url: self.favicon_url,
            category: self.category,
            last_fetched: self.last_fetched,
            last_error: self.last_error,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ItemRow {
    pub id: i64,
    pub source_id: i64,
    pub title: String,
    pub link: Option<String>,
    pub summary: String,
    pub tags: String,
    pub source_name: String,
    pub favicon_url: Option<String>,
    pub publish_time: i64,
    pub fetched_at: i64,
}

impl ItemRow {
    pub(crate) fn into_stored(self) -> StoredItem {
        let tags = serde_json::from_str(&self.tags).unwrap_or_else(|e| {
            tracing::debug!(item_id = self.id, error = %e, "Unreadable tag list, treating as empty");
            Vec::new()
        });
        StoredItem {
            id: self.id,
            source_id: self.source_id,
            item: FeedItem {
                title: self.title,
                link: self.link,
                publish_time: DateTime::from_timestamp(self.publish_time, 0).unwrap_or_default(),
                summary: self.summary,
                tags,
                source_name: self.source_name,
                favicon_url: self.favicon_url,
            },
            fetched_at: self.fetched_at,
        }
    }
}
