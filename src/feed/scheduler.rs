//! Fetch cycle over every enabled source.
//!
//! One task per source runs concurrently through a bounded stream; every task
//! settles before the cycle reports. Items are stored with a per-item
//! existence check so repeated cycles never duplicate rows, and each source's
//! status is written back in one batch at the end.
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::favicon::FaviconResolver;
use super::parser::normalize;
use super::rsshub::is_rsshub_url;
use super::transport::{CascadeError, FeedTransport, Route};
use crate::config::Config;
use crate::hot::HotTopics;
use crate::storage::{DatabaseError, FeedItem, Source, SourceKind, SourceOutcome, Storage};

/// Why a single source produced nothing this cycle.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] CascadeError),

    #[error("Feed could not be parsed: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Source has no URL")]
    MissingUrl,

    #[error("No fetcher registered for {0} sources")]
    NoFetcher(SourceKind),
}

/// Failure of a whole cycle, as opposed to individual sources.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Could not load sources: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Fetch cycle failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

/// Per-source line of a cycle report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReport {
    pub source_id: i64,
    pub name: String,
    pub fetched: usize,
    pub inserted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchSummary {
    pub success_count: usize,
    pub failed_count: usize,
    /// Items fetched across successful sources, new or not.
    pub total_items: usize,
    /// Rows actually added to storage.
    pub inserted: usize,
    pub sources: Vec<SourceReport>,
}

pub struct Scheduler {
    storage: Arc<dyn Storage>,
    transport: Arc<dyn FeedTransport>,
    hot: HotTopics,
    favicons: Option<Arc<FaviconResolver>>,
    rsshub_hosts: Vec<String>,
    max_concurrent: usize,
    max_attempts: u32,
    backoff_base: Duration,
}

impl Scheduler {
    pub fn new(
        storage: Arc<dyn Storage>,
        transport: Arc<dyn FeedTransport>,
        hot: HotTopics,
        config: &Config,
    ) -> Self {
        Self {
            storage,
            transport,
            hot,
            favicons: None,
            rsshub_hosts: config.rsshub.hosts.clone(),
            max_concurrent: config.scheduler.max_concurrent_sources.max(1),
            max_attempts: config.scheduler.max_attempts.max(1),
            backoff_base: Duration::from_secs(config.scheduler.backoff_base_secs),
        }
    }

    /// Resolve icons for RSS sources that have none before fetching them.
    pub fn with_favicons(mut self, resolver: Arc<FaviconResolver>) -> Self {
        self.favicons = Some(resolver);
        self
    }

    /// [`fetch_all`](Self::fetch_all), re-run with exponential backoff
    /// (`base * 2^(attempt-1)`) while the cycle itself fails.
    pub async fn run_with_retry(&self) -> Result<FetchSummary, SchedulerError> {
        let mut last = String::new();

        for attempt in 1..=self.max_attempts {
            match self.fetch_all().await {
                Ok(summary) => return Ok(summary),
                Err(e) => {
                    last = e.to_string();
                    if attempt == self.max_attempts {
                        break;
                    }
                    let delay = self.backoff_base * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        attempt = attempt,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "Fetch cycle failed, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        tracing::warn!(attempts = self.max_attempts, error = %last, "Fetch cycle gave up");
        Err(SchedulerError::Exhausted {
            attempts: self.max_attempts,
            last,
        })
    }

    /// Fetches every enabled source once. Individual source failures are
    /// counted, not returned; only failing to list sources is an error.
    pub async fn fetch_all(&self) -> Result<FetchSummary, SchedulerError> {
        let sources = self.storage.list_enabled_sources().await?;
        if sources.is_empty() {
            tracing::info!("No enabled sources to fetch");
            return Ok(FetchSummary::default());
        }

        let results: Vec<(Source, Result<(usize, usize), FetchError>)> = stream::iter(sources)
            .map(|source| async move {
                let result = self.fetch_source(&source).await;
                (source, result)
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut summary = FetchSummary::default();
        let mut outcomes = Vec::with_capacity(results.len());

        for (source, result) in results {
            let report = match result {
                Ok((fetched, inserted)) => {
                    summary.success_count += 1;
                    summary.total_items += fetched;
                    summary.inserted += inserted;
                    SourceReport {
                        source_id: source.id,
                        name: source.name,
                        fetched,
                        inserted,
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::warn!(source_id = source.id, source = %source.name, error = %e, "Source fetch failed");
                    summary.failed_count += 1;
                    SourceReport {
                        source_id: source.id,
                        name: source.name,
                        fetched: 0,
                        inserted: 0,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(SourceOutcome {
                source_id: report.source_id,
                error: report.error.clone(),
            });
            summary.sources.push(report);
        }

        if let Err(e) = self.storage.record_source_results(&outcomes).await {
            tracing::warn!(error = %e, "Failed to record source statuses");
        }

        tracing::info!(
            success = summary.success_count,
            failed = summary.failed_count,
            total_items = summary.total_items,
            inserted = summary.inserted,
            "Fetch cycle complete"
        );
        Ok(summary)
    }

    /// Returns `(fetched, inserted)` for one source.
    async fn fetch_source(&self, source: &Source) -> Result<(usize, usize), FetchError> {
        let mut items = match source.kind {
            SourceKind::Rss => self.fetch_rss(source).await?,
            kind if kind.is_hot_topic() => {
                let fetcher = self.hot.get(kind).ok_or(FetchError::NoFetcher(kind))?;
                fetcher
                    .fetch(fetcher.default_limit(), source.category.as_deref())
                    .await
            }
            // Forum boards have nothing to pull yet
            _ => Vec::new(),
        };

        for item in &mut items {
            item.source_name.clone_from(&source.name);
        }

        let inserted = if items.is_empty() {
            0
        } else {
            self.storage.insert_items_if_absent(source.id, &items).await?
        };

        tracing::debug!(source = %source.name, fetched = items.len(), inserted, "Source fetched");
        Ok((items.len(), inserted))
    }

    async fn fetch_rss(&self, source: &Source) -> Result<Vec<FeedItem>, FetchError> {
        let url = source
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or(FetchError::MissingUrl)?;

        let favicon = self.ensure_favicon(source, url).await;

        let route = if is_rsshub_url(url, &self.rsshub_hosts) {
            Route::RssHub
        } else {
            Route::ProxiedFirst
        };
        let payload = self.transport.fetch(url, route).await?;

        let parsed = normalize(&payload.body, &source.name);
        if let Some(error) = parsed.error {
            return Err(FetchError::Parse(error));
        }

        Ok(parsed
            .items
            .into_iter()
            .map(|mut item| {
                if item.favicon_url.is_none() {
                    item.favicon_url.clone_from(&favicon);
                }
                item
            })
            .collect())
    }

    /// Stored favicon, resolving and saving one first when missing. Failing to
    /// find or save an icon never fails the source.
    async fn ensure_favicon(&self, source: &Source, url: &str) -> Option<String> {
        if source.favicon_url.is_some() {
            return source.favicon_url.clone();
        }
        let resolver = self.favicons.as_ref()?;
        let icon = resolver.resolve(url).await?;

        match self.storage.get_or_set_source_favicon(source.id, &icon).await {
            Ok(stored) => Some(stored),
            Err(e) => {
                tracing::warn!(source_id = source.id, error = %e, "Failed to save favicon");
                Some(icon)
            }
        }
    }
}
