//! Favicon lookup through a chain of icon providers.
use futures::stream::{self, StreamExt};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::config::FaviconConfig;
use crate::storage::{Database, DatabaseError};
use crate::util::site_domain;

/// Concurrent probes during a batch refresh.
const REFRESH_CONCURRENCY: usize = 10;

pub struct FaviconResolver {
    client: reqwest::Client,
    providers: Vec<String>,
    timeout: Duration,
    /// domain -> verified icon URL. Misses are never stored.
    cache: Mutex<LruCache<String, String>>,
}

impl FaviconResolver {
    pub fn new(client: reqwest::Client, config: &FaviconConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            client,
            providers: config.providers.clone(),
            timeout: config.timeout(),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Icon URL for the site behind `site_url`, or `None` when no provider
    /// answers with a 2xx. Accepts a full URL or a bare domain.
    pub async fn resolve(&self, site_url: &str) -> Option<String> {
        let domain = domain_of(site_url)?;

        if let Some(hit) = self.cache_get(&domain) {
            return Some(hit);
        }

        for template in &self.providers {
            let candidate = template.replace("{domain}", &domain);
            if self.probe(&candidate).await {
                tracing::debug!(domain = %domain, favicon = %candidate, "Resolved favicon");
                if let Ok(mut cache) = self.cache.lock() {
                    cache.put(domain.clone(), candidate.clone());
                }
                return Some(candidate);
            }
        }

        tracing::debug!(domain = %domain, "No favicon provider answered");
        None
    }

    fn cache_get(&self, domain: &str) -> Option<String> {
        self.cache.lock().ok()?.get(domain).cloned()
    }

    async fn probe(&self, candidate: &str) -> bool {
        match tokio::time::timeout(self.timeout, self.client.head(candidate).send()).await {
            Ok(Ok(response)) => response.status().is_success(),
            Ok(Err(e)) => {
                tracing::debug!(url = %candidate, error = %e, "Favicon probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(url = %candidate, "Favicon probe timed out");
                false
            }
        }
    }
}

fn domain_of(site_url: &str) -> Option<String> {
    let trimmed = site_url.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Url::parse(trimmed).ok()?
    } else {
        Url::parse(&format!("https://{}", trimmed)).ok()?
    };
    site_domain(&parsed)
}

/// Outcome of [`refresh_missing_favicons`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FaviconRefresh {
    pub resolved: usize,
    pub unresolved: usize,
}

/// Resolve and store a favicon for every RSS source that lacks one.
pub async fn refresh_missing_favicons(
    db: &Database,
    resolver: &FaviconResolver,
) -> Result<FaviconRefresh, DatabaseError> {
    let sources = db.sources_missing_favicon().await?;

    let lookups: Vec<(i64, Option<String>)> = stream::iter(sources)
        .map(|source| async move {
            let icon = match source.url.as_deref() {
                Some(url) => resolver.resolve(url).await,
                None => None,
            };
            (source.id, icon)
        })
        .buffer_unordered(REFRESH_CONCURRENCY)
        .collect()
        .await;

    let mut summary = FaviconRefresh::default();
    for (source_id, icon) in lookups {
        match icon {
            Some(icon) => {
                db.get_or_set_source_favicon(source_id, &icon).await?;
                summary.resolved += 1;
            }
            None => summary.unresolved += 1,
        }
    }

    tracing::info!(
        resolved = summary.resolved,
        unresolved = summary.unresolved,
        "Favicon refresh complete"
    );
    Ok(summary)
}
