//! Trending-list sources: Zhihu hot list, Weibo hot search, Xiaohongshu.
//!
//! None of these are feeds. Each fetcher calls its platform's JSON endpoint
//! (when there is one) and maps the entries onto [`FeedItem`]. Fetchers never
//! fail: an unreachable, empty or unreadable endpoint yields the built-in
//! mock list instead, so a fetch cycle always has something to show.
mod weibo;
mod xiaohongshu;
mod zhihu;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{HotTopicConfig, DEFAULT_USER_AGENTS};
use crate::feed::transport::{execute, TransportError};
use crate::storage::{FeedItem, SourceKind};

pub use weibo::WeiboHotSearch;
pub use xiaohongshu::Xiaohongshu;
pub use zhihu::ZhihuHotList;

#[async_trait]
pub trait HotTopicFetcher: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Default number of items requested when the caller has no preference.
    fn default_limit(&self) -> usize;

    /// Up to `limit` items. `category` narrows the list where the platform
    /// has categories (Xiaohongshu); others ignore it.
    async fn fetch(&self, limit: usize, category: Option<&str>) -> Vec<FeedItem>;
}

#[derive(Debug, Error)]
pub(crate) enum HotTopicError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Unexpected response shape: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

/// GET `url` and decode the JSON body.
pub(crate) async fn get_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<T, HotTopicError> {
    let request = request
        .header(USER_AGENT, DEFAULT_USER_AGENTS[0])
        .header(ACCEPT, "application/json, text/plain, */*");
    let (body, _) = execute(request, timeout, &[]).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Lookup table from source kind to its fetcher.
#[derive(Clone, Default)]
pub struct HotTopics {
    fetchers: HashMap<SourceKind, Arc<dyn HotTopicFetcher>>,
}

impl HotTopics {
    /// The three built-in fetchers, configured from `[hot]`.
    pub fn new(client: reqwest::Client, config: &HotTopicConfig) -> Self {
        Self::default()
            .with(Arc::new(ZhihuHotList::new(client.clone(), config)))
            .with(Arc::new(WeiboHotSearch::new(client, config)))
            .with(Arc::new(Xiaohongshu::new(config)))
    }

    pub fn with(mut self, fetcher: Arc<dyn HotTopicFetcher>) -> Self {
        self.fetchers.insert(fetcher.kind(), fetcher);
        self
    }

    pub fn get(&self, kind: SourceKind) -> Option<&Arc<dyn HotTopicFetcher>> {
        self.fetchers.get(&kind)
    }
}
