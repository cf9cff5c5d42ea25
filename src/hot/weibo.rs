use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::REFERER;
use serde::Deserialize;
use std::time::Duration;

use super::{get_json, HotTopicError, HotTopicFetcher};
use crate::config::HotTopicConfig;
use crate::storage::{FeedItem, SourceKind};

const SOURCE_NAME: &str = "微博热搜";

#[derive(Debug, Deserialize)]
struct HotSearchResponse {
    data: Option<HotSearchData>,
}

#[derive(Debug, Deserialize)]
struct HotSearchData {
    #[serde(default)]
    realtime: Vec<Topic>,
}

#[derive(Debug, Deserialize)]
struct Topic {
    word: Option<String>,
    rank: Option<i64>,
    num: Option<i64>,
    category: Option<String>,
}

fn search_link(word: &str) -> String {
    format!("https://s.weibo.com/weibo?q={}", urlencoding::encode(word))
}

/// Weibo's realtime hot-search board.
pub struct WeiboHotSearch {
    client: reqwest::Client,
    api: String,
    timeout: Duration,
    limit: usize,
}

impl WeiboHotSearch {
    pub fn new(client: reqwest::Client, config: &HotTopicConfig) -> Self {
        Self {
            client,
            api: config.weibo_api.clone(),
            timeout: config.timeout(),
            limit: config.weibo_limit,
        }
    }

    async fn fetch_live(&self, limit: usize) -> Result<Vec<FeedItem>, HotTopicError> {
        let request = self.client.get(&self.api).header(REFERER, "https://weibo.com");
        let response: HotSearchResponse = get_json(request, self.timeout).await?;
        let topics = response.data.map(|d| d.realtime).unwrap_or_default();

        let now = Utc::now();
        Ok(topics
            .into_iter()
            .filter_map(|topic| {
                let word = topic.word.as_deref().map(str::trim).filter(|w| !w.is_empty())?;
                let category = topic.category.as_deref().filter(|c| !c.is_empty());

                let mut title = match topic.rank {
                    Some(rank) => format!("{} {}", rank, word),
                    None => word.to_string(),
                };
                let mut summary = category.unwrap_or(SOURCE_NAME).to_string();
                if let Some(num) = topic.num {
                    title = format!("{} • {}", title, num);
                    summary = format!("{} • 热度: {}", summary, num);
                }

                let mut tags = vec!["微博".to_string(), "热搜".to_string()];
                if let Some(category) = category {
                    tags.push(category.to_string());
                }

                Some(FeedItem {
                    title,
                    link: Some(search_link(word)),
                    publish_time: now,
                    summary,
                    tags,
                    source_name: SOURCE_NAME.to_string(),
                    favicon_url: None,
                })
            })
            .take(limit)
            .collect())
    }
}

const MOCK_TOPICS: [(&str, &str); 10] = [
    ("今日科技热点", "科技"),
    ("AI技术突破", "科技"),
    ("程序员日常", "职场"),
    ("产品设计趋势", "设计"),
    ("前端开发最佳实践", "技术"),
    ("后端架构设计", "技术"),
    ("云计算发展", "科技"),
    ("数据库优化", "技术"),
    ("网络安全", "安全"),
    ("移动应用开发", "开发"),
];

pub(crate) fn mock_items(limit: usize) -> Vec<FeedItem> {
    let now = Utc::now();
    MOCK_TOPICS
        .iter()
        .take(limit)
        .enumerate()
        .map(|(idx, (word, category))| FeedItem {
            title: format!("{} {}", idx + 1, word),
            link: Some(search_link(word)),
            publish_time: now,
            summary: format!("微博热搜 • {}", category),
            tags: vec!["微博".to_string(), "热搜".to_string(), category.to_string()],
            source_name: SOURCE_NAME.to_string(),
            favicon_url: None,
        })
        .collect()
}

#[async_trait]
impl HotTopicFetcher for WeiboHotSearch {
    fn kind(&self) -> SourceKind {
        SourceKind::Weibo
    }

    fn default_limit(&self) -> usize {
        self.limit
    }

    async fn fetch(&self, limit: usize, _category: Option<&str>) -> Vec<FeedItem> {
        match self.fetch_live(limit).await {
            Ok(items) if !items.is_empty() => {
                tracing::info!(count = items.len(), "Fetched Weibo hot search");
                items
            }
            Ok(_) => {
                tracing::warn!("Weibo hot search was empty, using built-in list");
                mock_items(limit)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Weibo hot search unavailable, using built-in list");
                mock_items(limit)
            }
        }
    }
}
