use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::{get_json, HotTopicError, HotTopicFetcher};
use crate::config::HotTopicConfig;
use crate::feed::parser::clean_summary;
use crate::storage::{FeedItem, SourceKind};

const SOURCE_NAME: &str = "知乎热榜";

#[derive(Debug, Deserialize)]
struct HotListResponse {
    #[serde(default)]
    data: Vec<HotListEntry>,
}

#[derive(Debug, Deserialize)]
struct HotListEntry {
    target: Option<Target>,
    /// e.g. "1234 万热度"
    detail_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Target {
    title: Option<String>,
    excerpt: Option<String>,
    url: Option<String>,
    id: Option<serde_json::Value>,
    #[serde(rename = "type")]
    kind: Option<String>,
    created: Option<i64>,
    author: Option<Author>,
}

#[derive(Debug, Deserialize)]
struct Author {
    name: Option<String>,
}

/// Zhihu's "total" hot list.
pub struct ZhihuHotList {
    client: reqwest::Client,
    api: String,
    timeout: Duration,
    limit: usize,
}

impl ZhihuHotList {
    pub fn new(client: reqwest::Client, config: &HotTopicConfig) -> Self {
        Self {
            client,
            api: config.zhihu_api.clone(),
            timeout: config.timeout(),
            limit: config.zhihu_limit,
        }
    }

    async fn fetch_live(&self, limit: usize) -> Result<Vec<FeedItem>, HotTopicError> {
        let mut endpoint = Url::parse(&self.api)?;
        endpoint
            .query_pairs_mut()
            .append_pair("limit", &limit.to_string());

        let response: HotListResponse =
            get_json(self.client.get(endpoint.as_str()), self.timeout).await?;
        let now = Utc::now();
        Ok(response
            .data
            .into_iter()
            .filter_map(|entry| to_item(entry, now))
            .take(limit)
            .collect())
    }
}

fn id_string(id: &serde_json::Value) -> Option<String> {
    match id {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Public question page for an entry. The API hands out api.zhihu.com links.
fn question_link(target: &Target) -> Option<String> {
    let id = target.id.as_ref().and_then(id_string);
    let is_question = target.kind.as_deref().map_or(true, |k| k == "question");

    if let (true, Some(id)) = (is_question, id.as_deref()) {
        return Some(format!("https://www.zhihu.com/question/{}", id));
    }
    if let Some(url) = target.url.as_deref() {
        return Some(url.replace("api.zhihu.com/questions/", "www.zhihu.com/question/"));
    }
    id.map(|id| format!("https://www.zhihu.com/question/{}", id))
}

fn to_item(entry: HotListEntry, now: DateTime<Utc>) -> Option<FeedItem> {
    let target = entry.target?;
    let title = target.title.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
    let heat = entry.detail_text.as_deref().map(str::trim).filter(|h| !h.is_empty());

    let mut summary = match target.excerpt.as_deref().filter(|e| !e.trim().is_empty()) {
        Some(excerpt) => excerpt.to_string(),
        None => format!("知乎热榜 • 热度 {}", heat.unwrap_or("N/A")),
    };
    if let Some(author) = target.author.as_ref().and_then(|a| a.name.as_deref()) {
        summary = format!("{} 作者: {}", summary, author);
    }

    let mut tags = vec!["知乎".to_string(), "热榜".to_string()];
    if let Some(kind) = target.kind.as_deref().filter(|k| !k.is_empty()) {
        tags.push(kind.to_string());
    }

    Some(FeedItem {
        title: match heat {
            Some(heat) => format!("{} • {}", heat, title),
            None => title.to_string(),
        },
        link: question_link(&target),
        publish_time: target
            .created
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or(now),
        summary: clean_summary(&summary),
        tags,
        source_name: SOURCE_NAME.to_string(),
        favicon_url: None,
    })
}

/// Stand-in list used when the live endpoint gives nothing usable, cut to
/// `limit` entries.
pub(crate) fn mock_items(limit: usize) -> Vec<FeedItem> {
    let now = Utc::now();
    let entry = |title: &str, summary: &str, id: u32, extra: &[&str]| FeedItem {
        title: title.to_string(),
        link: Some(format!("https://www.zhihu.com/question/{}", id)),
        publish_time: now,
        summary: summary.to_string(),
        tags: ["知乎", "热榜"]
            .iter()
            .chain(extra)
            .map(|t| t.to_string())
            .collect(),
        source_name: SOURCE_NAME.to_string(),
        favicon_url: None,
    };
    vec![
        entry(
            "1000000 • 如何评价当前的科技发展趋势？",
            "知乎热榜 • 话题 • 讨论当前科技领域的热点话题和发展趋势",
            123456,
            &["科技"],
        ),
        entry(
            "999999 • 2024年最值得期待的AI产品有哪些？",
            "知乎热榜 • 话题 • 汇总2024年值得关注的AI产品和创新",
            234567,
            &["AI", "产品"],
        ),
    ]
    .into_iter()
    .take(limit)
    .collect()
}

#[async_trait]
impl HotTopicFetcher for ZhihuHotList {
    fn kind(&self) -> SourceKind {
        SourceKind::Zhihu
    }

    fn default_limit(&self) -> usize {
        self.limit
    }

    async fn fetch(&self, limit: usize, _category: Option<&str>) -> Vec<FeedItem> {
        match self.fetch_live(limit).await {
            Ok(items) if !items.is_empty() => {
                tracing::info!(count = items.len(), "Fetched Zhihu hot list");
                items
            }
            Ok(_) => {
                tracing::warn!("Zhihu hot list was empty, using built-in list");
                mock_items(limit)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Zhihu hot list unavailable, using built-in list");
                mock_items(limit)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(server: &MockServer) -> ZhihuHotList {
        let config = HotTopicConfig {
            zhihu_api: format!("{}/api/v3/feed/topstory/hot-lists/total", server.uri()),
            timeout_secs: 5,
            ..HotTopicConfig::default()
        };
        ZhihuHotList::new(reqwest::Client::new(), &config)
    }

    #[tokio::test]
    async fn test_maps_live_hot_list() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "data": [
                {
                    "detail_text": "1520 万热度",
                    "target": {
                        "id": 640511134,
                        "type": "question",
                        "title": "如何看待 Rust 2024 edition？",
                        "excerpt": "<p>新版本带来了哪些变化</p>",
                        "url": "https://api.zhihu.com/questions/640511134",
                        "created": 1704067200,
                        "author": { "name": "知乎用户" }
                    }
                },
                { "detail_text": "10 万热度", "target": { "id": 1, "title": "" } },
                { "target": { "id": "2", "type": "question", "title": "没有热度的问题" } }
            ]
        });
        Mock::given(method("GET"))
            .and(path("/api/v3/feed/topstory/hot-lists/total"))
            .and(query_param("limit", "50"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&server)
            .await;

        let items = fetcher(&server).fetch(50, None).await;
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert_eq!(first.title, "1520 万热度 • 如何看待 Rust 2024 edition？");
        assert_eq!(first.link.as_deref(), Some("https://www.zhihu.com/question/640511134"));
        assert_eq!(first.summary, "新版本带来了哪些变化 作者: 知乎用户");
        assert_eq!(first.tags, vec!["知乎", "热榜", "question"]);
        assert_eq!(first.publish_time.timestamp(), 1704067200);

        assert_eq!(items[1].title, "没有热度的问题");
        assert_eq!(items[1].summary, "知乎热榜 • 热度 N/A");
    }

    #[tokio::test]
    async fn test_falls_back_to_mock_on_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let items = fetcher(&server).fetch(50, None).await;
        assert_eq!(items, mock_items_with_time(&items));
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_falls_back_to_mock_on_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": [] })))
            .mount(&server)
            .await;

        let items = fetcher(&server).fetch(10, None).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].link.as_deref(), Some("https://www.zhihu.com/question/123456"));
    }

    #[tokio::test]
    async fn test_fallback_respects_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let items = fetcher(&server).fetch(1, None).await;
        assert_eq!(items.len(), 1);
        assert!(items[0].title.contains("科技发展趋势"));
    }

    // Mock entries stamp "now"; align times before comparing.
    fn mock_items_with_time(actual: &[FeedItem]) -> Vec<FeedItem> {
        mock_items(usize::MAX)
            .into_iter()
            .zip(actual)
            .map(|(mut expected, got)| {
                expected.publish_time = got.publish_time;
                expected
            })
            .collect()
    }
}
