//! In-process stand-ins for the network, shared by unit tests.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::transport::{CascadeError, FeedTransport, Payload, Route, StrategyFailure, TransportError};

#[derive(Clone)]
enum Reply {
    Body(String),
    Blocked,
}

/// Maps exact URLs to canned bodies. Unknown URLs fail with a 404.
#[derive(Default)]
pub(crate) struct FakeTransport {
    replies: HashMap<String, (Reply, Duration)>,
    calls: Mutex<Vec<(String, Route)>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn body(mut self, url: &str, body: &str) -> Self {
        self.replies
            .insert(url.to_string(), (Reply::Body(body.to_string()), Duration::ZERO));
        self
    }

    pub(crate) fn slow_body(mut self, url: &str, body: &str, delay: Duration) -> Self {
        self.replies
            .insert(url.to_string(), (Reply::Body(body.to_string()), delay));
        self
    }

    pub(crate) fn blocked(mut self, url: &str) -> Self {
        self.replies
            .insert(url.to_string(), (Reply::Blocked, Duration::ZERO));
        self
    }

    pub(crate) fn calls(&self) -> Vec<(String, Route)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl FeedTransport for FakeTransport {
    async fn fetch(&self, url: &str, route: Route) -> Result<Payload, CascadeError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((url.to_string(), route));
        }

        let reply = self.replies.get(url).cloned();
        if let Some((_, delay)) = &reply {
            if !delay.is_zero() {
                tokio::time::sleep(*delay).await;
            }
        }

        let error = match reply {
            Some((Reply::Body(body), _)) => {
                return Ok(Payload {
                    body: body.into_bytes(),
                    content_type: None,
                    strategy: "fake".to_string(),
                })
            }
            Some((Reply::Blocked, _)) => TransportError::Challenge("Just a moment...".to_string()),
            None => TransportError::HttpStatus(404),
        };

        Err(CascadeError::Exhausted {
            url: url.to_string(),
            attempts: vec![StrategyFailure {
                strategy: "fake".to_string(),
                error,
            }],
        })
    }
}

pub(crate) const EXAMPLE_BLOG_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example Blog</title>
    <link>https://example.com</link>
    <description>An example blog about things</description>
    <item>
      <guid>1</guid>
      <title>First Post</title>
      <link>https://example.com/post/1</link>
      <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;
