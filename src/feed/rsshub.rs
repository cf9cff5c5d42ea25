//! RSSHub endpoints and the body checks shared with the public relays.
//!
//! RSSHub instances sit behind aggressive bot protection, so they get their
//! own strategy: browser-like headers, a ranked mirror list, a fixed number
//! of attempts per mirror with a pause in between, and full inspection of
//! every body before it is accepted.
use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, USER_AGENT};
use std::time::Duration;
use url::Url;

use super::transport::{execute, Payload, Strategy, TransportError};
use crate::config::{RelayMirror, RssHubConfig};

/// True for hosts containing "rsshub" and for any host listed in `extra_hosts`.
pub fn is_rsshub_url(url: &str, extra_hosts: &[String]) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    host.contains("rsshub")
        || extra_hosts
            .iter()
            .any(|h| h.eq_ignore_ascii_case(&host))
}

/// Acceptance rules for bodies from untrusted intermediaries.
#[derive(Debug, Clone, Default)]
pub struct BodyRules {
    pub min_len: usize,
    pub challenge_markers: Vec<String>,
}

const FEED_MARKERS: [&str; 8] = [
    "<rss", "<feed", "<rdf:rdf", "<item>", "<item ", "<entry>", "<entry ",
    "jsonfeed.org/version",
];

/// Cheap structural check: does the text carry any RSS/Atom/RDF element?
pub fn looks_like_feed(text: &str) -> bool {
    let lower = text.to_lowercase();
    FEED_MARKERS.iter().any(|m| lower.contains(m))
}

/// First marker contained in `lower`, which must already be lowercased.
pub(crate) fn find_marker<'a>(lower: &str, markers: &'a [String]) -> Option<&'a str> {
    markers
        .iter()
        .map(String::as_str)
        .find(|m| !m.is_empty() && lower.contains(&m.to_lowercase()))
}

/// Full inspection used for relays and RSSHub mirrors.
///
/// A body must be at least `min_len` bytes and look like a feed. Challenge
/// markers only decide the error kind for bodies that are not feed-shaped, so
/// a real feed whose items mention "challenge-platform" still passes.
pub fn inspect_body(body: &[u8], rules: &BodyRules) -> Result<(), TransportError> {
    if body.len() < rules.min_len {
        return Err(TransportError::TooShort(body.len()));
    }
    check_body(body, &rules.challenge_markers, Expect::Feed)
}

/// What a direct or proxied fetch must come back with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Any document; web pages are scanned for feed links by discovery
    Page,
    /// A feed-shaped body, so a landing or error page moves the cascade on
    Feed,
}

/// Check for the direct and proxy strategies. Challenge interstitials are
/// always refused; under [`Expect::Feed`] so is anything not feed-shaped.
pub fn check_body(body: &[u8], markers: &[String], expect: Expect) -> Result<(), TransportError> {
    let text = String::from_utf8_lossy(body);
    if looks_like_feed(&text) {
        return Ok(());
    }
    if let Some(marker) = find_marker(&text.to_lowercase(), markers) {
        return Err(TransportError::Challenge(marker.to_string()));
    }
    match expect {
        Expect::Page => Ok(()),
        Expect::Feed => Err(TransportError::NotFeedShaped),
    }
}

/// Fetches RSSHub URLs through a ranked mirror list.
pub struct RssHubStrategy {
    client: reqwest::Client,
    mirrors: Vec<RelayMirror>,
    user_agent: String,
    timeout: Duration,
    attempts_per_mirror: u32,
    retry_delay: Duration,
    rules: BodyRules,
}

impl RssHubStrategy {
    pub fn new(client: reqwest::Client, config: &RssHubConfig, rules: BodyRules) -> Self {
        Self {
            client,
            mirrors: config.mirrors.clone(),
            user_agent: config.user_agent.clone(),
            timeout: config.timeout(),
            attempts_per_mirror: config.attempts_per_mirror.max(1),
            retry_delay: config.retry_delay(),
            rules,
        }
    }

    fn browser_request(&self, target: &str) -> reqwest::RequestBuilder {
        self.client
            .get(target)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/rss+xml, application/xml, text/xml, */*")
            .header(ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9,en;q=0.8")
            .header(CACHE_CONTROL, "max-age=0")
            .header("Upgrade-Insecure-Requests", "1")
            .header("Sec-Fetch-Dest", "document")
            .header("Sec-Fetch-Mode", "navigate")
            .header("Sec-Fetch-Site", "none")
    }

    async fn attempt(&self, mirror: &RelayMirror, url: &str) -> Result<Payload, TransportError> {
        let request = self.browser_request(&mirror.expand(url));
        let (body, content_type) = execute(request, self.timeout, &self.rules.challenge_markers).await?;
        inspect_body(&body, &self.rules)?;
        Ok(Payload {
            body,
            content_type,
            strategy: format!("rsshub/{}", mirror.name),
        })
    }
}

#[async_trait]
impl Strategy for RssHubStrategy {
    fn name(&self) -> &str {
        "rsshub"
    }

    async fn fetch(&self, url: &str) -> Result<Payload, TransportError> {
        let mut challenged = None;
        let mut last = None;

        for mirror in &self.mirrors {
            for attempt in 1..=self.attempts_per_mirror {
                match self.attempt(mirror, url).await {
                    Ok(payload) => {
                        tracing::debug!(
                            url = %url,
                            mirror = %mirror.name,
                            bytes = payload.body.len(),
                            "RSSHub fetch succeeded"
                        );
                        return Ok(payload);
                    }
                    Err(e) => {
                        tracing::debug!(
                            url = %url,
                            mirror = %mirror.name,
                            attempt,
                            error = %e,
                            "RSSHub attempt failed"
                        );
                        if e.is_challenge() {
                            challenged = Some(e);
                        } else {
                            last = Some(e);
                        }
                    }
                }

                if attempt < self.attempts_per_mirror && !self.retry_delay.is_zero() {
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }

        Err(challenged
            .or(last)
            .unwrap_or(TransportError::NotConfigured("no RSSHub mirrors")))
    }
}
