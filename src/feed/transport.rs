//! Ordered fallback transports for fetching feed documents.
//!
//! Every way of getting bytes for a URL is a [`Strategy`] with the same
//! `fetch(url)` shape. A [`Cascade`] is an ordered list of strategies run by
//! [`first_success`]: each one fully resolves before the next starts, and the
//! caller only sees an error once all of them have failed.
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONTENT_TYPE, USER_AGENT};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::rsshub::{check_body, find_marker, inspect_body, BodyRules, Expect, RssHubStrategy};
use crate::config::{Config, RelayMirror};

/// Response bodies above this size are refused.
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

const FEED_ACCEPT: &str = "application/rss+xml, application/atom+xml, application/xml, text/xml, */*";
const ACCEPT_LANGUAGES: &str = "zh-CN,zh;q=0.9,en;q=0.8";

/// Statuses challenge interstitials are served with.
const INTERSTITIAL_STATUSES: [u16; 3] = [403, 429, 503];
/// Counted only alongside an interstitial status.
const INTERSTITIAL_HINT: &str = "cloudflare";
/// How much of a refused body is scanned for challenge signs.
const REFUSAL_SCAN_LIMIT: usize = 256 * 1024;

// ============================================================================
// Errors
// ============================================================================

/// Why a single strategy failed.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// The attempt exceeded its timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Fewer bytes arrived than Content-Length announced
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// 2xx with nothing but whitespace in the body
    #[error("Empty response body")]
    Empty,
    /// Relay answered with fewer bytes than any real feed has
    #[error("Response too short ({0} bytes)")]
    TooShort(usize),
    /// An anti-bot interstitial came back instead of content
    #[error("Blocked by bot challenge ({0})")]
    Challenge(String),
    /// 2xx, but the body carries no RSS/Atom markers
    #[error("Response is not a feed")]
    NotFeedShaped,
    /// The strategy has nothing to try (e.g. an empty mirror list)
    #[error("Not configured: {0}")]
    NotConfigured(&'static str),
}

impl TransportError {
    pub fn is_challenge(&self) -> bool {
        matches!(self, TransportError::Challenge(_))
    }

    pub fn is_not_feed(&self) -> bool {
        matches!(self, TransportError::NotFeedShaped)
    }
}

/// One failed strategy inside an exhausted cascade.
#[derive(Debug)]
pub struct StrategyFailure {
    pub strategy: String,
    pub error: TransportError,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.error)
    }
}

/// Terminal failure of a whole cascade.
#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("No transport strategies configured for {url}")]
    NoStrategies { url: String },

    #[error("All {} transport strategies failed for {url} ({})", .attempts.len(), summarize(.attempts))]
    Exhausted {
        url: String,
        attempts: Vec<StrategyFailure>,
    },
}

fn summarize(attempts: &[StrategyFailure]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CascadeError {
    /// Strategies attempted, in order.
    pub fn attempts(&self) -> &[StrategyFailure] {
        match self {
            CascadeError::NoStrategies { .. } => &[],
            CascadeError::Exhausted { attempts, .. } => attempts,
        }
    }

    /// True when any strategy ran into a bot challenge.
    pub fn is_blocked(&self) -> bool {
        self.attempts().iter().any(|a| a.error.is_challenge())
    }

    /// True when some strategy got a document that was not a feed.
    pub fn answered_without_feed(&self) -> bool {
        self.attempts().iter().any(|a| a.error.is_not_feed())
    }
}

// ============================================================================
// Strategy + combinator
// ============================================================================

/// Raw bytes from a successful strategy.
#[derive(Debug, Clone)]
pub struct Payload {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    /// Name of the strategy that produced the body.
    pub strategy: String,
}

/// One way of turning a URL into bytes.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, url: &str) -> Result<Payload, TransportError>;
}

/// Runs `strategies` strictly in order and returns the first success.
pub async fn first_success(
    strategies: &[Arc<dyn Strategy>],
    url: &str,
) -> Result<Payload, CascadeError> {
    if strategies.is_empty() {
        return Err(CascadeError::NoStrategies {
            url: url.to_string(),
        });
    }

    let mut attempts = Vec::new();
    for strategy in strategies {
        match strategy.fetch(url).await {
            Ok(payload) => {
                if !attempts.is_empty() {
                    tracing::info!(
                        url = %url,
                        strategy = %strategy.name(),
                        failed_before = attempts.len(),
                        "Fetched via fallback strategy"
                    );
                }
                return Ok(payload);
            }
            Err(error) => {
                tracing::warn!(
                    url = %url,
                    strategy = %strategy.name(),
                    error = %error,
                    "Transport strategy failed, trying next"
                );
                attempts.push(StrategyFailure {
                    strategy: strategy.name().to_string(),
                    error,
                });
            }
        }
    }

    Err(CascadeError::Exhausted {
        url: url.to_string(),
        attempts,
    })
}

/// Shared client for every strategy, favicon probe and hot-topic call.
/// Per-attempt deadlines are applied by the callers.
pub fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(redirect_policy())
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
}

fn redirect_policy() -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(|attempt| {
        if attempt.previous().len() >= 5 {
            return attempt.error("Too many redirects (max 5)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

/// An ordered strategy list.
#[derive(Clone, Default)]
pub struct Cascade {
    strategies: Vec<Arc<dyn Strategy>>,
}

impl Cascade {
    pub fn new(strategies: Vec<Arc<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn fetch(&self, url: &str) -> Result<Payload, CascadeError> {
        first_success(&self.strategies, url).await
    }
}

impl fmt::Debug for Cascade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Which strategy ordering to use for a request.
///
/// Page routes hand back any non-challenge document; feed routes require a
/// feed-shaped body from every strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// direct → same-origin proxy → relays, page bodies accepted (discovery)
    Standard,
    /// same-origin proxy → direct → relays, feeds only
    ProxiedFirst,
    /// RSSHub mirrors with browser headers and challenge rejection
    RssHub,
    /// direct → relays, page bodies accepted; what the proxy service itself uses
    Upstream,
}

/// Seam between callers and the network, so tests can swap in fakes.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn fetch(&self, url: &str, route: Route) -> Result<Payload, CascadeError>;
}

/// The production transport: one prebuilt [`Cascade`] per [`Route`].
#[derive(Debug, Clone)]
pub struct Transport {
    standard: Cascade,
    proxied_first: Cascade,
    rsshub: Cascade,
    upstream: Cascade,
}

impl Transport {
    /// Builds every route from configuration. The proxy strategy is only
    /// included when `proxy_base_url` is set.
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        let transport = &config.transport;
        let rules = BodyRules {
            min_len: transport.min_body_len,
            challenge_markers: transport.challenge_markers.clone(),
        };

        let direct = |expect: Expect| -> Arc<dyn Strategy> {
            Arc::new(DirectStrategy::new(
                client.clone(),
                transport.user_agents.clone(),
                transport.direct_timeout(),
                rules.challenge_markers.clone(),
                expect,
            ))
        };
        let proxy = |expect: Expect| -> Option<Arc<dyn Strategy>> {
            config.proxy_base_url.as_ref().map(|base| {
                Arc::new(ProxyStrategy::new(
                    client.clone(),
                    base.clone(),
                    transport.proxy_timeout(),
                    rules.challenge_markers.clone(),
                    expect,
                )) as Arc<dyn Strategy>
            })
        };

        let relays: Vec<Arc<dyn Strategy>> = transport
            .relays
            .iter()
            .map(|mirror| {
                Arc::new(RelayStrategy::new(
                    client.clone(),
                    mirror.clone(),
                    transport.user_agents.first().cloned(),
                    transport.relay_timeout(),
                    rules.clone(),
                )) as Arc<dyn Strategy>
            })
            .collect();

        let rsshub: Arc<dyn Strategy> =
            Arc::new(RssHubStrategy::new(client.clone(), &config.rsshub, rules.clone()));

        let chain = |head: Vec<Arc<dyn Strategy>>| {
            let mut list: Vec<Arc<dyn Strategy>> = head.into_iter().collect();
            list.extend(relays.iter().cloned());
            Cascade::new(list)
        };

        let standard = chain(
            [Some(direct(Expect::Page)), proxy(Expect::Page)]
                .into_iter()
                .flatten()
                .collect(),
        );
        let proxied_first = chain(
            [proxy(Expect::Feed), Some(direct(Expect::Feed))]
                .into_iter()
                .flatten()
                .collect(),
        );
        let upstream = chain(vec![direct(Expect::Page)]);

        Self {
            standard,
            proxied_first,
            rsshub: Cascade::new(vec![rsshub]),
            upstream,
        }
    }

    pub fn cascade(&self, route: Route) -> &Cascade {
        match route {
            Route::Standard => &self.standard,
            Route::ProxiedFirst => &self.proxied_first,
            Route::RssHub => &self.rsshub,
            Route::Upstream => &self.upstream,
        }
    }
}

#[async_trait]
impl FeedTransport for Transport {
    async fn fetch(&self, url: &str, route: Route) -> Result<Payload, CascadeError> {
        self.cascade(route).fetch(url).await
    }
}

// ============================================================================
// HTTP plumbing shared by the strategies
// ============================================================================

/// Sends `request` and reads the whole body under one timeout.
pub(crate) async fn execute(
    request: reqwest::RequestBuilder,
    timeout: Duration,
    challenge_markers: &[String],
) -> Result<(Vec<u8>, Option<String>), TransportError> {
    let exchange = async {
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(refusal(response, challenge_markers).await);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = read_limited_bytes(response, MAX_BODY_SIZE).await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(TransportError::Empty);
        }
        Ok((body, content_type))
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| TransportError::Timeout(timeout))?
}

/// Classifies a non-2xx answer. Only an interstitial status that also carries
/// challenge signs becomes [`TransportError::Challenge`].
async fn refusal(response: reqwest::Response, challenge_markers: &[String]) -> TransportError {
    let status = response.status().as_u16();
    if !INTERSTITIAL_STATUSES.contains(&status) {
        return TransportError::HttpStatus(status);
    }
    if response.headers().contains_key("cf-mitigated") {
        return TransportError::Challenge("cf-mitigated".to_string());
    }

    let Ok(body) = read_limited_bytes(response, REFUSAL_SCAN_LIMIT).await else {
        return TransportError::HttpStatus(status);
    };
    let lower = String::from_utf8_lossy(&body).to_lowercase();
    match find_marker(&lower, challenge_markers) {
        Some(marker) => TransportError::Challenge(marker.to_string()),
        None if lower.contains(INTERSTITIAL_HINT) => {
            TransportError::Challenge(format!("{} {}", status, INTERSTITIAL_HINT))
        }
        None => TransportError::HttpStatus(status),
    }
}

/// Streams a response body, refusing anything above `limit` and anything
/// shorter than its announced Content-Length.
pub(crate) async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, TransportError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(TransportError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(TransportError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(TransportError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

fn feed_headers(request: reqwest::RequestBuilder, user_agent: Option<&str>) -> reqwest::RequestBuilder {
    let request = request
        .header(ACCEPT, FEED_ACCEPT)
        .header(ACCEPT_LANGUAGE, ACCEPT_LANGUAGES)
        .header(CACHE_CONTROL, "no-cache");
    match user_agent {
        Some(ua) => request.header(USER_AGENT, ua),
        None => request,
    }
}

// ============================================================================
// Strategies
// ============================================================================

/// Fetches the target itself, once per configured User-Agent.
pub struct DirectStrategy {
    client: reqwest::Client,
    user_agents: Vec<String>,
    timeout: Duration,
    challenge_markers: Vec<String>,
    expect: Expect,
}

impl DirectStrategy {
    pub fn new(
        client: reqwest::Client,
        user_agents: Vec<String>,
        timeout: Duration,
        challenge_markers: Vec<String>,
        expect: Expect,
    ) -> Self {
        Self {
            client,
            user_agents,
            timeout,
            challenge_markers,
            expect,
        }
    }

    async fn attempt(&self, url: &str, user_agent: Option<&str>) -> Result<Payload, TransportError> {
        let request = feed_headers(self.client.get(url), user_agent);
        let (body, content_type) = execute(request, self.timeout, &self.challenge_markers).await?;
        check_body(&body, &self.challenge_markers, self.expect)?;
        Ok(Payload {
            body,
            content_type,
            strategy: self.name().to_string(),
        })
    }
}

#[async_trait]
impl Strategy for DirectStrategy {
    fn name(&self) -> &str {
        "direct"
    }

    async fn fetch(&self, url: &str) -> Result<Payload, TransportError> {
        if self.user_agents.is_empty() {
            return self.attempt(url, None).await;
        }

        let mut challenged = None;
        let mut last = None;
        for (idx, ua) in self.user_agents.iter().enumerate() {
            match self.attempt(url, Some(ua)).await {
                Ok(payload) => return Ok(payload),
                // A missing resource stays missing whatever the client claims to be
                Err(TransportError::HttpStatus(status @ (404 | 410))) => {
                    return Err(TransportError::HttpStatus(status))
                }
                Err(TransportError::NotFeedShaped) => return Err(TransportError::NotFeedShaped),
                Err(e) => {
                    tracing::debug!(url = %url, agent = idx, error = %e, "Direct attempt failed");
                    if e.is_challenge() {
                        challenged = Some(e);
                    } else {
                        last = Some(e);
                    }
                }
            }
        }

        Err(challenged
            .or(last)
            .unwrap_or(TransportError::NotConfigured("no user agents")))
    }
}

/// Routes the request through a same-origin `GET /api/proxy?url=` endpoint.
pub struct ProxyStrategy {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    challenge_markers: Vec<String>,
    expect: Expect,
}

impl ProxyStrategy {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        timeout: Duration,
        challenge_markers: Vec<String>,
        expect: Expect,
    ) -> Self {
        Self {
            client,
            base_url,
            timeout,
            challenge_markers,
            expect,
        }
    }

    pub fn endpoint_for(&self, target: &str) -> String {
        format!(
            "{}/api/proxy?url={}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(target)
        )
    }
}

#[async_trait]
impl Strategy for ProxyStrategy {
    fn name(&self) -> &str {
        "proxy"
    }

    async fn fetch(&self, url: &str) -> Result<Payload, TransportError> {
        let request = self.client.get(self.endpoint_for(url));
        let (body, content_type) = execute(request, self.timeout, &self.challenge_markers).await?;
        check_body(&body, &self.challenge_markers, self.expect)?;
        Ok(Payload {
            body,
            content_type,
            strategy: self.name().to_string(),
        })
    }
}

/// A public CORS relay. Its answers are untrusted: short, challenge-shaped or
/// feed-less bodies count as failures.
pub struct RelayStrategy {
    client: reqwest::Client,
    mirror: RelayMirror,
    user_agent: Option<String>,
    timeout: Duration,
    rules: BodyRules,
}

impl RelayStrategy {
    pub fn new(
        client: reqwest::Client,
        mirror: RelayMirror,
        user_agent: Option<String>,
        timeout: Duration,
        rules: BodyRules,
    ) -> Self {
        Self {
            client,
            mirror,
            user_agent,
            timeout,
            rules,
        }
    }
}

#[async_trait]
impl Strategy for RelayStrategy {
    fn name(&self) -> &str {
        &self.mirror.name
    }

    async fn fetch(&self, url: &str) -> Result<Payload, TransportError> {
        let request = feed_headers(
            self.client.get(self.mirror.expand(url)),
            self.user_agent.as_deref(),
        );
        let (body, content_type) = execute(request, self.timeout, &self.rules.challenge_markers).await?;
        inspect_body(&body, &self.rules)?;
        Ok(Payload {
            body,
            content_type,
            strategy: self.mirror.name.clone(),
        })
    }
}
