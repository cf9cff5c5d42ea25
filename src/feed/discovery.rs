//! Finding the feed behind a website address.
//!
//! Users tend to paste a blog's home page rather than its feed. Discovery
//! probes the address itself plus a list of conventional feed paths on the
//! same origin, a batch at a time, and accepts the first candidate (in list
//! order) that parses to a feed with a title.
use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use super::parser::{normalize, FeedMetadata, ParsedFeed};
use super::transport::{FeedTransport, Route};
use crate::config::Config;
use crate::util::{origin_of, strip_control_chars, validate_url};

/// A confirmed feed address with the metadata read from it.
#[derive(Debug, Clone)]
pub struct DiscoveredFeed {
    /// URL of the RSS/Atom feed itself
    pub url: String,
    pub metadata: FeedMetadata,
    /// Set when the feed exists but has no readable entries
    pub warning: Option<String>,
    pub item_count: usize,
}

/// Errors that can occur during feed discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// No candidate produced a feed with a title
    #[error("no feed found after trying {} addresses", .attempted_paths.len())]
    NoFeedFound {
        attempted_paths: Vec<String>,
        /// The input address itself, or most candidates, answered with a
        /// bot challenge
        blocked: bool,
    },
}

enum Probe {
    Found(DiscoveredFeed),
    Missed { blocked: bool },
}

/// Probes candidate feed URLs through a [`FeedTransport`].
pub struct Discovery {
    transport: Arc<dyn FeedTransport>,
    paths: Vec<String>,
    batch_size: usize,
    allow_private: bool,
}

impl Discovery {
    pub fn new(transport: Arc<dyn FeedTransport>, config: &Config) -> Self {
        Self {
            transport,
            paths: config.discovery.paths.clone(),
            batch_size: config.discovery.batch_size.max(1),
            allow_private: config.allow_private_hosts,
        }
    }

    /// The input URL first, then `origin + path` for each conventional path,
    /// without duplicates.
    pub fn candidates(&self, url: &Url) -> Vec<String> {
        let origin = origin_of(url);
        let mut candidates = vec![url.to_string()];
        for path in &self.paths {
            let candidate = format!("{}{}", origin, path);
            if !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
        candidates
    }

    /// Returns the first candidate, in list order, that is a feed.
    ///
    /// Candidates within a batch are fetched concurrently; batches run one
    /// after another and later batches are skipped once a batch has a hit.
    pub async fn discover(&self, url: &Url) -> Result<DiscoveredFeed, DiscoveryError> {
        let candidates = self.candidates(url);
        let mut input_blocked = false;
        let mut blocked_count = 0;

        for (batch_no, batch) in candidates.chunks(self.batch_size).enumerate() {
            tracing::debug!(url = %url, batch = batch_no, size = batch.len(), "Probing feed candidates");
            let probes = join_all(batch.iter().map(|candidate| self.probe(candidate))).await;

            for (offset, probe) in probes.into_iter().enumerate() {
                match probe {
                    Probe::Found(feed) => {
                        tracing::info!(url = %url, feed = %feed.url, title = %feed.metadata.title, "Discovered feed");
                        return Ok(feed);
                    }
                    Probe::Missed { blocked: true } => {
                        blocked_count += 1;
                        input_blocked |= batch_no == 0 && offset == 0;
                    }
                    Probe::Missed { blocked: false } => {}
                }
            }
        }

        // A challenge on a stray path next to plain 404s is not a blocked site
        let blocked = input_blocked || blocked_count * 2 > candidates.len();
        tracing::info!(url = %url, attempted = candidates.len(), blocked_count, blocked, "No feed found");
        Err(DiscoveryError::NoFeedFound {
            attempted_paths: candidates,
            blocked,
        })
    }

    async fn probe(&self, candidate: &str) -> Probe {
        let payload = match self.transport.fetch(candidate, Route::Standard).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(candidate = %candidate, error = %e, "Candidate unreachable");
                return Probe::Missed {
                    blocked: e.is_blocked(),
                };
            }
        };

        let parsed = normalize(&payload.body, "");
        if let Some(feed) = confirmed(candidate, parsed) {
            return Probe::Found(feed);
        }

        // An HTML page may advertise its feed; follow that link once.
        let html = String::from_utf8_lossy(&payload.body);
        let Some(advertised) = find_feed_link_in_html(&html, candidate) else {
            return Probe::Missed { blocked: false };
        };
        if advertised == candidate || validate_url(&advertised, self.allow_private).is_err() {
            return Probe::Missed { blocked: false };
        }

        tracing::debug!(candidate = %candidate, advertised = %advertised, "Following advertised feed link");
        match self.transport.fetch(&advertised, Route::ProxiedFirst).await {
            Ok(payload) => match confirmed(&advertised, normalize(&payload.body, "")) {
                Some(feed) => Probe::Found(feed),
                None => Probe::Missed { blocked: false },
            },
            Err(e) => Probe::Missed {
                blocked: e.is_blocked(),
            },
        }
    }
}

/// A parsed document counts as a feed once it has a title. Documents whose
/// entries could not be read, or that have none, pass with a warning.
pub(crate) fn confirmed(url: &str, parsed: ParsedFeed) -> Option<DiscoveredFeed> {
    let warning = feed_warning(&parsed);
    let item_count = parsed.items.len();
    let mut metadata = parsed.metadata?;

    metadata.title = strip_control_chars(&metadata.title).into_owned();
    if metadata.title.trim().is_empty() {
        return None;
    }

    Some(DiscoveredFeed {
        url: url.to_string(),
        metadata,
        warning,
        item_count,
    })
}

pub(crate) fn feed_warning(parsed: &ParsedFeed) -> Option<String> {
    if let Some(error) = &parsed.error {
        Some(format!("Feed found but its entries could not be read ({})", error))
    } else if parsed.items.is_empty() {
        Some("Feed has no entries yet".to_string())
    } else {
        None
    }
}

// ============================================================================
// HTML <link rel="alternate"> scanning
// ============================================================================

/// Scans HTML for `<link>` tags with `rel="alternate"` and RSS/Atom type attributes.
///
/// Uses simple string scanning (no HTML parser dependency). Handles attribute
/// ordering variations and resolves relative URLs against the base URL.
fn find_feed_link_in_html(html: &str, base_url: &str) -> Option<String> {
    // ASCII lowercasing keeps byte offsets aligned with the original
    let html_lower = html.to_ascii_lowercase();
    let mut search_from = 0;

    while let Some(link_start) = html_lower[search_from..].find("<link") {
        let abs_start = search_from + link_start;
        let remaining = &html_lower[abs_start..];

        let tag_end = match remaining.find('>') {
            Some(pos) => pos,
            None => break,
        };

        let tag = &remaining[..=tag_end];

        if contains_attr(tag, "rel", "alternate") && is_feed_type(tag) {
            // Extract href from the original HTML to preserve URL case
            let original_tag = &html[abs_start..abs_start + tag_end + 1];
            if let Some(href) = extract_attr_value(original_tag, "href") {
                return resolve_url(href, base_url);
            }
        }

        search_from = abs_start + tag_end + 1;
    }

    None
}

/// Checks if a lowercased tag contains an attribute with the given value.
fn contains_attr(tag: &str, attr_name: &str, attr_value: &str) -> bool {
    let pattern_double = format!("{attr_name}=\"{attr_value}\"");
    let pattern_single = format!("{attr_name}='{attr_value}'");
    tag.contains(&pattern_double) || tag.contains(&pattern_single)
}

fn is_feed_type(tag: &str) -> bool {
    tag.contains("application/rss+xml") || tag.contains("application/atom+xml")
}

/// Extracts the value of an attribute from a tag string (case-preserving).
fn extract_attr_value<'a>(tag: &'a str, attr_name: &str) -> Option<&'a str> {
    let tag_lower = tag.to_ascii_lowercase();
    let attr_prefix = format!("{attr_name}=");

    let attr_start = tag_lower.find(&attr_prefix)?;
    let rest = tag.get(attr_start + attr_prefix.len()..)?;
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }

    let inner = &rest[1..];
    let end = inner.find(quote)?;
    Some(&inner[..end])
}

/// Resolves a potentially relative URL against the page it appeared on.
fn resolve_url(href: &str, base_url: &str) -> Option<String> {
    let href = href.trim();
    if href.starts_with("//") {
        return Url::parse(&format!("https:{}", href)).ok().map(String::from);
    }
    let base = Url::parse(base_url).ok()?;
    base.join(href).ok().map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::testing::{FakeTransport, EXAMPLE_BLOG_RSS};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn discovery(transport: FakeTransport) -> (Discovery, Arc<FakeTransport>) {
        let transport = Arc::new(transport);
        (Discovery::new(transport.clone(), &Config::default()), transport)
    }

    fn feed_titled(title: &str) -> String {
        EXAMPLE_BLOG_RSS.replace("Example Blog", title)
    }

    #[test]
    fn test_candidates_order_and_count() {
        let (discovery, _) = discovery(FakeTransport::new());
        let url = Url::parse("https://notafeed.example").unwrap();
        let candidates = discovery.candidates(&url);

        assert_eq!(candidates.len(), 13);
        assert_eq!(candidates[0], "https://notafeed.example/");
        assert_eq!(candidates[1], "https://notafeed.example/feed");
        assert_eq!(candidates[9], "https://notafeed.example/?feed=rss2");
        assert_eq!(candidates[12], "https://notafeed.example/blog/feed");
    }

    #[test]
    fn test_candidates_deduplicate_input_path() {
        let (discovery, _) = discovery(FakeTransport::new());
        let url = Url::parse("https://blog.example/rss.xml").unwrap();
        let candidates = discovery.candidates(&url);
        assert_eq!(candidates.len(), 12);
        assert_eq!(candidates[0], "https://blog.example/rss.xml");
    }

    #[tokio::test]
    async fn test_input_url_that_is_a_feed() {
        let (discovery, transport) =
            discovery(FakeTransport::new().body("https://example.com/feed.xml", EXAMPLE_BLOG_RSS));
        let url = Url::parse("https://example.com/feed.xml").unwrap();

        let feed = discovery.discover(&url).await.unwrap();
        assert_eq!(feed.url, "https://example.com/feed.xml");
        assert_eq!(feed.metadata.title, "Example Blog");
        assert_eq!(feed.item_count, 1);
        assert_eq!(feed.warning, None);
        assert!(transport.calls().iter().all(|(_, route)| *route == Route::Standard));
    }

    #[tokio::test]
    async fn test_conventional_path_found() {
        let (discovery, _) =
            discovery(FakeTransport::new().body("https://example.com/feed", EXAMPLE_BLOG_RSS));
        let url = Url::parse("https://example.com").unwrap();

        let feed = discovery.discover(&url).await.unwrap();
        assert_eq!(feed.url, "https://example.com/feed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_order_wins_over_response_time() {
        // Candidate 1 (the input) fails, 2 is valid but slow, 3 is valid and fast.
        let (discovery, _) = discovery(
            FakeTransport::new()
                .slow_body("https://site.test/feed", &feed_titled("Slow B"), Duration::from_millis(500))
                .body("https://site.test/rss", &feed_titled("Fast C")),
        );
        let url = Url::parse("https://site.test/home").unwrap();

        let feed = discovery.discover(&url).await.unwrap();
        assert_eq!(feed.url, "https://site.test/feed");
        assert_eq!(feed.metadata.title, "Slow B");
    }

    #[tokio::test]
    async fn test_later_batches_skipped_after_hit() {
        let (discovery, transport) =
            discovery(FakeTransport::new().body("https://example.com/rss", EXAMPLE_BLOG_RSS));
        let url = Url::parse("https://example.com").unwrap();

        discovery.discover(&url).await.unwrap();
        // Batch size 6: only the first batch was probed
        assert_eq!(transport.calls().len(), 6);
    }

    #[tokio::test]
    async fn test_nothing_found_reports_every_candidate() {
        let (discovery, transport) = discovery(FakeTransport::new());
        let url = Url::parse("https://notafeed.example").unwrap();

        let err = discovery.discover(&url).await.unwrap_err();
        let DiscoveryError::NoFeedFound { attempted_paths, blocked } = err;
        assert_eq!(attempted_paths.len(), 13);
        assert!(!blocked);
        assert_eq!(transport.calls().len(), 13);
    }

    #[tokio::test]
    async fn test_blocked_input_address_is_reported() {
        let (discovery, _) = discovery(FakeTransport::new().blocked("https://walled.example/"));
        let url = Url::parse("https://walled.example").unwrap();

        let DiscoveryError::NoFeedFound { blocked, .. } = discovery.discover(&url).await.unwrap_err();
        assert!(blocked);
    }

    #[tokio::test]
    async fn test_one_challenged_path_among_404s_is_not_blocked() {
        let (discovery, _) = discovery(FakeTransport::new().blocked("https://walled.example/feed"));
        let url = Url::parse("https://walled.example").unwrap();

        let DiscoveryError::NoFeedFound { blocked, .. } = discovery.discover(&url).await.unwrap_err();
        assert!(!blocked);
    }

    #[tokio::test]
    async fn test_mostly_challenged_paths_are_blocked() {
        let mut transport = FakeTransport::new();
        for path in ["feed", "rss", "rss.xml", "feed.xml", "atom.xml", "index.xml", "feed/"] {
            transport = transport.blocked(&format!("https://walled.example/{}", path));
        }
        let (discovery, _) = discovery(transport);
        let url = Url::parse("https://walled.example").unwrap();

        let DiscoveryError::NoFeedFound { blocked, .. } = discovery.discover(&url).await.unwrap_err();
        assert!(blocked);
    }

    #[tokio::test]
    async fn test_advertised_link_is_fetched_as_feed() {
        let page = r#"<link rel="alternate" type="application/rss+xml" href="/posts.xml">"#;
        let (discovery, transport) = discovery(
            FakeTransport::new()
                .body("https://example.com/", page)
                .body("https://example.com/posts.xml", EXAMPLE_BLOG_RSS),
        );
        let url = Url::parse("https://example.com").unwrap();

        discovery.discover(&url).await.unwrap();
        let calls = transport.calls();
        assert!(calls.contains(&("https://example.com/".to_string(), Route::Standard)));
        assert!(calls.contains(&("https://example.com/posts.xml".to_string(), Route::ProxiedFirst)));
    }

    #[tokio::test]
    async fn test_unreadable_entries_pass_with_warning() {
        let broken = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Half Broken</title><item><title>x</titl"#;
        let (discovery, _) = discovery(FakeTransport::new().body("https://example.com/feed", broken));
        let url = Url::parse("https://example.com").unwrap();

        let feed = discovery.discover(&url).await.unwrap();
        assert_eq!(feed.metadata.title, "Half Broken");
        assert!(feed.warning.unwrap().contains("could not be read"));
    }

    #[tokio::test]
    async fn test_empty_feed_passes_with_warning() {
        let empty = r#"<rss version="2.0"><channel><title>Quiet Blog</title></channel></rss>"#;
        let (discovery, _) = discovery(FakeTransport::new().body("https://example.com/atom.xml", empty));
        let url = Url::parse("https://example.com").unwrap();

        let feed = discovery.discover(&url).await.unwrap();
        assert_eq!(feed.url, "https://example.com/atom.xml");
        assert_eq!(feed.warning.as_deref(), Some("Feed has no entries yet"));
    }

    #[tokio::test]
    async fn test_follows_advertised_link() {
        let page = r#"<html><head>
            <link rel="alternate" type="application/atom+xml" href="/posts.atom">
        </head><body>Welcome</body></html>"#;
        let (discovery, _) = discovery(
            FakeTransport::new()
                .body("https://example.com/", page)
                .body("https://example.com/posts.atom", EXAMPLE_BLOG_RSS),
        );
        let url = Url::parse("https://example.com").unwrap();

        let feed = discovery.discover(&url).await.unwrap();
        assert_eq!(feed.url, "https://example.com/posts.atom");
    }

    #[test]
    fn test_find_rss_link_in_html() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/rss+xml" href="https://example.com/feed.xml">
        </head></html>"#;
        assert_eq!(
            find_feed_link_in_html(html, "https://example.com").as_deref(),
            Some("https://example.com/feed.xml")
        );
    }

    #[test]
    fn test_find_feed_link_reversed_attrs_single_quotes() {
        let html = "<link href='/Atom.XML' type='application/atom+xml' rel='alternate'>";
        assert_eq!(
            find_feed_link_in_html(html, "https://example.com/blog/").as_deref(),
            Some("https://example.com/Atom.XML")
        );
    }

    #[test]
    fn test_find_feed_link_with_non_ascii_page() {
        let html = "<title>İstanbul günlüğü</title><link rel=\"alternate\" type=\"application/rss+xml\" href=\"/rss\">";
        assert_eq!(
            find_feed_link_in_html(html, "https://example.com").as_deref(),
            Some("https://example.com/rss")
        );
    }

    #[test]
    fn test_no_feed_link_in_html() {
        let html = r#"<link rel="stylesheet" href="/style.css">"#;
        assert_eq!(find_feed_link_in_html(html, "https://example.com"), None);
    }

    #[test]
    fn test_resolve_protocol_relative_and_relative() {
        assert_eq!(
            resolve_url("//cdn.example.com/feed", "https://example.com").as_deref(),
            Some("https://cdn.example.com/feed")
        );
        assert_eq!(
            resolve_url("feed.xml", "https://example.com/blog/").as_deref(),
            Some("https://example.com/blog/feed.xml")
        );
    }
}
