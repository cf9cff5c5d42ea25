//! Turning whatever the user typed into a verdict on whether it is a feed.
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use super::discovery::{confirmed, DiscoveredFeed, Discovery, DiscoveryError};
use super::parser::{normalize, FeedMetadata};
use super::rsshub::is_rsshub_url;
use super::transport::{CascadeError, FeedTransport, Route};
use crate::config::Config;
use crate::util::{normalize_input_url, validate_url, UrlValidationError};

/// Why an address was rejected. Each message tells the user what to try next.
#[derive(Debug, Error)]
pub enum ValidationFailure {
    #[error("{0}. Check the address and try again")]
    InvalidFormat(#[from] UrlValidationError),

    #[error("No RSS or Atom feed found at this site ({0} addresses tried). Paste the feed URL directly if you know it")]
    NoFeedFound(usize),

    #[error("The site blocked automated access (anti-bot challenge). Try again later or configure a proxy")]
    Blocked,

    #[error("Could not reach the address: {0}")]
    Unreachable(String),

    #[error("The address responded but is not an RSS or Atom feed{0}")]
    NotAFeed(String),
}

impl ValidationFailure {
    /// Stable identifier for machine consumers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidFormat(_) => "invalidFormat",
            Self::NoFeedFound(_) => "noFeedFound",
            Self::Blocked => "blocked",
            Self::Unreachable(_) => "unreachable",
            Self::NotAFeed(_) => "notAFeed",
        }
    }

    fn from_cascade(err: &CascadeError) -> Self {
        if err.is_blocked() {
            Self::Blocked
        } else if err.answered_without_feed() {
            Self::NotAFeed(String::new())
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}

/// Outcome of validating one address.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub is_url_changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FeedMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempted_paths: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

impl ValidationReport {
    fn found(input: &Url, feed: DiscoveredFeed) -> Self {
        Self {
            valid: true,
            is_url_changed: feed.url != input.as_str(),
            url: Some(feed.url),
            metadata: Some(feed.metadata),
            warning: feed.warning,
            ..Self::default()
        }
    }

    fn failed(failure: ValidationFailure) -> Self {
        Self {
            valid: false,
            error: Some(failure.to_string()),
            error_kind: Some(failure.kind()),
            ..Self::default()
        }
    }
}

pub struct Validator {
    transport: Arc<dyn FeedTransport>,
    discovery: Discovery,
    rsshub_hosts: Vec<String>,
    allow_private: bool,
}

impl Validator {
    pub fn new(transport: Arc<dyn FeedTransport>, config: &Config) -> Self {
        Self {
            discovery: Discovery::new(transport.clone(), config),
            transport,
            rsshub_hosts: config.rsshub.hosts.clone(),
            allow_private: config.allow_private_hosts,
        }
    }

    /// Validates `raw`, searching the site for its feed when `auto_discover`
    /// is set and the address is not itself an RSSHub route.
    pub async fn validate(&self, raw: &str, auto_discover: bool) -> ValidationReport {
        let url = match normalize_input_url(raw).and_then(|s| validate_url(&s, self.allow_private)) {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!(input = %raw, error = %e, "Rejected feed address");
                return ValidationReport::failed(e.into());
            }
        };

        if is_rsshub_url(url.as_str(), &self.rsshub_hosts) {
            return self.check_single(&url, Route::RssHub).await;
        }
        if !auto_discover {
            return self.check_single(&url, Route::ProxiedFirst).await;
        }

        match self.discovery.discover(&url).await {
            Ok(feed) => ValidationReport::found(&url, feed),
            Err(DiscoveryError::NoFeedFound {
                attempted_paths,
                blocked,
            }) => {
                let failure = if blocked {
                    ValidationFailure::Blocked
                } else {
                    ValidationFailure::NoFeedFound(attempted_paths.len())
                };
                ValidationReport {
                    attempted_paths: Some(attempted_paths),
                    ..ValidationReport::failed(failure)
                }
            }
        }
    }

    async fn check_single(&self, url: &Url, route: Route) -> ValidationReport {
        let payload = match self.transport.fetch(url.as_str(), route).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Feed address unreachable");
                return ValidationReport::failed(ValidationFailure::from_cascade(&e));
            }
        };

        let parsed = normalize(&payload.body, "");
        let parse_error = parsed.error.clone();
        match confirmed(url.as_str(), parsed) {
            Some(feed) => ValidationReport::found(url, feed),
            None => ValidationReport::failed(ValidationFailure::NotAFeed(
                parse_error.map(|e| format!(" ({})", e)).unwrap_or_default(),
            )),
        }
    }
}
