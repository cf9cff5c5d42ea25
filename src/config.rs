//! Configuration file parser for ~/.config/feedpulse/config.toml.
//!
//! The config file is optional: a missing or empty file yields
//! `Config::default()`. Every section is `#[serde(default)]`, so any subset of
//! keys may be given. Unknown keys are accepted but logged, since they are
//! usually typos.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Defaults
// ============================================================================

/// Browser identities rotated by the direct strategy.
pub const DEFAULT_USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

/// Conventional feed locations probed during discovery, relative to the site origin.
pub const DEFAULT_FEED_PATHS: [&str; 12] = [
    "/feed",
    "/rss",
    "/rss.xml",
    "/feed.xml",
    "/atom.xml",
    "/index.xml",
    "/feed/",
    "/rss/",
    "/?feed=rss2",
    "/?feed=atom",
    "/feeds/posts/default",
    "/blog/feed",
];

/// Text that only a challenge interstitial carries. Vendor names alone are
/// not enough: ordinary pages load scripts from their CDNs.
pub const DEFAULT_CHALLENGE_MARKERS: [&str; 4] = [
    "<title>Just a moment...</title>",
    "Checking your browser",
    "challenge-platform",
    "cf-browser-verification",
];

// ============================================================================
// Configuration Structs
// ============================================================================

/// A third-party relay reached by substituting the target into `template`.
///
/// `{url}` is replaced by the percent-encoded target and `{raw_url}` by the
/// target as-is. A template with neither placeholder gets the encoded target
/// appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayMirror {
    pub name: String,
    pub template: String,
}

impl RelayMirror {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
        }
    }

    /// Builds the relay request URL for `target`.
    pub fn expand(&self, target: &str) -> String {
        let encoded = urlencoding::encode(target);
        if self.template.contains("{url}") || self.template.contains("{raw_url}") {
            self.template
                .replace("{raw_url}", target)
                .replace("{url}", &encoded)
        } else {
            format!("{}{}", self.template, encoded)
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file. Defaults to `feedpulse.db` in the config directory.
    pub database_path: Option<PathBuf>,

    /// Base URL of a running same-origin proxy (`feedpulse serve-proxy`).
    /// When unset, the proxy strategy is left out of every cascade.
    pub proxy_base_url: Option<String>,

    /// Permit localhost and private-network feed URLs.
    pub allow_private_hosts: bool,

    pub transport: TransportConfig,
    pub rsshub: RssHubConfig,
    pub discovery: DiscoveryConfig,
    pub scheduler: SchedulerConfig,
    pub favicon: FaviconConfig,
    pub hot: HotTopicConfig,
    pub proxy: ProxyServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            proxy_base_url: None,
            allow_private_hosts: false,
            transport: TransportConfig::default(),
            rsshub: RssHubConfig::default(),
            discovery: DiscoveryConfig::default(),
            scheduler: SchedulerConfig::default(),
            favicon: FaviconConfig::default(),
            hot: HotTopicConfig::default(),
            proxy: ProxyServerConfig::default(),
        }
    }
}

/// Direct, proxy and relay strategy settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub direct_timeout_secs: u64,
    pub proxy_timeout_secs: u64,
    pub relay_timeout_secs: u64,
    pub user_agents: Vec<String>,
    /// Tried in order after the direct and proxy strategies.
    pub relays: Vec<RelayMirror>,
    /// Relay and RSSHub bodies shorter than this are rejected.
    pub min_body_len: usize,
    pub challenge_markers: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            direct_timeout_secs: 30,
            proxy_timeout_secs: 35,
            relay_timeout_secs: 30,
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            relays: vec![
                RelayMirror::new("allorigins", "https://api.allorigins.win/raw?url={url}"),
                RelayMirror::new("corsproxy", "https://corsproxy.io/?{url}"),
                RelayMirror::new("codetabs", "https://api.codetabs.com/v1/proxy?quest={url}"),
            ],
            min_body_len: 100,
            challenge_markers: DEFAULT_CHALLENGE_MARKERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl TransportConfig {
    pub fn direct_timeout(&self) -> Duration {
        Duration::from_secs(self.direct_timeout_secs)
    }

    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy_timeout_secs)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_timeout_secs)
    }
}

/// The dedicated path for RSSHub-style endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RssHubConfig {
    /// Hosts treated as RSSHub besides any host containing "rsshub".
    pub hosts: Vec<String>,
    /// Ranked mirrors; `{raw_url}` alone means "fetch the instance itself".
    pub mirrors: Vec<RelayMirror>,
    pub timeout_secs: u64,
    pub attempts_per_mirror: u32,
    pub retry_delay_ms: u64,
    pub user_agent: String,
}

impl Default for RssHubConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["rsshub.app".to_string()],
            mirrors: vec![
                RelayMirror::new("origin", "{raw_url}"),
                RelayMirror::new("allorigins", "https://api.allorigins.win/raw?url={url}"),
                RelayMirror::new("corsproxy", "https://corsproxy.io/?{url}"),
                RelayMirror::new("codetabs", "https://api.codetabs.com/v1/proxy?quest={url}"),
            ],
            timeout_secs: 45,
            attempts_per_mirror: 2,
            retry_delay_ms: 2000,
            user_agent: DEFAULT_USER_AGENTS[0].to_string(),
        }
    }
}

impl RssHubConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Candidates validated concurrently per batch.
    pub batch_size: usize,
    pub paths: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            batch_size: 6,
            paths: DEFAULT_FEED_PATHS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_concurrent_sources: usize,
    /// Whole-run attempts made by the retry wrapper.
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sources: 16,
            max_attempts: 3,
            backoff_base_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FaviconConfig {
    /// Probe URLs in order; `{domain}` is the site host without `www.`.
    pub providers: Vec<String>,
    pub timeout_secs: u64,
    pub cache_size: usize,
}

impl Default for FaviconConfig {
    fn default() -> Self {
        Self {
            providers: vec![
                "https://www.google.com/s2/favicons?domain={domain}&sz=64".to_string(),
                "https://icons.duckduckgo.com/ip3/{domain}.ico".to_string(),
                "https://{domain}/favicon.ico".to_string(),
            ],
            timeout_secs: 5,
            cache_size: 256,
        }
    }
}

impl FaviconConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HotTopicConfig {
    pub zhihu_api: String,
    pub weibo_api: String,
    pub timeout_secs: u64,
    pub zhihu_limit: usize,
    pub weibo_limit: usize,
    pub xiaohongshu_limit: usize,
}

impl Default for HotTopicConfig {
    fn default() -> Self {
        Self {
            zhihu_api: "https://www.zhihu.com/api/v3/feed/topstory/hot-lists/total".to_string(),
            weibo_api: "https://weibo.com/ajax/side/hotSearch".to_string(),
            timeout_secs: 10,
            zhihu_limit: 50,
            weibo_limit: 50,
            xiaohongshu_limit: 30,
        }
    }
}

impl HotTopicConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyServerConfig {
    pub listen: String,
    pub cache_max_age_secs: u64,
}

impl Default for ProxyServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8787".to_string(),
            cache_max_age_secs: 300,
        }
    }
}

const KNOWN_KEYS: [&str; 10] = [
    "database_path",
    "proxy_base_url",
    "allow_private_hosts",
    "transport",
    "rsshub",
    "discovery",
    "scheduler",
    "favicon",
    "hot",
    "proxy",
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text (empty text gives defaults).
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            relays = config.transport.relays.len(),
            proxy = config.proxy_base_url.as_deref().unwrap_or("-"),
            "Loaded configuration"
        );
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================
