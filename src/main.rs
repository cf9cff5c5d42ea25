use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use feedpulse::config::Config;
use feedpulse::feed::{
    http_client, refresh_missing_favicons, FaviconResolver, FeedTransport, Scheduler, Transport,
    Validator,
};
use feedpulse::hot::HotTopics;
use feedpulse::proxy::{self, ProxyState};
use feedpulse::storage::{Database, DatabaseError, NewSource, Source, SourceKind};
use feedpulse::util::{display_width, truncate_to_width};

/// Get the config directory path (~/.config/feedpulse/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedpulse"))
}

/// Creates the directory with user-only permissions.
fn ensure_private_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)) {
            tracing::warn!(path = %dir.display(), error = %e, "Failed to set directory permissions to 0700");
        }
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "feedpulse", about = "Feed discovery, resilient fetching and deduplicated storage")]
struct Args {
    /// Config file (default: ~/.config/feedpulse/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether an address is (or leads to) a feed, printing the report as JSON
    Validate {
        input: String,
        /// Only try the address itself
        #[arg(long)]
        no_discover: bool,
    },
    /// Validate an address and subscribe to the feed it resolves to
    Add {
        input: String,
        /// Display name (default: the feed title)
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        no_discover: bool,
    },
    /// Subscribe to a hot-topic list: zhihu, weibo, xiaohongshu or forum
    AddHot {
        kind: SourceKind,
        #[arg(long)]
        name: Option<String>,
        /// Xiaohongshu category: design, tech, product, ai or all
        #[arg(long)]
        category: Option<String>,
    },
    /// List sources
    Sources {
        #[arg(long)]
        json: bool,
    },
    /// Delete a source and its items
    Remove { id: i64 },
    /// Include a source in fetch cycles again
    Enable { id: i64 },
    /// Skip a source in fetch cycles
    Disable { id: i64 },
    /// Fetch every enabled source once, printing the summary as JSON
    Fetch {
        /// Fail on the first cycle error instead of retrying
        #[arg(long)]
        no_retry: bool,
    },
    /// Show stored items, newest first
    Items {
        #[arg(long)]
        source: Option<i64>,
        #[arg(long, default_value_t = 30)]
        limit: i64,
        #[arg(long)]
        json: bool,
    },
    /// Look up icons for sources that have none
    Favicons,
    /// Run the same-origin feed proxy
    ServeProxy {
        /// Listen address (default from config, 127.0.0.1:8787)
        #[arg(long)]
        listen: Option<String>,
    },
}

struct Services {
    config: Config,
    client: reqwest::Client,
    transport: Arc<Transport>,
}

impl Services {
    fn new(config: Config) -> Result<Self> {
        let client = http_client().context("Failed to build HTTP client")?;
        let transport = Arc::new(Transport::new(client.clone(), &config));
        Ok(Self {
            config,
            client,
            transport,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so JSON on stdout stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = match args.db.clone().or_else(|| config.database_path.clone()) {
        Some(path) => path,
        None => {
            ensure_private_dir(&config_dir)?;
            config_dir.join("feedpulse.db")
        }
    };

    let ctx = Services::new(config)?;

    match args.command {
        Command::Validate { input, no_discover } => {
            let validator = Validator::new(ctx.transport.clone(), &ctx.config);
            let report = validator.validate(&input, !no_discover).await;
            print_json(&report)?;
        }
        Command::Add {
            input,
            name,
            no_discover,
        } => {
            let db = open_db(&db_path).await?;
            add_feed(&ctx, &db, &input, name, !no_discover).await?;
        }
        Command::AddHot {
            kind,
            name,
            category,
        } => {
            if kind == SourceKind::Rss {
                anyhow::bail!("Use `feedpulse add <url>` for RSS sources");
            }
            let db = open_db(&db_path).await?;
            let mut source = NewSource::hot_topic(name.unwrap_or_else(|| default_hot_name(kind)), kind);
            source.category = category;
            let source = db
                .add_source(&source)
                .await
                .context("Failed to save source")?;
            println!("Added {} source #{}: {}", source.kind, source.id, source.name);
        }
        Command::Sources { json } => {
            let db = open_db(&db_path).await?;
            let sources = db.list_sources().await.context("Failed to list sources")?;
            if json {
                print_json(&sources)?;
            } else {
                print_sources(&sources);
            }
        }
        Command::Remove { id } => {
            let db = open_db(&db_path).await?;
            if db.delete_source(id).await.context("Failed to delete source")? {
                println!("Removed source #{}", id);
            } else {
                anyhow::bail!("No source with id {}", id);
            }
        }
        Command::Enable { id } => set_enabled(&db_path, id, true).await?,
        Command::Disable { id } => set_enabled(&db_path, id, false).await?,
        Command::Fetch { no_retry } => {
            let db = Arc::new(open_db(&db_path).await?);
            let resolver = FaviconResolver::new(ctx.client.clone(), &ctx.config.favicon);
            let scheduler = Scheduler::new(
                db,
                ctx.transport.clone(),
                HotTopics::new(ctx.client.clone(), &ctx.config.hot),
                &ctx.config,
            )
            .with_favicons(Arc::new(resolver));

            let summary = if no_retry {
                scheduler.fetch_all().await
            } else {
                scheduler.run_with_retry().await
            }
            .context("Fetch cycle failed")?;
            print_json(&summary)?;
        }
        Command::Items {
            source,
            limit,
            json,
        } => {
            let db = open_db(&db_path).await?;
            let items = db
                .list_items(source, limit)
                .await
                .context("Failed to list items")?;
            if json {
                print_json(&items)?;
            } else {
                for stored in &items {
                    let item = &stored.item;
                    println!(
                        "{}  {}  {}",
                        item.publish_time.format("%Y-%m-%d %H:%M"),
                        pad(&item.source_name, 16),
                        truncate_to_width(&item.title, 80)
                    );
                    if let Some(link) = &item.link {
                        println!("{:18}{}", "", link);
                    }
                }
            }
        }
        Command::Favicons => {
            let db = open_db(&db_path).await?;
            let resolver = FaviconResolver::new(ctx.client.clone(), &ctx.config.favicon);
            let refresh = refresh_missing_favicons(&db, &resolver)
                .await
                .context("Failed to store favicons")?;
            println!(
                "Resolved {} favicons, {} unresolved",
                refresh.resolved, refresh.unresolved
            );
        }
        Command::ServeProxy { listen } => {
            let addr = listen.unwrap_or_else(|| ctx.config.proxy.listen.clone());
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind {}", addr))?;
            let transport: Arc<dyn FeedTransport> = ctx.transport.clone();
            proxy::serve(listener, ProxyState::new(transport, &ctx.config))
                .await
                .context("Proxy server failed")?;
        }
    }

    Ok(())
}

async fn open_db(path: &Path) -> Result<Database> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    match Database::open(path_str).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::InstanceLocked) => {
            anyhow::bail!("The database at {} is locked by another process", path.display())
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

async fn set_enabled(db_path: &Path, id: i64, enabled: bool) -> Result<()> {
    let db = open_db(db_path).await?;
    if !db
        .set_source_enabled(id, enabled)
        .await
        .context("Failed to update source")?
    {
        anyhow::bail!("No source with id {}", id);
    }
    println!("Source #{} {}", id, if enabled { "enabled" } else { "disabled" });
    Ok(())
}

async fn add_feed(
    ctx: &Services,
    db: &Database,
    input: &str,
    name: Option<String>,
    auto_discover: bool,
) -> Result<()> {
    let validator = Validator::new(ctx.transport.clone(), &ctx.config);
    let report = validator.validate(input, auto_discover).await;

    let (Some(url), true) = (report.url.as_deref(), report.valid) else {
        print_json(&report)?;
        anyhow::bail!(
            "{}",
            report.error.as_deref().unwrap_or("Address is not a feed")
        );
    };

    if let Some(existing) = db
        .find_rss_source_by_url(url)
        .await
        .context("Failed to look up existing sources")?
    {
        println!("Already subscribed as source #{}: {}", existing.id, existing.name);
        return Ok(());
    }

    if report.is_url_changed {
        println!("Found feed at {}", url);
    }
    if let Some(warning) = &report.warning {
        eprintln!("Warning: {}", warning);
    }

    let title = report
        .metadata
        .as_ref()
        .map(|m| m.title.clone())
        .unwrap_or_else(|| url.to_string());
    let mut source = NewSource::rss(name.unwrap_or(title), url);
    let resolver = FaviconResolver::new(ctx.client.clone(), &ctx.config.favicon);
    source.favicon_url = resolver.resolve(url).await;

    let source = db
        .add_source(&source)
        .await
        .context("Failed to save source")?;
    println!("Added source #{}: {}", source.id, source.name);
    Ok(())
}

fn default_hot_name(kind: SourceKind) -> String {
    match kind {
        SourceKind::Zhihu => "知乎热榜".to_string(),
        SourceKind::Weibo => "微博热搜".to_string(),
        SourceKind::Xiaohongshu => "小红书".to_string(),
        other => other.to_string(),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to encode JSON")?;
    println!("{}", text);
    Ok(())
}

/// Pads or truncates to exactly `width` terminal columns.
fn pad(s: &str, width: usize) -> String {
    let cut = truncate_to_width(s, width);
    let fill = width.saturating_sub(display_width(&cut));
    format!("{}{}", cut, " ".repeat(fill))
}

fn print_sources(sources: &[Source]) {
    if sources.is_empty() {
        println!("No sources yet. Add one with `feedpulse add <url>`.");
        return;
    }
    for source in sources {
        let fetched = source
            .last_fetched
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:>4}  {}  {:<11}  {}{}  {}",
            source.id,
            pad(&source.name, 24),
            source.kind.as_str(),
            if source.enabled { "" } else { "[off] " },
            fetched,
            source.url.as_deref().unwrap_or("-")
        );
        if let Some(error) = &source.last_error {
            println!("{:6}error: {}", "", truncate_to_width(error, 100));
        }
    }
}
