use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use feedsync::config::Config;
use feedsync::feed::HttpFetcher;
use feedsync::storage::{ArticleRecord, ArticleRepository};
use feedsync::sync::{SyncPipeline, SyncSummary};
use feedsync::util::validate_feed_url;

/// Upper bound for `list --limit`; the store caps it again.
const MAX_LIST_LIMIT: i64 = 2000;

#[derive(Parser, Debug)]
#[command(
    name = "feedsync",
    version,
    about = "Pull an RSS feed into a SQLite article collection",
    after_help = "Example:\n  FEEDSYNC_DATABASE_URL=sqlite:articles.db feedsync sync \
                  https://feeds.elpais.com/mrss-s/pages/ep/site/elpais.com/portada"
)]
struct Args {
    /// Config file (optional; missing file means defaults)
    #[arg(long, value_name = "FILE", default_value = "feedsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a feed once and upsert its items
    Sync {
        /// Feed URL (http or https)
        url: String,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,

        /// Allow localhost and private network addresses
        #[arg(long)]
        allow_private: bool,
    },
    /// List the most recently published stored articles
    List {
        #[arg(long, short = 'n', default_value_t = 20)]
        limit: i64,

        #[arg(long)]
        json: bool,
    },
    /// Show one stored article by identifier
    Show {
        identifier: String,

        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    config
        .apply_env()
        .context("Invalid environment override")?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("Invalid log_level in config")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!(path = %args.config.display(), collection = %config.collection, "Configuration loaded");
    config.warn_unknown_keys();
    tracing::debug!(config = ?config, "Configuration resolved");

    // Everything below needs the store; fail before touching the network.
    let store_config = config.store_config()?;

    let feed_url = match &args.command {
        Command::Sync {
            url, allow_private, ..
        } => Some(validate_feed_url(url, *allow_private)?),
        _ => None,
    };

    let repo = ArticleRepository::connect(&store_config)
        .await
        .context("Failed to open article store")?;

    let result = run_command(&args.command, &config, &repo, feed_url).await;
    repo.close().await;

    if !result? {
        std::process::exit(1);
    }
    Ok(())
}

/// Returns false when the process should exit non-zero.
async fn run_command(
    command: &Command,
    config: &Config,
    repo: &ArticleRepository,
    feed_url: Option<url::Url>,
) -> Result<bool> {
    match command {
        Command::Sync { json, .. } => {
            let url = feed_url.context("Missing feed URL")?;
            let fetcher = HttpFetcher::new(&config.fetch).context("Failed to build HTTP client")?;
            let pipeline = SyncPipeline::new(fetcher, repo.clone())
                .with_concurrency(config.sync.concurrency);

            let summary = pipeline.run(url.as_str()).await;
            if *json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
            Ok(summary.is_success())
        }
        Command::List { limit, json } => {
            let articles = repo
                .list_recent((*limit).clamp(1, MAX_LIST_LIMIT))
                .await
                .context("Failed to list articles")?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&articles)?);
            } else if articles.is_empty() {
                println!("No articles in collection '{}'", repo.collection());
            } else {
                for article in &articles {
                    println!(
                        "{:<25}  {}  {}",
                        article.published_at, article.identifier, article.title
                    );
                }
            }
            Ok(true)
        }
        Command::Show { identifier, json } => {
            let article = repo
                .get(identifier)
                .await
                .with_context(|| format!("Failed to load article '{}'", identifier))?;
            match article {
                Some(article) if *json => {
                    println!("{}", serde_json::to_string_pretty(&article)?);
                    Ok(true)
                }
                Some(article) => {
                    print_article(&article);
                    Ok(true)
                }
                None => {
                    eprintln!("Error: no article with identifier '{}'", identifier);
                    Ok(false)
                }
            }
        }
    }
}

fn print_summary(summary: &SyncSummary) {
    match &summary.error {
        Some(e) => {
            eprintln!("Error: sync of {} failed: {}", summary.url, e);
        }
        None => {
            println!(
                "Synced {}: {} items ({} inserted, {} updated, {} unchanged, {} failed)",
                summary.url,
                summary.fetched,
                summary.inserted,
                summary.updated,
                summary.unchanged,
                summary.failed
            );
            if summary.dropped > 0 {
                println!("Skipped {} items without identifier", summary.dropped);
            }
        }
    }
}

fn print_article(article: &ArticleRecord) {
    println!("Identifier: {}", article.identifier);
    println!("Title:      {}", article.title);
    println!("Link:       {}", article.link);
    println!("Published:  {}", article.published_at);
    println!("Imported:   {}", article.imported_at.to_rfc3339());
    if !article.description.is_empty() {
        println!();
        println!("{}", article.description);
    }
}
