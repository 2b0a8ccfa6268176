use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use feedrelay::config::Config;
use feedrelay::feed::FeedFetcher;
use feedrelay::ingest::{Ingestor, QueueAutoShare};
use feedrelay::storage::Database;

/// Default config file path (~/.config/feedrelay/config.toml)
fn default_config_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("feedrelay")
            .join("config.toml"),
    )
}

#[derive(Parser, Debug)]
#[command(
    name = "feedrelay",
    version,
    about = "Scheduled RSS/Atom ingestion with an auto-share outbox"
)]
struct Args {
    /// Config file (default: ~/.config/feedrelay/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// SQLite database, overrides `database_path` from the config
    #[arg(long, value_name = "FILE", global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process every due feed; meant to be invoked by a scheduler
    Run,
    /// Subscribe a profile to a feed
    Add {
        #[arg(long)]
        profile: String,
        url: String,
        #[arg(long, default_value = "")]
        name: String,
        /// Queue new items for publishing instead of as drafts
        #[arg(long)]
        auto_publish: bool,
    },
    /// List feeds with their health
    List {
        #[arg(long)]
        profile: Option<String>,
    },
    /// Fetch one feed now regardless of status or interval
    Refresh {
        feed_id: i64,
        #[arg(long)]
        profile: String,
    },
    /// Return a paused or errored feed to active
    Reactivate {
        feed_id: i64,
        #[arg(long)]
        profile: String,
    },
    /// Stop scheduled fetches of a feed
    Pause {
        feed_id: i64,
        #[arg(long)]
        profile: String,
    },
    /// Show stored items of a feed, newest first
    Items {
        feed_id: i64,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match args.config.clone().or_else(default_config_path) {
        Some(path) => Config::load(&path)
            .with_context(|| format!("Failed to load config from '{}'", path.display()))?,
        None => Config::default(),
    };
    if let Some(database) = args.database {
        config.database_path = database;
    }

    let db_path = config.database_path.to_string_lossy().into_owned();
    let db = Database::open(&db_path)
        .await
        .with_context(|| format!("Failed to open database '{db_path}'"))?;

    let fetcher = FeedFetcher::from_config(&config).context("Failed to build HTTP client")?;
    let ingestor = Ingestor::new(Arc::new(db.clone()), fetcher, config)
        .with_auto_share(Arc::new(QueueAutoShare::new(db.clone())));

    match args.command {
        Command::Run => {
            let report = ingestor.run().await.context("Ingestion run failed")?;
            print_json(&report)?;
        }
        Command::Add {
            profile,
            url,
            name,
            auto_publish,
        } => {
            let feed = ingestor
                .add_feed(&profile, &url, &name, auto_publish)
                .await
                .context("Failed to add feed")?;
            print_json(&feed)?;
        }
        Command::List { profile } => {
            let feeds = db
                .list_feeds(profile.as_deref())
                .await
                .context("Failed to list feeds")?;
            print_json(&feeds)?;
        }
        Command::Refresh { feed_id, profile } => {
            let outcome = ingestor
                .refresh_feed(feed_id, &profile)
                .await
                .with_context(|| format!("Failed to refresh feed {feed_id}"))?;
            print_json(&outcome)?;
        }
        Command::Reactivate { feed_id, profile } => {
            let feed = ingestor
                .reactivate_feed(feed_id, &profile)
                .await
                .with_context(|| format!("Failed to reactivate feed {feed_id}"))?;
            print_json(&feed)?;
        }
        Command::Pause { feed_id, profile } => {
            let feed = ingestor
                .pause_feed(feed_id, &profile)
                .await
                .with_context(|| format!("Failed to pause feed {feed_id}"))?;
            print_json(&feed)?;
        }
        Command::Items { feed_id, limit } => {
            let items = db
                .items_for_feed(feed_id, limit)
                .await
                .context("Failed to load items")?;
            print_json(&items)?;
        }
    }

    Ok(())
}
