use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use gleaner::catalog::FeedCatalog;
use gleaner::config::Config;
use gleaner::feed::discovery::{discover_feed, DiscoveryError};
use gleaner::fetch::{build_client, DownloadError, FetchProgress, FetchScheduler, StagingQueue};
use gleaner::storage::{Database, FeedRecord, StoreError};

/// Get the config directory path (~/.config/gleaner/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("gleaner"))
}

#[derive(Parser, Debug)]
#[command(name = "gleaner", about = "Feed reader ingestion core")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one download cycle: fetch prioritized feeds and digest articles
    Refresh,
    /// Discover the feed behind a URL or domain and subscribe to it
    Add { url: String },
    /// Unsubscribe from a feed and delete all its articles
    Remove { url: String },
    /// List subscribed feeds with unread counts
    List,
    /// Delete old abandoned articles past the retention window
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }
    let config = Config::load(&config_dir.join("config.toml")).context("Failed to load config")?;
    let data_dir = config.data_dir.clone().unwrap_or(config_dir);

    let db_path = data_dir.join("articles.db");
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(StoreError::InstanceLocked) => {
            eprintln!("Error: another instance of gleaner appears to be running.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let catalog = Arc::new(
        FeedCatalog::load(db.clone())
            .await
            .context("Failed to load feed catalog")?,
    );
    let staging = StagingQueue::new(data_dir.join("staging"));
    let client = build_client();

    match args.command {
        Command::Refresh => {
            if catalog.is_empty().await {
                eprintln!("No feeds subscribed. Add one with: gleaner add <url>");
                std::process::exit(1);
            }

            let scheduler = FetchScheduler::new(db, catalog, staging, client);
            let (progress_tx, mut progress_rx) = mpsc::channel::<FetchProgress>(32);
            let printer = tokio::spawn(async move {
                while let Some(p) = progress_rx.recv().await {
                    println!("[{}/{}] {:?} {}", p.completed, p.total, p.status, p.url);
                }
            });

            match scheduler.download(Some(progress_tx)).await {
                Ok(outcome) => {
                    println!("Digested {} feeds.", outcome.digested);
                    let staged = outcome.background.await.unwrap_or(0);
                    if staged > 0 {
                        println!(
                            "Staged {} low-priority feeds for the next run.",
                            staged
                        );
                    }
                }
                Err(DownloadError::NoConnection) => {
                    eprintln!("No connection.");
                    std::process::exit(1);
                }
                Err(e) => return Err(anyhow::anyhow!("Refresh failed: {}", e)),
            }
            let _ = printer.await;
        }

        Command::Add { url } => match discover_feed(&client, &url).await {
            Ok(found) => {
                catalog
                    .add_feed(FeedRecord {
                        url: found.feed_url.clone(),
                        title: found.title.clone(),
                        site_url: found.site_url,
                        category: None,
                        average_activity: 0,
                        added_at: Utc::now().timestamp_millis(),
                        unread_count: 0,
                    })
                    .await
                    .context("Failed to save feed")?;
                println!("Subscribed to \"{}\" ({})", found.title, found.feed_url);
            }
            Err(DiscoveryError::NotFound) | Err(DiscoveryError::DnsNotFound) => {
                eprintln!("That address could not be found.");
                std::process::exit(1);
            }
            Err(DiscoveryError::NoFeed) => {
                eprintln!("No feed found at {}.", url);
                std::process::exit(1);
            }
            Err(e) => {
                eprintln!("Could not reach {}: {}", url, e);
                std::process::exit(1);
            }
        },

        Command::Remove { url } => {
            if catalog.remove_feed(&url).await? {
                println!("Removed {} and all its articles.", url);
            } else {
                eprintln!("Not subscribed to {}.", url);
                std::process::exit(1);
            }
        }

        Command::List => {
            let feeds = db.get_feeds_with_unread_counts().await?;
            if feeds.is_empty() {
                println!("No feeds subscribed.");
            }
            for feed in feeds {
                println!("{:5} unread  {}  {}", feed.unread_count, feed.title, feed.url);
            }
        }

        Command::Sweep => {
            let cutoff =
                Utc::now().timestamp_millis() - (config.retention_days as i64) * 24 * 3_600_000;
            let removed = db
                .remove_older_than(cutoff, config.keep_tagged_on_sweep)
                .await?;
            println!("Swept {} old abandoned articles.", removed);
        }
    }

    Ok(())
}
