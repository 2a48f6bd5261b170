//! Listing Finder main entry point
//!
//! This is the command-line interface that runs one crawl for one site.

use anyhow::Context;
use clap::Parser;
use listing_finder::config::{load_config_with_hash, Config};
use listing_finder::crawler::{Fetcher, Orchestrator};
use listing_finder::sites::{build_adapter, SiteAdapter};
use listing_finder::storage::{RunStatus, SqliteListingStore};
use listing_finder::ListingSource;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Listing Finder: real-estate listing discovery
///
/// Crawls one configured listing site category by category and location by
/// location, and records every listing it sees in the SQLite store.
#[derive(Parser, Debug)]
#[command(name = "listing-finder")]
#[command(version = "1.0.0")]
#[command(about = "Real-estate listing discovery crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Site to crawl
    #[arg(value_name = "SITE", value_enum)]
    site: ListingSource,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let site = config.site(cli.site)?;
    let store = Arc::new(
        SqliteListingStore::open(&config.database)
            .with_context(|| format!("Cannot open database {}", config.database.path))?,
    );
    let adapter = build_adapter(cli.site, site, store.clone());

    if cli.dry_run {
        return handle_dry_run(&config, cli.site, adapter.as_ref()).await;
    }

    handle_crawl(&config, cli.site, &config_hash, adapter, store, ctrl_c()).await
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("listing_finder=info,warn"),
            1 => EnvFilter::new("listing_finder=debug,info"),
            2 => EnvFilter::new("listing_finder=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
async fn handle_dry_run(
    config: &Config,
    source: ListingSource,
    adapter: &dyn SiteAdapter,
) -> anyhow::Result<()> {
    let site = config.site(source)?;
    let method = config.method(&site.method)?;
    let locations = adapter
        .locations()
        .await
        .context("Cannot resolve locations")?;
    let policy = adapter.concurrency();

    println!("=== Listing Finder Dry Run: {} ===\n", source);

    println!("Fetch method: {} ({})", site.method, method.backend);
    println!("  Workers: {}", method.max_workers);
    println!("  Retries: {} x {}ms", method.max_retries, method.retry_delay_ms);
    println!("  Proxy: {}", if site.use_proxy { "yes" } else { "no" });
    println!(
        "  Parallel locations: {}, parallel pages: {}",
        policy.parallel_locations, policy.parallel_pages
    );

    println!("\nDatabase: {}", config.database.path);

    println!("Locations: {}", locations.len());
    let categories = adapter.categories();
    println!("\nCategories ({}):", categories.len());
    for category in &categories {
        println!("  - {}", category.name);
        for location in &locations {
            println!("    * {}", adapter.build_url(category, location, 1));
        }
    }

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would start with {} first pages",
        categories.len() * locations.len()
    );

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(
    config: &Config,
    source: ListingSource,
    config_hash: &str,
    adapter: Arc<dyn SiteAdapter>,
    store: Arc<SqliteListingStore>,
    interrupt: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let site = config.site(source)?;
    let method = config.method(&site.method)?;

    // Polled from before egress authorization until the run is recorded
    tokio::pin!(interrupt);

    let fetcher = tokio::select! {
        fetcher = Fetcher::for_site(config, source) => Arc::new(fetcher?),
        _ = &mut interrupt => {
            tracing::warn!("Interrupted while setting up the fetcher");
            return Ok(());
        }
    };

    let run_id = tokio::select! {
        result = store.start_run(source, config_hash) => result,
        _ = &mut interrupt => {
            tracing::warn!("Interrupted before the crawl started");
            fetcher.shutdown().await;
            return Ok(());
        }
    };
    let run_id = match run_id {
        Ok(id) => id,
        Err(e) => {
            fetcher.shutdown().await;
            return Err(e.into());
        }
    };
    tracing::info!("Started run {} for {}", run_id, source);

    let orchestrator = Orchestrator::new(
        adapter,
        fetcher.clone(),
        store.clone(),
        method.max_workers as usize,
    );

    let outcome = tokio::select! {
        result = orchestrator.run() => Some(result),
        _ = &mut interrupt => None,
    };

    fetcher.shutdown().await;

    let (status, result) = match outcome {
        Some(Ok(summary)) => {
            tracing::info!("Crawl completed: {}", summary);
            (RunStatus::Completed, Ok(()))
        }
        Some(Err(e)) => {
            tracing::error!("Crawl failed: {}", e);
            (RunStatus::Failed, Err(anyhow::Error::from(e)))
        }
        None => {
            tracing::warn!("Interrupted, stopping crawl");
            (RunStatus::Interrupted, Ok(()))
        }
    };

    store
        .finish_run(run_id, status, orchestrator.summary())
        .await
        .context("Cannot record run outcome")?;

    result
}
