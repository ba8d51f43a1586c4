//! Star-Harvest main entry point
//!
//! This is the command-line interface for the Star-Harvest repository crawler.

use clap::Parser;
use star_harvest::config::{load_config_with_hash, Config};
use star_harvest::crawler::crawl;
use star_harvest::output::{export_csv, load_statistics, print_metrics, print_statistics};
use star_harvest::storage::open_storage;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Star-Harvest: an incremental repository star crawler
///
/// Star-Harvest pages through GitHub search results while respecting the
/// API rate limit, and upserts repository star counts into SQLite in
/// batches. Interrupted crawls resume from their last saved batch.
#[derive(Parser, Debug)]
#[command(name = "star-harvest")]
#[command(version)]
#[command(about = "An incremental repository star crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resume an interrupted crawl (default behavior)
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Start a fresh crawl, ignoring previous state
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Validate config and show the effective settings without crawling
    #[arg(long, conflicts_with_all = ["stats", "export_csv"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "export_csv"])]
    stats: bool,

    /// Export all stored repositories to a CSV file and exit
    #[arg(long, value_name = "PATH", conflicts_with_all = ["dry_run", "stats"])]
    export_csv: Option<PathBuf>,

    /// Override the number of repositories to fetch
    #[arg(long, value_name = "N")]
    target: Option<i64>,

    /// Override the number of repositories saved per batch
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    batch_size: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Some(target) = cli.target {
        config.crawler.target_count = target;
    }
    if let Some(batch_size) = cli.batch_size {
        config.crawler.batch_size = batch_size as usize;
    }

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config)?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else if let Some(path) = &cli.export_csv {
        handle_export_csv(&config, path)?;
    } else {
        handle_crawl(&config, &config_hash, cli.fresh).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// `RUST_LOG` takes precedence over the command-line flags when set.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if quiet {
            // Only show errors
            EnvFilter::new("error")
        } else {
            match verbose {
                0 => EnvFilter::new("star_harvest=info,warn"),
                1 => EnvFilter::new("star_harvest=debug,info"),
                2 => EnvFilter::new("star_harvest=trace,debug"),
                _ => EnvFilter::new("trace"),
            }
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows the effective settings
fn handle_dry_run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Star-Harvest Dry Run ===\n");

    println!("GitHub:");
    println!("  Endpoint: {}", config.github.endpoint);
    println!("  Search query: {}", config.github.search_query);
    println!("  Page size: {}", config.github.page_size);
    println!("  User agent: {}", config.github.user_agent);
    println!("  Request timeout: {}s", config.github.request_timeout_secs);
    println!(
        "  Secondary limit wait: {}s",
        config.github.secondary_limit_wait_secs
    );
    let token_status = match config.github.resolve_token() {
        Ok(_) if config.github.token.is_some() => "set in config file".to_string(),
        Ok(_) => format!("read from ${}", config.github.token_env),
        Err(e) => format!("MISSING ({})", e),
    };
    println!("  Token: {}", token_status);

    println!("\nCrawler:");
    println!("  Target count: {}", config.crawler.target_count);
    println!("  Batch size: {}", config.crawler.batch_size);
    println!("  Max attempts: {}", config.crawler.max_attempts);
    println!(
        "  Backoff: {}ms base, {}ms max, ±{}% jitter",
        config.crawler.base_delay_ms, config.crawler.max_delay_ms, config.crawler.jitter_pct
    );
    println!(
        "  Quota threshold: {} requests (+{}ms margin)",
        config.crawler.quota_threshold, config.crawler.rate_limit_margin_ms
    );
    println!("  Empty page retries: {}", config.crawler.empty_page_retries);
    match config.crawler.max_duration_secs {
        Some(secs) => println!("  Max duration: {}s", secs),
        None => println!("  Max duration: unlimited"),
    }

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\n✓ Configuration is valid");
    let pages = (config.crawler.target_count.max(0) as u64)
        .div_ceil(u64::from(config.github.page_size.max(1)));
    println!(
        "✓ Would fetch up to {} repositories in at least {} requests",
        config.crawler.target_count.max(0),
        pages
    );

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    use star_harvest::output::stats::DEFAULT_LIMIT;

    println!("Database: {}\n", config.output.database_path);

    // Open the database
    let storage = open_storage(Path::new(&config.output.database_path))?;

    // Load statistics
    let stats = load_statistics(&storage, DEFAULT_LIMIT)?;

    // Print statistics
    print_statistics(&stats);

    Ok(())
}

/// Handles the --export-csv mode: writes all stored rows to a CSV file
fn handle_export_csv(config: &Config, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Exporting Repositories ===\n");
    println!("Database: {}", config.output.database_path);
    println!("Output: {}", path.display());
    println!();

    let storage = open_storage(Path::new(&config.output.database_path))?;
    let rows = export_csv(&storage, path)?;

    println!("✓ Exported {} repositories to: {}", rows, path.display());

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(
    config: &Config,
    config_hash: &str,
    fresh: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if fresh {
        tracing::info!("Starting fresh crawl (ignoring previous state)");
    } else {
        tracing::info!("Starting crawl (will resume if interrupted run exists)");
    }

    tracing::info!(
        "Query: \"{}\", target: {}, page size: {}",
        config.github.search_query,
        config.crawler.target_count,
        config.github.page_size
    );

    // Ctrl-C stops the crawl after saving buffered results
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, saving progress and stopping");
            on_signal.cancel();
        }
    });

    // Run the crawler
    match crawl(config, config_hash, fresh, &cancel).await {
        Ok(metrics) => {
            print_metrics(&metrics);
            Ok(())
        }
        Err(aborted) => {
            print_metrics(&aborted.metrics);
            tracing::error!("Crawl failed: {}", aborted);
            Err(aborted.into())
        }
    }
}
