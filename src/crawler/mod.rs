//! Crawler module for paging through search results
//!
//! This module contains the core crawling logic, including:
//! - Retry, backoff, and quota waits around each page request
//! - Batch accumulation and flushing
//! - Checkpointing and resumption
//! - Overall crawl coordination

mod coordinator;
mod retry;

pub use coordinator::{run_crawl, Coordinator};
pub use retry::{sleep_or_cancel, RetryPolicy};

use crate::config::Config;
use crate::{CrawlAborted, CrawlMetrics};
use tokio_util::sync::CancellationToken;

/// Runs a complete crawl operation
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Open the storage layer
/// 2. Resume the last unfinished run or create a new one
/// 3. Build the authenticated HTTP client
/// 4. Page through results, flushing batches as they fill
/// 5. Record the outcome of the run
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `config_hash` - Hash of the configuration file
/// * `fresh` - Start a new run even if the last one is unfinished
/// * `cancel` - Stops the crawl cleanly when cancelled
///
/// # Returns
///
/// * `Ok(CrawlMetrics)` - Crawl stopped normally
/// * `Err(CrawlAborted)` - Crawl failed
pub async fn crawl(
    config: &Config,
    config_hash: &str,
    fresh: bool,
    cancel: &CancellationToken,
) -> Result<CrawlMetrics, CrawlAborted> {
    run_crawl(config, config_hash, fresh, cancel).await
}
