//! Star-Harvest: an incremental repository star crawler
//!
//! This crate pages through the GitHub GraphQL search API, respecting its
//! hourly rate limit, and upserts repository star counts into SQLite in
//! batches so that repeated crawls only touch rows that actually changed.

pub mod client;
pub mod config;
pub mod crawler;
pub mod model;
pub mod output;
pub mod storage;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Main error type for Star-Harvest operations
///
/// Every variant except `Interrupted` aborts a crawl. `Interrupted` is raised
/// when a cancellation arrives while the crawler is sleeping and is turned
/// into a clean stop by the coordinator.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Giving up after {attempts} failed attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Rate limit still exhausted after waiting for reset at {reset_at}")]
    RateLimitPersisted { reset_at: DateTime<Utc> },

    #[error(
        "Server kept returning empty pages while reporting more results ({attempts} attempts)"
    )]
    EmptyPageLoop { attempts: u32 },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Interrupted while waiting")]
    Interrupted,
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("No API token configured: set `token` or the {0} environment variable")]
    MissingToken(String),
}

/// A crawl that stopped on a fatal error, with the work completed before it
#[derive(Debug, Error)]
#[error("Crawl aborted after {} entities: {error}", .metrics.entities_fetched)]
pub struct CrawlAborted {
    pub metrics: model::CrawlMetrics,
    #[source]
    pub error: HarvestError,
}

impl CrawlAborted {
    /// Wraps an error raised before any page was requested
    pub fn before_start(error: HarvestError) -> Self {
        let mut metrics = model::CrawlMetrics::start();
        metrics.finish(model::StopReason::Aborted);
        Self { metrics, error }
    }
}

/// Result type alias for Star-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use model::{CrawlMetrics, Cursor, Entity, RateLimitState, StopReason};
