use crate::ConfigError;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Star-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    pub output: OutputConfig,
}

/// Remote query protocol configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GithubConfig {
    /// GraphQL endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// API token given inline (takes precedence over `token_env`)
    #[serde(default)]
    pub token: Option<String>,

    /// Environment variable holding the API token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Search expression selecting the repositories to harvest
    #[serde(default = "default_search_query")]
    pub search_query: String,

    /// Entities requested per page (protocol maximum is 100)
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Minimum wait after a secondary rate limit that gave no `Retry-After`
    #[serde(default = "default_secondary_limit_wait_secs")]
    pub secondary_limit_wait_secs: u64,
}

/// Crawl loop and retry configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Number of entities to harvest in one run
    #[serde(default = "default_target_count")]
    pub target_count: i64,

    /// Number of entities accumulated before each storage flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Total attempts for a page request failing transiently
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay in milliseconds (doubled on each retry)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for the computed backoff delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Random spread applied to each backoff delay, in percent
    #[serde(default = "default_jitter_pct")]
    pub jitter_pct: u8,

    /// Remaining-quota level below which the crawler waits for the reset
    #[serde(default = "default_quota_threshold")]
    pub quota_threshold: u32,

    /// Extra wait added after a rate-limit reset time, in milliseconds
    #[serde(default = "default_rate_limit_margin_ms")]
    pub rate_limit_margin_ms: u64,

    /// Retries for a page with no entities that still reports more results
    #[serde(default = "default_empty_page_retries")]
    pub empty_page_retries: u32,

    /// Optional wall-clock budget for a whole run, in seconds
    #[serde(default)]
    pub max_duration_secs: Option<u64>,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the SQLite database file
    pub database_path: String,
}

impl GithubConfig {
    /// Resolves the API token from the config or the environment
    pub fn resolve_token(&self) -> Result<String, ConfigError> {
        if let Some(token) = self.token.as_ref().filter(|t| !t.is_empty()) {
            return Ok(token.clone());
        }

        match std::env::var(&self.token_env) {
            Ok(token) if !token.is_empty() => Ok(token),
            _ => Err(ConfigError::MissingToken(self.token_env.clone())),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn secondary_limit_wait(&self) -> Duration {
        Duration::from_secs(self.secondary_limit_wait_secs)
    }
}

impl CrawlerConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn rate_limit_margin(&self) -> Duration {
        Duration::from_millis(self.rate_limit_margin_ms)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token: None,
            token_env: default_token_env(),
            search_query: default_search_query(),
            page_size: default_page_size(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout_secs(),
            secondary_limit_wait_secs: default_secondary_limit_wait_secs(),
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            target_count: default_target_count(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_pct: default_jitter_pct(),
            quota_threshold: default_quota_threshold(),
            rate_limit_margin_ms: default_rate_limit_margin_ms(),
            empty_page_retries: default_empty_page_retries(),
            max_duration_secs: None,
        }
    }
}

fn default_endpoint() -> String {
    "https://api.github.com/graphql".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_search_query() -> String {
    "stars:>1".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_user_agent() -> String {
    concat!("star-harvest/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_secondary_limit_wait_secs() -> u64 {
    60
}

fn default_target_count() -> i64 {
    100_000
}

fn default_batch_size() -> usize {
    1000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_pct() -> u8 {
    20
}

fn default_quota_threshold() -> u32 {
    10
}

fn default_rate_limit_margin_ms() -> u64 {
    1000
}

fn default_empty_page_retries() -> u32 {
    3
}
