use crate::client::MAX_PAGE_SIZE;
use crate::config::types::{Config, CrawlerConfig, GithubConfig, OutputConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_github_config(&config.github)?;
    validate_crawler_config(&config.crawler)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates the remote protocol configuration
fn validate_github_config(config: &GithubConfig) -> Result<(), ConfigError> {
    let endpoint = Url::parse(&config.endpoint)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid endpoint: {}", e)))?;

    if !matches!(endpoint.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl(format!(
            "Endpoint '{}' must use http or https",
            config.endpoint
        )));
    }

    if config.page_size < 1 || config.page_size > MAX_PAGE_SIZE {
        return Err(ConfigError::Validation(format!(
            "page_size must be between 1 and {}, got {}",
            MAX_PAGE_SIZE, config.page_size
        )));
    }

    if config.search_query.trim().is_empty() {
        return Err(ConfigError::Validation(
            "search_query cannot be empty".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.token.is_none() && config.token_env.is_empty() {
        return Err(ConfigError::Validation(
            "either token or token_env must be set".to_string(),
        ));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates crawl loop configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.target_count < 0 {
        return Err(ConfigError::Validation(format!(
            "target_count must be >= 0, got {}",
            config.target_count
        )));
    }

    if config.batch_size < 1 {
        return Err(ConfigError::Validation(format!(
            "batch_size must be >= 1, got {}",
            config.batch_size
        )));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.base_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "base_delay_ms ({}) cannot exceed max_delay_ms ({})",
            config.base_delay_ms, config.max_delay_ms
        )));
    }

    if config.jitter_pct > 100 {
        return Err(ConfigError::Validation(format!(
            "jitter_pct must be between 0 and 100, got {}",
            config.jitter_pct
        )));
    }

    if config.max_duration_secs == Some(0) {
        return Err(ConfigError::Validation(
            "max_duration_secs must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}
