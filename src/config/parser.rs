use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigResult;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use star_harvest::config::load_config;
///
/// let config = load_config(Path::new("config.toml")).unwrap();
/// println!("Target count: {}", config.crawler.target_count);
/// ```
pub fn load_config(path: &Path) -> ConfigResult<Config> {
    // Read the configuration file
    let content = std::fs::read_to_string(path)?;

    // Parse TOML
    let config: Config = toml::from_str(&content)?;

    // Validate the configuration
    validate(&config)?;

    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// The hash is stored with each crawl run so that an unfinished run is only
/// resumed when it was started from the same configuration.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> ConfigResult<String> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok((Config, String))` - Successfully loaded configuration and its hash
/// * `Err(ConfigError)` - Failed to load or parse the configuration
pub fn load_config_with_hash(path: &Path) -> ConfigResult<(Config, String)> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConfigError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let config_content = r#"
[github]
endpoint = "https://api.github.com/graphql"
token-env = "STAR_HARVEST_TEST_TOKEN"
search-query = "stars:>100"
page-size = 50

[crawler]
target-count = 250
batch-size = 100
max-duration-secs = 600

[output]
database-path = "./test.db"
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.github.page_size, 50);
        assert_eq!(config.github.search_query, "stars:>100");
        assert_eq!(config.crawler.target_count, 250);
        assert_eq!(config.crawler.batch_size, 100);
        assert_eq!(config.crawler.max_attempts, 5);
        assert_eq!(config.crawler.max_duration_secs, Some(600));
        assert_eq!(config.output.database_path, "./test.db");
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config_content = r#"
[output]
database-path = "./test.db"
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.github.endpoint, "https://api.github.com/graphql");
        assert_eq!(config.github.token_env, "GITHUB_TOKEN");
        assert_eq!(config.github.page_size, 100);
        assert_eq!(config.github.secondary_limit_wait_secs, 60);
        assert_eq!(config.crawler.batch_size, 1000);
        assert_eq!(config.crawler.quota_threshold, 10);
        assert!(config.crawler.max_duration_secs.is_none());
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let config_content = "this is not valid TOML {{{";
        let file = create_temp_config(config_content);
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let config_content = r#"
[github]
page-size = 500

[output]
database-path = "./test.db"
"#;

        let file = create_temp_config(config_content);
        let result = load_config(file.path());
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_inline_token_wins_over_environment() {
        let config_content = r#"
[github]
token = "inline-token"
token-env = "STAR_HARVEST_UNSET_VARIABLE"

[output]
database-path = "./test.db"
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.github.resolve_token().unwrap(), "inline-token");
    }

    #[test]
    fn test_missing_token_is_reported() {
        let config_content = r#"
[github]
token-env = "STAR_HARVEST_DEFINITELY_UNSET_TOKEN"

[output]
database-path = "./test.db"
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();
        assert!(matches!(
            config.github.resolve_token(),
            Err(ConfigError::MissingToken(_))
        ));
    }

    #[test]
    fn test_compute_config_hash() {
        let config_content = "test content";
        let file = create_temp_config(config_content);

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        // Same content should produce same hash
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64); // SHA-256 produces 64 hex characters
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        let hash1 = compute_config_hash(file1.path()).unwrap();
        let hash2 = compute_config_hash(file2.path()).unwrap();

        assert_ne!(hash1, hash2);
    }
}
