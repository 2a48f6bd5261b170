use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
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
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// The hash is recorded with every crawl run so runs can be matched to the
/// settings they used.
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::ListingSource;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VALID_CONFIG: &str = r#"
[database]
path = "./listings.db"
max-retries = 5
retry-delay-ms = 100

[methods.http]
backend = "http"
timeout-ms = 15000
max-retries = 3
retry-delay-ms = 500
max-workers = 8

[methods.browser]
backend = "browser"
max-workers = 2
locale = "de-DE"

[sites.kleinanzeigen]
method = "http"
locations = ["3331", "1234"]
states = ["Berlin"]

[sites.immowelt]
method = "browser"
locations = ["AD08DE8634"]
"#;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let file = create_temp_config(VALID_CONFIG);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.database.max_retries, 5);
        assert_eq!(config.database.busy_timeout_ms, 10_000);

        let http = config.method("http").unwrap();
        assert_eq!(http.max_workers, 8);
        assert_eq!(http.timeout_ms, 15_000);

        let browser = config.method("browser").unwrap();
        assert!(browser.headless);
        assert_eq!(browser.locale.as_deref(), Some("de-DE"));
        assert_eq!(browser.retry_delay_ms, 5_000);

        let site = config.site(ListingSource::Kleinanzeigen).unwrap();
        assert_eq!(site.locations.len(), 2);
        assert_eq!(site.states, vec!["Berlin".to_string()]);
        assert!(!site.use_proxy);
        assert!(config.egress.is_none());
    }

    #[test]
    fn test_missing_site_is_config_error() {
        let config = parse_config(VALID_CONFIG).unwrap();
        let result = config.site(ListingSource::Immoscout);
        assert!(matches!(result, Err(ConfigError::MissingSetting(_))));
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/finder.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let content = VALID_CONFIG.replace("backend = \"browser\"", "backend = \"playwright\"");
        let result = parse_config(&content);
        assert!(matches!(result, Err(ConfigError::UnknownFetchMethod(_))));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
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
