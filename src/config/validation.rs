use crate::config::types::{Config, DatabaseConfig, EgressConfig, MethodConfig, SiteConfig};
use crate::crawler::FetchMethod;
use crate::listing::ListingSource;
use crate::ConfigError;
use std::collections::BTreeMap;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_database_config(&config.database)?;
    for (name, method) in &config.methods {
        validate_method_config(name, method)?;
    }
    for (name, site) in &config.sites {
        validate_site_config(name, site, &config.methods)?;
    }
    if let Some(egress) = &config.egress {
        validate_egress_config(egress)?;
    }
    Ok(())
}

/// Validates database configuration
fn validate_database_config(config: &DatabaseConfig) -> Result<(), ConfigError> {
    if config.path.is_empty() {
        return Err(ConfigError::Validation(
            "database.path cannot be empty".to_string(),
        ));
    }

    if config.max_retries < 1 {
        return Err(ConfigError::Validation(format!(
            "database.max-retries must be >= 1, got {}",
            config.max_retries
        )));
    }

    Ok(())
}

/// Validates one named fetch method
fn validate_method_config(name: &str, config: &MethodConfig) -> Result<(), ConfigError> {
    config.backend.parse::<FetchMethod>()?;

    if config.max_workers < 1 || config.max_workers > 64 {
        return Err(ConfigError::Validation(format!(
            "methods.{}.max-workers must be between 1 and 64, got {}",
            name, config.max_workers
        )));
    }

    if config.max_retries < 1 {
        return Err(ConfigError::Validation(format!(
            "methods.{}.max-retries must be >= 1, got {}",
            name, config.max_retries
        )));
    }

    if config.timeout_ms == 0 {
        return Err(ConfigError::Validation(format!(
            "methods.{}.timeout-ms must be > 0",
            name
        )));
    }

    Ok(())
}

/// Validates one site entry against the known sources and methods
fn validate_site_config(
    name: &str,
    config: &SiteConfig,
    methods: &BTreeMap<String, MethodConfig>,
) -> Result<(), ConfigError> {
    name.parse::<ListingSource>()
        .map_err(|e| ConfigError::Validation(format!("sites.{}: {}", name, e)))?;

    if !methods.contains_key(&config.method) {
        return Err(ConfigError::MissingSetting(format!(
            "methods.{} (referenced by sites.{})",
            config.method, name
        )));
    }

    if config.locations.is_empty() && config.states.is_empty() {
        return Err(ConfigError::Validation(format!(
            "sites.{} must list at least one location or state",
            name
        )));
    }

    if config.locations.iter().any(|l| l.trim().is_empty()) {
        return Err(ConfigError::Validation(format!(
            "sites.{} contains an empty location",
            name
        )));
    }

    Ok(())
}

/// Validates the egress endpoint URLs
fn validate_egress_config(config: &EgressConfig) -> Result<(), ConfigError> {
    validate_http_url("egress.ip-lookup-url", &config.ip_lookup_url)?;
    validate_http_url("egress.endpoint", &config.endpoint)?;
    Ok(())
}

fn validate_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", key, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use http or https",
            key, value
        )));
    }

    Ok(())
}
