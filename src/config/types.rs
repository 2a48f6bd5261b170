use crate::listing::ListingSource;
use crate::{ConfigError, ConfigResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Main configuration structure for Listing Finder
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,

    /// Fetch methods by name, referenced from `sites.<site>.method`
    #[serde(default)]
    pub methods: BTreeMap<String, MethodConfig>,

    /// Per-site settings keyed by the site's source name
    #[serde(default)]
    pub sites: BTreeMap<String, SiteConfig>,

    /// Optional proxy egress authorization endpoint
    #[serde(default)]
    pub egress: Option<EgressConfig>,
}

impl Config {
    /// Looks up the settings for a site
    pub fn site(&self, source: ListingSource) -> ConfigResult<&SiteConfig> {
        self.sites
            .get(source.as_str())
            .ok_or_else(|| ConfigError::MissingSetting(format!("sites.{}", source)))
    }

    /// Looks up a fetch method by name
    pub fn method(&self, name: &str) -> ConfigResult<&MethodConfig> {
        self.methods
            .get(name)
            .ok_or_else(|| ConfigError::MissingSetting(format!("methods.{}", name)))
    }
}

/// Database connection and retry settings
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: String,

    /// Attempts per batch write before giving up
    #[serde(rename = "max-retries", default = "default_retries")]
    pub max_retries: u32,

    /// Fixed delay between attempts (milliseconds)
    #[serde(rename = "retry-delay-ms", default = "default_db_retry_delay")]
    pub retry_delay_ms: u64,

    /// How long a connection waits on a locked database (milliseconds)
    #[serde(rename = "busy-timeout-ms", default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Settings for one named fetch method
#[derive(Debug, Clone, Deserialize)]
pub struct MethodConfig {
    /// Backend implementation name ("http" or "browser")
    pub backend: String,

    /// Per-request timeout (milliseconds)
    #[serde(rename = "timeout-ms", default = "default_timeout")]
    pub timeout_ms: u64,

    /// Attempts per fetch before giving up
    #[serde(rename = "max-retries", default = "default_retries")]
    pub max_retries: u32,

    /// Fixed delay between attempts (milliseconds)
    #[serde(rename = "retry-delay-ms", default = "default_fetch_retry_delay")]
    pub retry_delay_ms: u64,

    /// Worker pool size for concurrent locations and pages
    #[serde(rename = "max-workers", default = "default_workers")]
    pub max_workers: u32,

    /// Run the browser without a window
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Browser locale, e.g. "de-DE"
    #[serde(default)]
    pub locale: Option<String>,

    /// Time to let a rendered page settle before reading it (milliseconds)
    #[serde(rename = "settle-ms", default = "default_settle")]
    pub settle_ms: u64,

    /// User agent override for the HTTP backend
    #[serde(rename = "user-agent", default)]
    pub user_agent: Option<String>,
}

impl MethodConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Settings for one target site
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Name of the fetch method in `[methods]`
    pub method: String,

    /// Route requests through the proxy in `PROXY_URL__<SITE>`
    #[serde(rename = "use-proxy", default)]
    pub use_proxy: bool,

    /// Location values crawled for every category
    #[serde(default)]
    pub locations: Vec<String>,

    /// Administrative regions resolved to additional locations
    #[serde(default)]
    pub states: Vec<String>,
}

impl SiteConfig {
    /// Resolves the proxy URL for this site from the environment
    ///
    /// Returns `Ok(None)` when the site does not use a proxy.
    pub fn proxy_url(&self, source: ListingSource) -> ConfigResult<Option<String>> {
        if !self.use_proxy {
            return Ok(None);
        }

        let var = source.proxy_env_var();
        match std::env::var(&var) {
            Ok(value) if !value.trim().is_empty() => Ok(Some(value.trim().to_string())),
            _ => Err(ConfigError::MissingSetting(var)),
        }
    }
}

/// Proxy egress authorization endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    /// Service returning the caller's public IP as plain text
    #[serde(rename = "ip-lookup-url", default = "default_ip_lookup")]
    pub ip_lookup_url: String,

    /// Endpoint accepting POST (authorize) and DELETE (revoke)
    pub endpoint: String,

    /// Timeout for authorization calls (milliseconds)
    #[serde(rename = "timeout-ms", default = "default_egress_timeout")]
    pub timeout_ms: u64,
}

impl EgressConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_retries() -> u32 {
    3
}

fn default_db_retry_delay() -> u64 {
    2_000
}

fn default_busy_timeout() -> u64 {
    10_000
}

fn default_timeout() -> u64 {
    30_000
}

fn default_fetch_retry_delay() -> u64 {
    5_000
}

fn default_workers() -> u32 {
    4
}

fn default_true() -> bool {
    true
}

fn default_settle() -> u64 {
    1_000
}

fn default_ip_lookup() -> String {
    "https://api.ipify.org".to_string()
}

fn default_egress_timeout() -> u64 {
    5_000
}
