//! Listing Finder: periodic real-estate listing discovery
//!
//! This crate crawls real-estate listing sites category by category and
//! location by location, extracts listing identifiers with their timestamps
//! and records them in a shared SQLite store.

pub mod config;
pub mod crawler;
pub mod egress;
pub mod listing;
pub mod sites;
pub mod storage;

use thiserror::Error;

/// Main error type for Listing Finder operations
#[derive(Debug, Error)]
pub enum FinderError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Egress authorization error: {0}")]
    Egress(#[from] egress::EgressError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
///
/// These are fatal: they abort the process and are never retried.
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

    #[error("Unknown fetch method: {0}")]
    UnknownFetchMethod(String),

    #[error("Missing required setting: {0}")]
    MissingSetting(String),
}

/// Page fetch failures
///
/// Every variant is treated the same way by the retry policy.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Unexpected status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("HTTP error for {url}: {source}")]
    Request { url: String, source: reqwest::Error },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Browser error for {url}: {message}")]
    Browser { url: String, message: String },

    #[error("Fetch worker failed: {0}")]
    Worker(String),
}

impl FetchError {
    /// Classifies a reqwest error for the given URL
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Request {
                url: url.to_string(),
                source: err,
            }
        }
    }
}

/// Listing extraction failures raised by site adapters
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Element \"{0}\" not found")]
    ElementNotFound(String),

    #[error("Malformed embedded data: {0}")]
    Malformed(String),

    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Listing Finder operations
pub type Result<T> = std::result::Result<T, FinderError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use listing::{Listing, ListingSource};
