//! Storage traits and error types
//!
//! This module defines the interfaces the crawl depends on and the errors
//! the store can raise.

use crate::listing::Listing;
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Expected {expected} property ids, but resolved {resolved}")]
    BatchMismatch { expected: usize, resolved: usize },

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Database worker failed: {0}")]
    Worker(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persists extracted listings
///
/// Implementations must be safe to call from concurrent workers.
#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Writes one page's listings as a single batch
    ///
    /// # Returns
    ///
    /// The number of distinct listings written; 0 for an empty batch
    async fn persist(&self, listings: &[Listing]) -> StorageResult<usize>;
}

/// Resolves administrative regions to site location ids
#[async_trait]
pub trait LocationReference: Send + Sync {
    async fn location_ids_for_state(&self, state: &str) -> StorageResult<Vec<String>>;
}
