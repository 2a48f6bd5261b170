//! Site adapters
//!
//! Each supported website implements [`SiteAdapter`]: it names its search
//! categories and locations, builds result-page URLs and turns fetched
//! markup into listings and a page count. The orchestrator only ever sees
//! the trait object returned by [`build_adapter`].

mod immoscout;
mod immowelt;
mod kleinanzeigen;

pub use immoscout::ImmoscoutAdapter;
pub use immowelt::ImmoweltAdapter;
pub use kleinanzeigen::KleinanzeigenAdapter;

use crate::config::SiteConfig;
use crate::listing::{Listing, ListingSource};
use crate::storage::LocationReference;
use crate::{ExtractionError, FinderError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::Arc;

/// Upper bound on result pages crawled per location
pub const MAX_PAGES: u32 = 50;

/// A site-defined search category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Category {
    /// Human-readable name, used in logs
    pub name: &'static str,
    /// Site-specific value inserted into URLs
    pub value: &'static str,
}

impl Category {
    pub const fn new(name: &'static str, value: &'static str) -> Self {
        Self { name, value }
    }
}

/// Which crawl phases may fan out across a worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyPolicy {
    pub parallel_locations: bool,
    pub parallel_pages: bool,
}

impl Default for ConcurrencyPolicy {
    /// Locations one at a time, pages in parallel
    fn default() -> Self {
        Self {
            parallel_locations: false,
            parallel_pages: true,
        }
    }
}

/// Capabilities every target website provides
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// The source stamped on every listing this adapter produces
    fn source(&self) -> ListingSource;

    /// Search categories, crawled in this order
    fn categories(&self) -> Vec<Category>;

    /// Distinct location values to crawl for each category
    async fn locations(&self) -> Result<Vec<String>, FinderError>;

    /// URL of one result page; page 1 never carries a page parameter
    fn build_url(&self, category: &Category, location: &str, page: u32) -> String;

    /// Listings on a result page; a page without results yields an empty list
    fn extract_listings(&self, content: &str) -> Result<Vec<Listing>, ExtractionError>;

    /// Total result pages; 1 when pagination is absent, 0 only for a
    /// confirmed empty result
    fn extract_page_count(&self, content: &str) -> Result<u32, ExtractionError>;

    fn concurrency(&self) -> ConcurrencyPolicy {
        ConcurrencyPolicy::default()
    }
}

/// Builds the adapter for a site
///
/// # Arguments
///
/// * `source` - The site to crawl
/// * `site` - The site's configured locations and states
/// * `reference` - Lookup for region-based locations
pub fn build_adapter(
    source: ListingSource,
    site: &SiteConfig,
    reference: Arc<dyn LocationReference>,
) -> Arc<dyn SiteAdapter> {
    match source {
        ListingSource::Kleinanzeigen => Arc::new(KleinanzeigenAdapter::new(
            site.locations.clone(),
            site.states.clone(),
            reference,
        )),
        ListingSource::Immoscout => Arc::new(ImmoscoutAdapter::new(site.locations.clone())),
        ListingSource::Immowelt => Arc::new(ImmoweltAdapter::new(site.locations.clone())),
    }
}

/// Converts a total result count into a page count
///
/// Rounds up to whole pages and caps the result at `max_pages`.
pub fn total_to_pages(total_listings: u64, per_page: u64, max_pages: u32) -> u32 {
    if per_page == 0 {
        return 0;
    }
    let pages = total_listings.div_ceil(per_page);
    if pages > u64::from(max_pages) {
        tracing::warn!(
            "Total pages {} exceeds the maximum of {}, capping",
            pages,
            max_pages
        );
        return max_pages;
    }
    pages as u32
}

/// Parses a site timestamp
///
/// Accepts RFC 3339 with an offset, or a bare local date-time which is
/// taken as UTC.
pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ExtractionError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| ExtractionError::Malformed(format!("timestamp '{}': {}", value, e)))
}

/// Keeps the first listing for every external id
pub(crate) fn dedup_listings(listings: Vec<Listing>) -> Vec<Listing> {
    let mut seen = std::collections::HashSet::new();
    listings
        .into_iter()
        .filter(|listing| {
            let fresh = seen.insert(listing.external_id().to_string());
            if !fresh {
                tracing::debug!("Duplicate listing skipped: {}", listing.external_id());
            }
            fresh
        })
        .collect()
}
