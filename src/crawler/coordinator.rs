//! Crawl orchestrator - main traversal logic
//!
//! Categories are crawled strictly in order. Within a category, every
//! location is crawled once, and within a location page 1 is always fetched
//! first because it supplies the total page count. Whether locations and
//! pages fan out across a worker pool is decided by the adapter's
//! [`ConcurrencyPolicy`](crate::sites::ConcurrencyPolicy).
//!
//! Page-level failures never escape: they are logged with their URL,
//! page and location, and the page counts as having no further pages.

use crate::crawler::fetcher::PageSource;
use crate::crawler::stats::{CrawlStats, CrawlSummary};
use crate::sites::{Category, SiteAdapter};
use crate::storage::ListingStore;
use crate::FinderError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Drives one site's crawl
///
/// Cloning is cheap; every worker task gets its own clone.
#[derive(Clone)]
pub struct Orchestrator {
    adapter: Arc<dyn SiteAdapter>,
    pages: Arc<dyn PageSource>,
    store: Arc<dyn ListingStore>,
    max_workers: usize,
    stats: Arc<CrawlStats>,
}

impl Orchestrator {
    /// Creates an orchestrator
    ///
    /// # Arguments
    ///
    /// * `adapter` - The site being crawled
    /// * `pages` - Where page content comes from
    /// * `store` - Where extracted listings go
    /// * `max_workers` - Size of every worker pool (at least 1)
    pub fn new(
        adapter: Arc<dyn SiteAdapter>,
        pages: Arc<dyn PageSource>,
        store: Arc<dyn ListingStore>,
        max_workers: usize,
    ) -> Self {
        Self {
            adapter,
            pages,
            store,
            max_workers: max_workers.max(1),
            stats: Arc::new(CrawlStats::default()),
        }
    }

    /// Counters so far
    pub fn summary(&self) -> CrawlSummary {
        self.stats.summary()
    }

    /// Crawls every category
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlSummary)` - All category, location and page work was attempted
    /// * `Err(FinderError)` - The adapter could not supply its locations
    pub async fn run(&self) -> Result<CrawlSummary, FinderError> {
        let categories = self.adapter.categories();
        tracing::info!(
            "Starting {} crawl over {} categories ({} workers)",
            self.adapter.source(),
            categories.len(),
            self.max_workers
        );

        for category in categories {
            self.process_category(category).await?;
        }

        let summary = self.stats.summary();
        tracing::info!("Finished {} crawl: {}", self.adapter.source(), summary);
        Ok(summary)
    }

    /// Crawls every location of one category
    pub async fn process_category(&self, category: Category) -> Result<(), FinderError> {
        let locations = self.adapter.locations().await?;
        let policy = self.adapter.concurrency();
        tracing::info!(
            "Category {}: {} locations{}",
            category.name,
            locations.len(),
            if policy.parallel_locations {
                " in parallel"
            } else {
                ""
            }
        );

        if policy.parallel_locations {
            self.run_pool(locations.into_iter().map(|location| {
                let this = self.clone();
                async move { this.process_location(&category, &location).await }
            }))
            .await;
        } else {
            for location in &locations {
                self.process_location(&category, location).await;
            }
        }

        Ok(())
    }

    /// Crawls all pages of one location
    ///
    /// Pages 2 and up are only attempted when page 1 reported more than
    /// one page. A failed page 1 ends the location.
    pub async fn process_location(&self, category: &Category, location: &str) {
        self.stats.record_location();

        let page_count = self.process_page(category, location, 1).await;
        tracing::debug!(
            "Category {} location {}: {} pages",
            category.name,
            location,
            page_count
        );
        if page_count <= 1 {
            return;
        }

        if self.adapter.concurrency().parallel_pages {
            let category = *category;
            self.run_pool((2..=page_count).map(|page| {
                let this = self.clone();
                let location = location.to_string();
                async move {
                    this.process_page(&category, &location, page).await;
                }
            }))
            .await;
        } else {
            for page in 2..=page_count {
                self.process_page(category, location, page).await;
            }
        }
    }

    /// Fetches, extracts and persists one result page
    ///
    /// # Returns
    ///
    /// The page count reported by this page, or 0 when any step failed
    pub async fn process_page(&self, category: &Category, location: &str, page: u32) -> u32 {
        self.stats.record_page();
        let url = self.adapter.build_url(category, location, page);

        tracing::debug!(category = category.name, location, page, url = %url, "Fetching page");
        match self.try_page(&url).await {
            Ok(page_count) => page_count,
            Err(e) => {
                self.stats.record_failed_page();
                tracing::error!(
                    category = category.name,
                    location,
                    page,
                    url = %url,
                    "Failed to process page: {}",
                    e
                );
                0
            }
        }
    }

    async fn try_page(&self, url: &str) -> Result<u32, FinderError> {
        let content = self.pages.fetch(url).await?;
        let listings = self.adapter.extract_listings(&content)?;
        let page_count = self.adapter.extract_page_count(&content)?;

        if !listings.is_empty() {
            let written = self.store.persist(&listings).await?;
            self.stats.record_listings(written);
            tracing::debug!("Persisted {} listings from {}", written, url);
        }

        Ok(page_count)
    }

    /// Runs tasks on a pool of `max_workers` and waits for all of them
    ///
    /// Every pool has its own permits, so page pools started inside location
    /// workers allow up to `max_workers` squared fetches at once.
    async fn run_pool<I, Fut>(&self, tasks: I)
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut set = JoinSet::new();

        for task in tasks {
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                task.await;
            });
        }

        while let Some(result) = set.join_next().await {
            if let Err(e) = result {
                self.stats.record_panic();
                tracing::error!("Crawl worker failed: {}", e);
            }
        }
    }
}
