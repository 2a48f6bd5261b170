//! Kleinanzeigen adapter
//!
//! Result pages are plain server-rendered HTML. The total result count sits
//! in the breadcrumb summary and pages hold 25 ads each.

use crate::listing::{Listing, ListingSource};
use crate::sites::{
    dedup_listings, total_to_pages, Category, ConcurrencyPolicy, SiteAdapter, MAX_PAGES,
};
use crate::storage::LocationReference;
use crate::{ExtractionError, FinderError};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use std::sync::Arc;

const BASE_URL: &str = "https://www.kleinanzeigen.de";

/// Ads shown per result page
pub const LISTINGS_PER_PAGE: u64 = 25;

const CATEGORIES: [Category; 4] = [
    Category::new("WOHNUNG_MIETEN", "203"),
    Category::new("WOHNUNG_KAUFEN", "196"),
    Category::new("HAUS_MIETEN", "205"),
    Category::new("HAUS_KAUFEN", "208"),
];

pub struct KleinanzeigenAdapter {
    base_url: String,
    location_ids: Vec<String>,
    states: Vec<String>,
    reference: Arc<dyn LocationReference>,
}

impl KleinanzeigenAdapter {
    pub fn new(
        location_ids: Vec<String>,
        states: Vec<String>,
        reference: Arc<dyn LocationReference>,
    ) -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            location_ids,
            states,
            reference,
        }
    }

    /// Points the adapter at another host
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

fn selector(css: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(css).map_err(|e| ExtractionError::Malformed(format!("selector {}: {}", css, e)))
}

/// Pulls the total out of a summary such as "1 - 25 von 1.234 Ergebnissen"
fn parse_total(summary: &str) -> Option<u64> {
    let (_, after) = summary.split_once("von ")?;
    let number = after.split_whitespace().next()?.replace('.', "");
    number.parse().ok()
}

#[async_trait]
impl SiteAdapter for KleinanzeigenAdapter {
    fn source(&self) -> ListingSource {
        ListingSource::Kleinanzeigen
    }

    fn categories(&self) -> Vec<Category> {
        CATEGORIES.to_vec()
    }

    async fn locations(&self) -> Result<Vec<String>, FinderError> {
        let mut ids: BTreeSet<String> = self.location_ids.iter().cloned().collect();

        for state in &self.states {
            let resolved = self.reference.location_ids_for_state(state).await?;
            tracing::debug!("Resolved {} location ids for state {}", resolved.len(), state);
            ids.extend(resolved);
        }

        Ok(ids.into_iter().collect())
    }

    fn build_url(&self, category: &Category, location: &str, page: u32) -> String {
        let page_path = if page > 1 {
            format!("seite:{}/", page)
        } else {
            String::new()
        };
        format!(
            "{}/{}c{}l{}",
            self.base_url, page_path, category.value, location
        )
    }

    fn extract_listings(&self, content: &str) -> Result<Vec<Listing>, ExtractionError> {
        let document = Html::parse_document(content);
        let table_selector = selector("ul#srchrslt-adtable")?;
        let article_selector = selector("article[data-adid]")?;

        let Some(table) = document.select(&table_selector).next() else {
            return Ok(Vec::new());
        };

        let mut listings = Vec::new();
        for article in table.select(&article_selector) {
            match article.value().attr("data-adid").map(str::trim) {
                Some(id) if !id.is_empty() => {
                    listings.push(Listing::new(id, ListingSource::Kleinanzeigen));
                }
                _ => tracing::warn!("Result entry without an ad id, skipping"),
            }
        }

        Ok(dedup_listings(listings))
    }

    fn extract_page_count(&self, content: &str) -> Result<u32, ExtractionError> {
        let document = Html::parse_document(content);
        let summary_selector = selector("span.breadcrump-summary")?;

        let Some(summary) = document.select(&summary_selector).next() else {
            tracing::warn!("No result summary found, assuming a single page");
            return Ok(1);
        };

        let text = summary.text().collect::<String>();
        if text.contains("Es wurden keine") {
            return Ok(0);
        }

        let text = text.trim();
        if text.is_empty() {
            return Err(ExtractionError::Malformed(
                "result summary is empty".to_string(),
            ));
        }

        match parse_total(text) {
            Some(total) => {
                tracing::debug!("Total listings: {}", total);
                Ok(total_to_pages(total, LISTINGS_PER_PAGE, MAX_PAGES))
            }
            None => {
                tracing::warn!("Result total is not a number, assuming 0: {}", text);
                Ok(0)
            }
        }
    }

    fn concurrency(&self) -> ConcurrencyPolicy {
        ConcurrencyPolicy {
            parallel_locations: true,
            parallel_pages: true,
        }
    }
}
