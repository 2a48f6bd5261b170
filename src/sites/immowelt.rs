//! Immowelt adapter
//!
//! Listing data is shipped inside the `__UFRN_FETCHER__` bootstrap script as
//! an LZ-string compressed, base64 encoded JSON document.

use crate::listing::{Listing, ListingSource};
use crate::sites::{parse_timestamp, Category, SiteAdapter};
use crate::{ExtractionError, FinderError};
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::Value;

const BASE_URL: &str = "https://www.immowelt.de/classified-search";

const SCRIPT_MARKER: &str = "__UFRN_FETCHER__";
const PAYLOAD_KEY: &str = "classified-serp-init-data";

const CATEGORIES: [Category; 4] = [
    Category::new(
        "WOHNUNG_MIETEN",
        "estateTypes=Apartment&distributionTypes=Rent&projectTypes=Stock,Flatsharing,New_Build",
    ),
    Category::new(
        "WOHNUNG_KAUFEN",
        "estateTypes=Apartment&distributionTypes=Buy",
    ),
    Category::new("HAUS_MIETEN", "estateTypes=House&distributionTypes=Rent"),
    Category::new("HAUS_KAUFEN", "estateTypes=House&distributionTypes=Buy"),
];

pub struct ImmoweltAdapter {
    base_url: String,
    locations: Vec<String>,
}

impl ImmoweltAdapter {
    pub fn new(locations: Vec<String>) -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            locations,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

fn selector(css: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(css).map_err(|e| ExtractionError::Malformed(format!("selector {}: {}", css, e)))
}

fn is_base64_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=')
}

/// Cuts the encoded payload out of the bootstrap script
///
/// The key may appear JSON-escaped (`\"key\":\"...`) or plain; the quotes
/// and backslashes around the value are never part of the base64 alphabet.
fn encoded_payload(script: &str) -> Option<&str> {
    let start = script.find(PAYLOAD_KEY)? + PAYLOAD_KEY.len();
    let rest = &script[start..];
    let value_start = rest.find(is_base64_char)?;
    let value = &rest[value_start..];
    let end = value.find(|c| !is_base64_char(c)).unwrap_or(value.len());
    Some(&value[..end])
}

/// Decodes the serp payload embedded in a result page
fn decode_payload(content: &str) -> Result<Value, ExtractionError> {
    let document = Html::parse_document(content);
    let script_selector = selector("script")?;

    let script = document
        .select(&script_selector)
        .map(|script| script.text().collect::<String>())
        .find(|text| text.contains(SCRIPT_MARKER))
        .ok_or_else(|| ExtractionError::ElementNotFound(format!("script {}", SCRIPT_MARKER)))?;

    let encoded = encoded_payload(&script)
        .ok_or_else(|| ExtractionError::Malformed(format!("{} missing from script", PAYLOAD_KEY)))?;

    let decoded = lz_str::decompress_from_base64(encoded)
        .and_then(|wide| String::from_utf16(&wide).ok())
        .filter(|text| !text.is_empty())
        .ok_or_else(|| ExtractionError::Malformed(format!("cannot decode {}", PAYLOAD_KEY)))?;

    Ok(serde_json::from_str(&decoded)?)
}

fn required_str<'a>(metadata: &'a Value, key: &str) -> Result<&'a str, ExtractionError> {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ExtractionError::Malformed(format!("{} missing in listing metadata", key)))
}

fn listing_from_metadata(metadata: &Value) -> Result<Listing, ExtractionError> {
    let id = required_str(metadata, "id")?;
    let created = parse_timestamp(required_str(metadata, "creationDate")?)?;
    let modified = parse_timestamp(required_str(metadata, "updateDate")?)?;

    Ok(Listing::new(id, ListingSource::Immowelt)
        .with_created_at(created)
        .with_modified_at(modified))
}

#[async_trait]
impl SiteAdapter for ImmoweltAdapter {
    fn source(&self) -> ListingSource {
        ListingSource::Immowelt
    }

    fn categories(&self) -> Vec<Category> {
        CATEGORIES.to_vec()
    }

    async fn locations(&self) -> Result<Vec<String>, FinderError> {
        let mut locations = self.locations.clone();
        locations.sort();
        locations.dedup();
        Ok(locations)
    }

    fn build_url(&self, category: &Category, location: &str, page: u32) -> String {
        let mut url = format!(
            "{}?{}&locations={}&order=DateDesc",
            self.base_url, category.value, location
        );
        if page > 1 {
            url.push_str(&format!("&page={}", page));
        }
        url
    }

    fn extract_listings(&self, content: &str) -> Result<Vec<Listing>, ExtractionError> {
        let payload = decode_payload(content)?;

        let Some(entries) = payload
            .pointer("/pageProps/classifiedsData")
            .and_then(Value::as_object)
        else {
            return Ok(Vec::new());
        };

        entries
            .values()
            .filter_map(|entry| entry.get("metadata"))
            .map(listing_from_metadata)
            .collect()
    }

    fn extract_page_count(&self, content: &str) -> Result<u32, ExtractionError> {
        let document = Html::parse_document(content);
        let nav_selector = selector(r#"nav[data-testid="serp-pagination-testid"]"#)?;
        let button_selector = selector("button")?;

        let Some(nav) = document.select(&nav_selector).next() else {
            tracing::warn!("No pagination found, assuming a single page");
            return Ok(1);
        };

        let buttons: Vec<String> = nav
            .select(&button_selector)
            .map(|button| button.text().collect::<String>().trim().to_string())
            .collect();

        if buttons.len() < 2 {
            tracing::warn!("No pagination buttons found, assuming a single page");
            return Ok(1);
        }

        // The last button is "next"; the one before holds the last page number
        let last = &buttons[buttons.len() - 2];
        last.parse()
            .map_err(|_| ExtractionError::Malformed(format!("pagination label '{}'", last)))
    }
}
