//! ImmobilienScout24 adapter
//!
//! The result list is embedded as a JavaScript object literal assigned to
//! `resultListModel` inside the `IS24.resultList` script.

use crate::listing::{Listing, ListingSource};
use crate::sites::{parse_timestamp, Category, SiteAdapter};
use crate::{ExtractionError, FinderError};
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::Value;

const BASE_URL: &str = "https://www.immobilienscout24.de/Suche/shape";

const SCRIPT_MARKER: &str = "IS24.resultList";
const MODEL_START: &str = "resultListModel: ";
const MODEL_END: &str = "isUserLoggedIn";

const CATEGORIES: [Category; 5] = [
    Category::new("WOHNUNG_MIETEN", "wohnung-mieten"),
    Category::new("WOHNUNG_KAUFEN", "wohnung-kaufen"),
    Category::new("HAUS_MIETEN", "haus-mieten"),
    Category::new("HAUS_KAUFEN", "haus-kaufen"),
    Category::new("NEUBAUWOHNUNG_KAUFEN", "neubauwohnung-kaufen"),
];

pub struct ImmoscoutAdapter {
    base_url: String,
    locations: Vec<String>,
}

impl ImmoscoutAdapter {
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

/// Turns the object literal between the model markers into JSON text
fn model_json(script: &str) -> Option<String> {
    let (_, after) = script.split_once(MODEL_START)?;
    let (literal, _) = after.split_once(MODEL_END)?;
    let literal = literal.trim();
    let literal = literal.strip_suffix(',').unwrap_or(literal);
    Some(literal.replace(": undefined", ": null"))
}

fn decode_model(content: &str) -> Result<Value, ExtractionError> {
    let document = Html::parse_document(content);
    let script_selector = selector("script")?;

    let script = document
        .select(&script_selector)
        .map(|script| script.text().collect::<String>())
        .find(|text| text.contains(SCRIPT_MARKER))
        .ok_or_else(|| ExtractionError::ElementNotFound(format!("script {}", SCRIPT_MARKER)))?;

    let json = model_json(&script)
        .ok_or_else(|| ExtractionError::Malformed(format!("{} not found", MODEL_START.trim())))?;

    Ok(serde_json::from_str(&json)?)
}

/// Listing ids arrive as strings or numbers
fn id_of(entry: &Value) -> Option<String> {
    match entry.get("@id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn listing_from_entry(entry: &Value) -> Result<Listing, ExtractionError> {
    let id = id_of(entry)
        .ok_or_else(|| ExtractionError::Malformed("@id missing in result entry".to_string()))?;
    let timestamp = |key: &str| {
        entry
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ExtractionError::Malformed(format!("{} missing in result entry {}", key, id))
            })
            .and_then(parse_timestamp)
    };

    Ok(Listing::new(id.clone(), ListingSource::Immoscout)
        .with_created_at(timestamp("@creation")?)
        .with_modified_at(timestamp("@modification")?))
}

/// A single entry is sometimes serialized as an object instead of a list
fn as_entries(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![value],
        _ => Vec::new(),
    }
}

#[async_trait]
impl SiteAdapter for ImmoscoutAdapter {
    fn source(&self) -> ListingSource {
        ListingSource::Immoscout
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
            "{}/{}?shape={}&enteredFrom=result_list&sorting=2",
            self.base_url, category.value, location
        );
        if page > 1 {
            url.push_str(&format!("&pagenumber={}", page));
        }
        url
    }

    fn extract_listings(&self, content: &str) -> Result<Vec<Listing>, ExtractionError> {
        let model = decode_model(content)?;

        let result_list = model
            .get("searchResponseModel")
            .and_then(|m| m.get("resultlist.resultlist"))
            .and_then(|m| m.get("resultlistEntries"))
            .and_then(|m| m.get(0))
            .ok_or_else(|| ExtractionError::ElementNotFound("resultlistEntries".to_string()))?;

        let Some(entries) = result_list.get("resultlistEntry") else {
            tracing::warn!("No listings on this page, skipping");
            return Ok(Vec::new());
        };

        let mut listings = Vec::new();
        for entry in as_entries(entries) {
            let complete = ["@id", "@creation", "@modification"]
                .iter()
                .all(|key| entry.get(*key).is_some());
            if !complete {
                continue;
            }
            listings.push(listing_from_entry(entry)?);

            let similar = entry
                .pointer("/similarObjects/0/similarObject")
                .map(as_entries)
                .unwrap_or_default();
            for object in similar {
                if object.get("@id").is_some() {
                    listings.push(listing_from_entry(object)?);
                }
            }
        }

        Ok(listings)
    }

    fn extract_page_count(&self, content: &str) -> Result<u32, ExtractionError> {
        let document = Html::parse_document(content);
        let button_selector = selector(r#"[data-testid="pagination-button"]"#)?;

        let buttons: Vec<String> = document
            .select(&button_selector)
            .map(|button| button.text().collect::<String>().trim().to_string())
            .collect();

        if buttons.len() < 2 {
            tracing::warn!("No pagination buttons found, assuming a single page");
            return Ok(1);
        }

        let last = &buttons[buttons.len() - 1];
        last.parse()
            .map_err(|_| ExtractionError::Malformed(format!("pagination label '{}'", last)))
    }
}
