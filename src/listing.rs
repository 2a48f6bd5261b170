//! Listing definitions shared by site adapters and the listing store
//!
//! A listing is created by a site adapter from one fetched page and handed
//! to the store unchanged.
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// The website a listing was discovered on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum ListingSource {
    Kleinanzeigen,
    Immoscout,
    Immowelt,
}

impl ListingSource {
    /// All known sources, in a stable order
    pub const ALL: [ListingSource; 3] = [Self::Kleinanzeigen, Self::Immoscout, Self::Immowelt];

    /// Converts the source to its database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kleinanzeigen => "kleinanzeigen",
            Self::Immoscout => "immoscout",
            Self::Immowelt => "immowelt",
        }
    }

    /// Name of the environment variable holding this site's proxy URL
    pub fn proxy_env_var(&self) -> String {
        format!("PROXY_URL__{}", self.as_str().to_uppercase())
    }
}

impl fmt::Display for ListingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kleinanzeigen" => Ok(Self::Kleinanzeigen),
            "immoscout" => Ok(Self::Immoscout),
            "immowelt" => Ok(Self::Immowelt),
            other => Err(format!("unknown listing source '{}'", other)),
        }
    }
}

/// A single extracted real-estate ad
///
/// `(external_id, source)` is the natural key. Fields are only settable
/// through the builder methods, which consume the value, so a listing
/// cannot change once an adapter hands it over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    external_id: String,
    source: ListingSource,
    created_at: Option<DateTime<Utc>>,
    modified_at: Option<DateTime<Utc>>,
}

impl Listing {
    pub fn new(external_id: impl Into<String>, source: ListingSource) -> Self {
        Self {
            external_id: external_id.into(),
            source,
            created_at: None,
            modified_at: None,
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_modified_at(mut self, modified_at: DateTime<Utc>) -> Self {
        self.modified_at = Some(modified_at);
        self
    }

    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    pub fn source(&self) -> ListingSource {
        self.source
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.modified_at
    }

    /// Returns the `(external_id, source)` identity key
    pub fn natural_key(&self) -> (&str, ListingSource) {
        (&self.external_id, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_source_roundtrip() {
        for source in ListingSource::ALL {
            assert_eq!(source.as_str().parse::<ListingSource>(), Ok(source));
        }
        assert!("ebay".parse::<ListingSource>().is_err());
    }

    #[test]
    fn test_proxy_env_var() {
        assert_eq!(
            ListingSource::Kleinanzeigen.proxy_env_var(),
            "PROXY_URL__KLEINANZEIGEN"
        );
    }

    #[test]
    fn test_listing_builder() {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let listing = Listing::new("123", ListingSource::Immowelt).with_created_at(created);

        assert_eq!(listing.external_id(), "123");
        assert_eq!(listing.created_at(), Some(created));
        assert_eq!(listing.modified_at(), None);
        assert_eq!(listing.natural_key(), ("123", ListingSource::Immowelt));
    }
}
