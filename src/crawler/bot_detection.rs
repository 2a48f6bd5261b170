//! Anti-automation page detection
//!
//! Some sites answer automated requests with a challenge page instead of
//! results. The detector recognizes those pages by a fixed phrase list and
//! gives the caller one chance to refresh before the content is used as is.

use crate::FetchError;

/// Phrases that mark a challenge page, matched case-insensitively
pub const DEFAULT_PHRASES: &[&str] = &[
    "ich bin kein roboter",
    "i am not a robot",
    "i\u{2019}m not a robot",
    "captcha",
    "unusual traffic",
    "verify you are a human",
    "verify that you are human",
];

/// Case-insensitive substring matcher over a phrase list
#[derive(Debug, Clone)]
pub struct BotDetector {
    phrases: Vec<String>,
}

impl Default for BotDetector {
    fn default() -> Self {
        Self::new(DEFAULT_PHRASES.iter().copied())
    }
}

impl BotDetector {
    pub fn new<'a>(phrases: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            phrases: phrases.into_iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Returns the first phrase found in `html`, if any
    pub fn detect(&self, html: &str) -> Option<&str> {
        let text = html.to_lowercase();
        self.phrases
            .iter()
            .find(|phrase| text.contains(phrase.as_str()))
            .map(String::as_str)
    }

    /// Gives a challenge page exactly one refresh
    ///
    /// If `content` matches a phrase, `refresh` is called once and its
    /// content is returned whether or not it still matches. A failed refresh
    /// keeps the original content. Detection never produces an error.
    pub fn recover<F>(&self, url: &str, content: String, refresh: F) -> String
    where
        F: FnOnce() -> Result<String, FetchError>,
    {
        let Some(phrase) = self.detect(&content) else {
            return content;
        };

        tracing::info!(url, "Bot detection pattern found: {:?}, refreshing once", phrase);

        match refresh() {
            Ok(refreshed) => {
                if let Some(phrase) = self.detect(&refreshed) {
                    tracing::warn!(url, "Bot detection persists after refresh: {:?}", phrase);
                }
                refreshed
            }
            Err(e) => {
                tracing::warn!(url, "Refresh after bot detection failed: {}", e);
                content
            }
        }
    }
}
