//! Direct HTTP fetch backend
//!
//! Sends one GET per fetch with a desktop browser user agent, optionally
//! through a proxy. Any status other than 200 is a failure.

use crate::config::MethodConfig;
use crate::crawler::fetcher::FetchBackend;
use crate::{ConfigError, FetchError};
use async_trait::async_trait;
use reqwest::{Client, Proxy, StatusCode};

/// Default desktop user agent
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// reqwest-based fetch backend
pub struct HttpBackend {
    client: Client,
}

impl HttpBackend {
    /// Builds the HTTP client for a fetch method
    ///
    /// # Arguments
    ///
    /// * `config` - The fetch method settings (timeout, user agent)
    /// * `proxy_url` - Proxy for all requests, if any
    ///
    /// # Returns
    ///
    /// * `Ok(HttpBackend)` - Client built
    /// * `Err(ConfigError)` - The proxy URL or client settings were rejected
    pub fn new(config: &MethodConfig, proxy_url: Option<&str>) -> Result<Self, ConfigError> {
        let user_agent = config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);

        let mut builder = Client::builder()
            .user_agent(user_agent)
            .timeout(config.timeout())
            .gzip(true)
            .brotli(true);

        if let Some(proxy_url) = proxy_url {
            let proxy = Proxy::all(proxy_url)
                .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy URL: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| ConfigError::Validation(format!("Cannot build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl FetchBackend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))
    }
}
