//! Page fetcher
//!
//! This module composes the pieces that turn a URL into page content:
//! - A [`FetchBackend`] chosen by the configured method name
//! - A fixed-delay [`RetryPolicy`] around every backend call
//! - Optional proxy egress authorization held for the fetcher's lifetime

use crate::config::{Config, MethodConfig};
use crate::crawler::browser_backend::BrowserBackend;
use crate::crawler::http_backend::HttpBackend;
use crate::crawler::retry::RetryPolicy;
use crate::egress::{EgressAuthorizer, EgressGuard, HttpEgressAuthorizer};
use crate::listing::ListingSource;
use crate::{ConfigError, FetchError, FinderError};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Available fetch backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMethod {
    /// Plain HTTP client
    Http,
    /// Headless Chrome
    Browser,
}

impl FetchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Browser => "browser",
        }
    }
}

impl fmt::Display for FetchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Self::Http),
            "browser" => Ok(Self::Browser),
            other => Err(ConfigError::UnknownFetchMethod(other.to_string())),
        }
    }
}

/// One way of retrieving a URL's markup
///
/// Non-success responses, timeouts and backend failures all surface as
/// [`FetchError`].
#[async_trait]
pub trait FetchBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Anything the orchestrator can pull page content from
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Builds the backend for a method
pub fn build_backend(
    method: &MethodConfig,
    proxy_url: Option<&str>,
) -> Result<Arc<dyn FetchBackend>, ConfigError> {
    let backend: Arc<dyn FetchBackend> = match method.backend.parse::<FetchMethod>()? {
        FetchMethod::Http => Arc::new(HttpBackend::new(method, proxy_url)?),
        FetchMethod::Browser => Arc::new(BrowserBackend::new(method, proxy_url)),
    };
    Ok(backend)
}

/// Backend + retry policy + egress authorization behind one `fetch` call
pub struct Fetcher {
    backend: Arc<dyn FetchBackend>,
    retry: RetryPolicy,
    egress: Option<EgressGuard>,
}

impl Fetcher {
    pub fn new(backend: Arc<dyn FetchBackend>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            retry,
            egress: None,
        }
    }

    /// Builds the fetcher configured for a site
    ///
    /// Resolves the site's method and proxy. When a proxy is in use and an
    /// egress endpoint is configured, the current IP is authorized before
    /// returning; an authorization failure only logs a warning.
    ///
    /// # Returns
    ///
    /// * `Ok(Fetcher)` - Ready to fetch
    /// * `Err(FinderError::Config)` - Unknown method or missing setting
    pub async fn for_site(config: &Config, source: ListingSource) -> Result<Self, FinderError> {
        let site = config.site(source)?;
        let method = config.method(&site.method)?;
        let proxy_url = site.proxy_url(source)?;

        let backend = build_backend(method, proxy_url.as_deref())?;
        let retry = RetryPolicy::new(method.max_retries, method.retry_delay());
        let fetcher = Self::new(backend, retry);

        match (&proxy_url, &config.egress) {
            (Some(_), Some(egress)) => {
                tracing::info!("Proxy configured for {}, authorizing egress", source);
                match HttpEgressAuthorizer::new(egress) {
                    Ok(authorizer) => Ok(fetcher.with_egress(Arc::new(authorizer)).await),
                    Err(e) => {
                        tracing::warn!("Could not set up egress authorization: {}", e);
                        Ok(fetcher)
                    }
                }
            }
            (Some(_), None) => {
                tracing::info!("Proxy configured for {} without egress endpoint", source);
                Ok(fetcher)
            }
            _ => Ok(fetcher),
        }
    }

    /// Authorizes egress for this fetcher's lifetime
    pub async fn with_egress(mut self, authorizer: Arc<dyn EgressAuthorizer>) -> Self {
        self.egress = Some(EgressGuard::acquire(authorizer).await);
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Releases the egress authorization, if any
    pub async fn shutdown(&self) {
        if let Some(guard) = &self.egress {
            guard.release().await;
        }
    }
}

#[async_trait]
impl PageSource for Fetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let label = format!("Fetch {} via {}", url, self.backend.name());
        self.retry.run(&label, || self.backend.fetch(url)).await
    }
}
