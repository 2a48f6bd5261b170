//! Crawler module for page fetching and crawl orchestration
//!
//! This module contains the core crawling logic, including:
//! - HTTP and headless browser fetch backends
//! - Fixed-delay retries and bot-detection recovery
//! - The category, location and page traversal with its worker pools

mod bot_detection;
mod browser_backend;
mod coordinator;
mod fetcher;
mod http_backend;
mod retry;
mod stats;

pub use bot_detection::{BotDetector, DEFAULT_PHRASES};
pub use browser_backend::BrowserBackend;
pub use coordinator::Orchestrator;
pub use fetcher::{build_backend, FetchBackend, FetchMethod, Fetcher, PageSource};
pub use http_backend::{HttpBackend, DEFAULT_USER_AGENT};
pub use retry::RetryPolicy;
pub use stats::{CrawlStats, CrawlSummary};
