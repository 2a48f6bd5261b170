//! Headless browser fetch backend
//!
//! Launches a headless Chrome session per fetch, renders the page and reads
//! the resulting markup. Challenge pages get one in-tab reload through the
//! [`BotDetector`] before the content is returned.

use crate::config::MethodConfig;
use crate::crawler::bot_detection::BotDetector;
use crate::crawler::fetcher::FetchBackend;
use crate::FetchError;
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsString;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Launch and navigation settings for one browser session
#[derive(Debug, Clone)]
struct BrowserSettings {
    headless: bool,
    timeout: Duration,
    settle: Duration,
    locale: Option<String>,
    proxy_url: Option<String>,
}

/// headless_chrome-based fetch backend
pub struct BrowserBackend {
    settings: BrowserSettings,
    detector: BotDetector,
}

impl BrowserBackend {
    pub fn new(config: &MethodConfig, proxy_url: Option<&str>) -> Self {
        Self {
            settings: BrowserSettings {
                headless: config.headless,
                timeout: config.timeout(),
                settle: config.settle(),
                locale: config.locale.clone(),
                proxy_url: proxy_url.map(str::to_string),
            },
            detector: BotDetector::default(),
        }
    }
}

#[async_trait]
impl FetchBackend for BrowserBackend {
    fn name(&self) -> &'static str {
        "browser"
    }

    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let settings = self.settings.clone();
        let detector = self.detector.clone();
        let owned_url = url.to_string();

        // headless_chrome is synchronous; keep it off the async workers.
        tokio::task::spawn_blocking(move || render_page(&settings, &detector, &owned_url))
            .await
            .map_err(|e| FetchError::Worker(format!("browser task for {} failed: {}", url, e)))?
    }
}

fn render_page(
    settings: &BrowserSettings,
    detector: &BotDetector,
    url: &str,
) -> Result<String, FetchError> {
    let browser_error = |e: &dyn std::fmt::Display| FetchError::Browser {
        url: url.to_string(),
        message: e.to_string(),
    };

    let mut args: Vec<OsString> = Vec::new();
    if let Some(locale) = &settings.locale {
        args.push(OsString::from(format!("--lang={}", locale)));
    }
    let arg_refs = args.iter().map(OsString::as_os_str).collect::<Vec<_>>();

    let options = LaunchOptions::default_builder()
        .headless(settings.headless)
        .proxy_server(settings.proxy_url.as_deref())
        .idle_browser_timeout(settings.timeout * 2)
        .args(arg_refs)
        .build()
        .map_err(|e| browser_error(&e))?;

    tracing::debug!("Launching browser for {}", url);
    let browser = Browser::new(options).map_err(|e| browser_error(&e))?;
    let tab = browser.new_tab().map_err(|e| browser_error(&e))?;
    tab.set_default_timeout(settings.timeout);

    tab.navigate_to(url)
        .and_then(|tab| tab.wait_until_navigated())
        .map_err(|e| browser_error(&e))?;
    let content = read_settled(&tab, settings.settle).map_err(|e| browser_error(&e))?;

    Ok(detector.recover(url, content, || {
        tab.reload(true, None)
            .and_then(|tab| tab.wait_until_navigated())
            .map_err(|e| browser_error(&e))?;
        read_settled(&tab, settings.settle).map_err(|e| browser_error(&e))
    }))
}

fn read_settled(tab: &Arc<Tab>, settle: Duration) -> anyhow::Result<String> {
    if !settle.is_zero() {
        thread::sleep(settle);
    }
    tab.get_content()
}
