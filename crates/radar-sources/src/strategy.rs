use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use radar_core::{FetchResult, Source};
use radar_storage::{BlockingPool, HttpFetcher, Pool};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::browser::{BrowserDriver, BrowserError, RenderedPage};
use crate::bypass::BypassFetcher;
use crate::challenge::is_challenge_page;
use crate::links::select_follow_links;
use crate::text::{extract_page_in, PageText};
use crate::{FetchStrategy, SourceError};

/// Single GET, parsed to text.
pub struct HttpStrategy {
    http: HttpFetcher,
    blocking: BlockingPool,
}

impl HttpStrategy {
    pub fn new(http: HttpFetcher, blocking: BlockingPool) -> Self {
        Self { http, blocking }
    }

    async fn load(&self, url: &str) -> Result<PageText, SourceError> {
        let resp = self.http.fetch_text(url).await?;
        Ok(extract_page_in(&self.blocking, resp.body, resp.final_url).await?)
    }
}

#[async_trait]
impl FetchStrategy for HttpStrategy {
    fn pool(&self) -> Pool {
        Pool::Fetch
    }

    async fn fetch(&self, source: &Source) -> Vec<FetchResult> {
        let Some(url) = source.url() else {
            return vec![FetchResult::failed(source, "", SourceError::MissingUrl.to_string())];
        };

        match self.load(url).await {
            Ok(page) => {
                debug!(source = %source.name, url = %page.url, chars = page.text.len(), "page fetched");
                vec![FetchResult::ok(source, page.url, page.text)]
            }
            Err(err) => {
                warn!(source = %source.name, url, error = %err, "page fetch failed");
                vec![FetchResult::failed(source, url, err.to_string())]
            }
        }
    }
}

/// Headless rendering with optional link following and a bypass fallback
/// for challenge pages.
pub struct BrowserStrategy {
    driver: Arc<dyn BrowserDriver>,
    bypass: Arc<dyn BypassFetcher>,
    blocking: BlockingPool,
    render_timeout: Duration,
    politeness_delay: Duration,
}

impl BrowserStrategy {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        bypass: Arc<dyn BypassFetcher>,
        blocking: BlockingPool,
    ) -> Self {
        Self {
            driver,
            bypass,
            blocking,
            render_timeout: Duration::from_secs(60),
            politeness_delay: Duration::from_millis(500),
        }
    }

    pub fn with_render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = timeout;
        self
    }

    pub fn with_politeness_delay(mut self, delay: Duration) -> Self {
        self.politeness_delay = delay;
        self
    }

    async fn render(&self, url: &str, wait_for: Option<&str>) -> Result<RenderedPage, BrowserError> {
        tokio::time::timeout(self.render_timeout, self.driver.render(url, wait_for))
            .await
            .map_err(|_| BrowserError::Timeout {
                url: url.to_string(),
                secs: self.render_timeout.as_secs(),
            })?
    }

    async fn parse(&self, page: RenderedPage) -> Result<PageText, SourceError> {
        Ok(extract_page_in(&self.blocking, page.html, page.url).await?)
    }

    /// Renders one URL, falling back to the bypass proxy when the browser
    /// fails outright or lands on a bot challenge.
    async fn load(&self, url: &str, wait_for: Option<&str>) -> Result<PageText, SourceError> {
        let browser_error = match self.render(url, wait_for).await {
            Ok(rendered) => {
                let page = self.parse(rendered).await?;
                if !is_challenge_page(&page.title, &page.text) {
                    return Ok(page);
                }
                warn!(url, driver = self.driver.name(), "bot challenge detected, trying bypass");
                SourceError::Challenge {
                    url: url.to_string(),
                }
            }
            Err(err) => {
                warn!(url, driver = self.driver.name(), error = %err, "browser render failed, trying bypass");
                SourceError::Browser(err)
            }
        };

        let Some(solved) = self.bypass.fetch_via_bypass(url).await else {
            return Err(browser_error);
        };
        let page = self.parse(solved).await?;
        if is_challenge_page(&page.title, &page.text) {
            return Err(SourceError::Challenge {
                url: url.to_string(),
            });
        }
        info!(url, chars = page.text.len(), "bypass fetch succeeded");
        Ok(page)
    }
}

#[async_trait]
impl FetchStrategy for BrowserStrategy {
    fn pool(&self) -> Pool {
        Pool::Browser
    }

    async fn fetch(&self, source: &Source) -> Vec<FetchResult> {
        let Some(url) = source.url() else {
            return vec![FetchResult::failed(source, "", SourceError::MissingUrl.to_string())];
        };
        let wait_for = source.config.wait_for.as_deref();

        let main = match self.load(url, wait_for).await {
            Ok(page) => page,
            Err(err) => {
                warn!(source = %source.name, url, error = %err, "browser fetch failed");
                return vec![FetchResult::failed(source, url, err.to_string())];
            }
        };

        let to_follow = match source.config.link_pattern.as_deref() {
            Some(pattern) => match Regex::new(pattern) {
                Ok(re) => select_follow_links(&main.links, &main.url, &re, source.config.max_links),
                Err(err) => {
                    warn!(source = %source.name, pattern, error = %err, "invalid link pattern, not following links");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let mut results = vec![FetchResult::ok(source, main.url, main.text)];
        if !to_follow.is_empty() {
            info!(source = %source.name, links = to_follow.len(), "following links");
        }
        for link in to_follow {
            tokio::time::sleep(self.politeness_delay).await;
            match self.load(&link, wait_for).await {
                Ok(page) => results.push(FetchResult::ok(source, page.url, page.text)),
                Err(err) => warn!(source = %source.name, url = %link, error = %err, "skipping followed link"),
            }
        }
        results
    }
}
