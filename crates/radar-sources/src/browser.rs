//! Headless browser drivers. Each returns the rendered DOM of one URL.

use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

/// How long Browserless waits for a configured selector before capturing anyway.
const WAIT_FOR_SELECTOR_MS: u64 = 10_000;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("browser api error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("browser render timed out after {secs}s for {url}")]
    Timeout { url: String, secs: u64 },
    #[error("browser returned an empty document for {url}")]
    Empty { url: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    pub url: String,
    pub html: String,
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    fn name(&self) -> &'static str;

    async fn render(&self, url: &str, wait_for: Option<&str>) -> Result<RenderedPage, BrowserError>;
}

/// Remote rendering through a Browserless `/content` endpoint.
pub struct BrowserlessDriver {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    render_timeout: Duration,
}

impl BrowserlessDriver {
    pub fn new(
        base_url: &str,
        token: Option<&str>,
        render_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(render_timeout + Duration::from_secs(5))
            .build()
            .context("building browserless client")?;
        info!(base_url, "browserless driver initialized");
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            render_timeout,
        })
    }
}

#[async_trait]
impl BrowserDriver for BrowserlessDriver {
    fn name(&self) -> &'static str {
        "browserless"
    }

    async fn render(&self, url: &str, wait_for: Option<&str>) -> Result<RenderedPage, BrowserError> {
        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(token) = &self.token {
            endpoint.push_str(&format!("?token={token}"));
        }

        let mut body = json!({
            "url": url,
            "gotoOptions": {
                "waitUntil": "networkidle2",
                "timeout": self.render_timeout.as_millis() as u64,
            },
        });
        if let Some(selector) = wait_for {
            body["waitForSelector"] = json!({ "selector": selector, "timeout": WAIT_FOR_SELECTOR_MS });
        }

        debug!(url, driver = "browserless", "rendering page");
        let resp = self.client.post(&endpoint).json(&body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let html = resp.text().await?;
        if html.trim().is_empty() {
            return Err(BrowserError::Empty {
                url: url.to_string(),
            });
        }
        Ok(RenderedPage {
            url: url.to_string(),
            html,
        })
    }
}

/// Local headless Chromium via `--dump-dom`. Wait conditions are not supported.
pub struct ChromeDriver {
    chrome_bin: String,
    render_timeout: Duration,
}

impl ChromeDriver {
    pub fn new(chrome_bin: impl Into<String>, render_timeout: Duration) -> Self {
        let chrome_bin = chrome_bin.into();
        info!(chrome_bin = %chrome_bin, "chrome driver initialized");
        Self {
            chrome_bin,
            render_timeout,
        }
    }
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    fn name(&self) -> &'static str {
        "chrome"
    }

    async fn render(&self, url: &str, wait_for: Option<&str>) -> Result<RenderedPage, BrowserError> {
        if let Some(selector) = wait_for {
            debug!(url, selector, "chrome driver ignores wait-for selectors");
        }

        let profile_dir = tempfile::tempdir()
            .map_err(|err| BrowserError::Launch(format!("creating profile dir: {err}")))?;

        let output = tokio::time::timeout(
            self.render_timeout,
            tokio::process::Command::new(&self.chrome_bin)
                .args([
                    "--headless",
                    "--no-sandbox",
                    "--disable-gpu",
                    "--disable-dev-shm-usage",
                    "--disable-blink-features=AutomationControlled",
                    &format!("--user-data-dir={}", profile_dir.path().display()),
                    "--dump-dom",
                    url,
                ])
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| BrowserError::Timeout {
            url: url.to_string(),
            secs: self.render_timeout.as_secs(),
        })?
        .map_err(|err| BrowserError::Launch(format!("{}: {err}", self.chrome_bin)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(url, driver = "chrome", stderr = %stderr, "chrome exited with error");
            return Err(BrowserError::Launch(format!("chrome exited with {}", output.status)));
        }

        let html = String::from_utf8_lossy(&output.stdout).into_owned();
        if html.trim().is_empty() {
            return Err(BrowserError::Empty {
                url: url.to_string(),
            });
        }
        Ok(RenderedPage {
            url: url.to_string(),
            html,
        })
    }
}
