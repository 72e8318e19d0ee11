//! Fallback fetch path for pages a headless browser cannot get past.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::browser::RenderedPage;

#[async_trait]
pub trait BypassFetcher: Send + Sync {
    /// `None` means the bypass could not produce content; details are logged.
    async fn fetch_via_bypass(&self, url: &str) -> Option<RenderedPage>;
}

/// FlareSolverr `request.get` client.
pub struct FlareSolverrClient {
    client: reqwest::Client,
    endpoint: String,
    max_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SolverResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    solution: Option<Solution>,
}

#[derive(Debug, Deserialize)]
struct Solution {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    response: Option<String>,
}

impl FlareSolverrClient {
    pub fn new(endpoint: &str, max_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(max_timeout + Duration::from_secs(10))
            .build()
            .context("building flaresolverr client")?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            max_timeout,
        })
    }

    async fn solve(&self, url: &str) -> Result<SolverResponse, reqwest::Error> {
        self.client
            .post(&self.endpoint)
            .json(&json!({
                "cmd": "request.get",
                "url": url,
                "maxTimeout": self.max_timeout.as_millis() as u64,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[async_trait]
impl BypassFetcher for FlareSolverrClient {
    async fn fetch_via_bypass(&self, url: &str) -> Option<RenderedPage> {
        info!(url, "fetching through flaresolverr");
        let response = match self.solve(url).await {
            Ok(response) => response,
            Err(err) => {
                warn!(url, error = %err, "flaresolverr request failed");
                return None;
            }
        };

        if response.status != "ok" {
            warn!(
                url,
                status = %response.status,
                message = response.message.as_deref().unwrap_or_default(),
                "flaresolverr did not solve the page"
            );
            return None;
        }

        let solution = response.solution?;
        let html = solution.response.filter(|html| !html.trim().is_empty())?;
        Some(RenderedPage {
            url: solution.url.unwrap_or_else(|| url.to_string()),
            html,
        })
    }
}
