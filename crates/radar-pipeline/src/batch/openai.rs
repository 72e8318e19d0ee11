use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{BatchClient, BatchError, RemoteBatch, BATCH_ENDPOINT};
use crate::reasoning::openai::OPENAI_API_URL;

pub const COMPLETION_WINDOW: &str = "24h";

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
}

/// Files and Batches endpoints of an OpenAI-compatible provider.
pub struct OpenAiBatchClient {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl OpenAiBatchClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            http: reqwest::Client::new(),
            base_url: OPENAI_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn headers(&self) -> Result<HeaderMap, BatchError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(|err| {
            BatchError::Api {
                status: 0,
                message: format!("invalid api key header: {err}"),
            }
        })?;
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }

    async fn checked(response: reqwest::Response) -> Result<reqwest::Response, BatchError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Err(BatchError::Api { status, message })
    }
}

#[async_trait]
impl BatchClient for OpenAiBatchClient {
    async fn upload_manifest(&self, jsonl: String) -> Result<String, BatchError> {
        let bytes = jsonl.len();
        let part = Part::text(jsonl)
            .file_name("radar-batch.jsonl")
            .mime_str("application/jsonl")?;
        let form = Form::new().text("purpose", "batch").part("file", part);

        let response = self
            .http
            .post(format!("{}/files", self.base_url))
            .headers(self.headers()?)
            .multipart(form)
            .send()
            .await?;
        let file: FileObject = Self::checked(response).await?.json().await?;
        debug!(file_id = %file.id, bytes, "manifest uploaded");
        Ok(file.id)
    }

    async fn create_job(&self, input_file_id: &str) -> Result<RemoteBatch, BatchError> {
        let response = self
            .http
            .post(format!("{}/batches", self.base_url))
            .headers(self.headers()?)
            .json(&json!({
                "input_file_id": input_file_id,
                "endpoint": BATCH_ENDPOINT,
                "completion_window": COMPLETION_WINDOW,
            }))
            .send()
            .await?;
        Ok(Self::checked(response).await?.json().await?)
    }

    async fn retrieve(&self, batch_id: &str) -> Result<RemoteBatch, BatchError> {
        let response = self
            .http
            .get(format!("{}/batches/{batch_id}", self.base_url))
            .headers(self.headers()?)
            .send()
            .await?;
        Ok(Self::checked(response).await?.json().await?)
    }

    async fn download(&self, file_id: &str) -> Result<String, BatchError> {
        let response = self
            .http
            .get(format!("{}/files/{file_id}/content", self.base_url))
            .headers(self.headers()?)
            .send()
            .await?;
        Ok(Self::checked(response).await?.text().await?)
    }
}
