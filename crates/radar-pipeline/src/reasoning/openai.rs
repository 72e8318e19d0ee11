use std::time::Duration;

use async_trait::async_trait;
use radar_core::{Candidate, Classification, RequestType, ScoreResult, UserProfile};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::decode::{decode_extraction, parse_classification, parse_score};
use super::prompts::{classify_prompt, extract_prompt, score_prompt, truncate_content, CONTENT_CEILING};
use super::{ReasoningError, ReasoningService};

pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MAX_COMPLETION_TOKENS: u32 = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSettings {
    pub fast_model: String,
    pub smart_model: String,
    pub max_completion_tokens: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            fast_model: "gpt-5-nano".to_string(),
            smart_model: "gpt-5-mini".to_string(),
            max_completion_tokens: DEFAULT_MAX_COMPLETION_TOKENS,
        }
    }
}

impl ModelSettings {
    /// Classification and extraction run on the fast model; scoring gets the smart one.
    pub fn for_request(&self, kind: RequestType) -> (&str, ReasoningEffort) {
        match kind {
            RequestType::Classify | RequestType::Extract => (self.fast_model.as_str(), ReasoningEffort::Low),
            RequestType::Score => (self.smart_model.as_str(), ReasoningEffort::Medium),
        }
    }

    pub fn chat_request(&self, kind: RequestType, prompt: String) -> ChatRequest {
        let (model, effort) = self.for_request(kind);
        ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage::user(prompt)],
            max_completion_tokens: self.max_completion_tokens,
            reasoning_effort: effort,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_completion_tokens: u32,
    pub reasoning_effort: ReasoningEffort,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoiceMessage {
    pub content: Option<String>,
}

impl ChatResponse {
    /// Text of the first choice, if the model produced any.
    pub fn into_text(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
    }
}

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct OpenAiReasoner {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
    models: ModelSettings,
    timeout: Duration,
}

impl OpenAiReasoner {
    pub fn new(api_key: &str, models: ModelSettings) -> Self {
        Self {
            api_key: api_key.to_string(),
            http: reqwest::Client::new(),
            base_url: OPENAI_API_URL.to_string(),
            models,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn headers(&self) -> Result<HeaderMap, ReasoningError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(|err| {
            ReasoningError::Api {
                status: 0,
                message: format!("invalid api key header: {err}"),
            }
        })?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn send(&self, request: &ChatRequest) -> Result<String, ReasoningError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %request.model, effort = ?request.reasoning_effort, "chat request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ReasoningError::Api { status, message });
        }

        let body: ChatResponse = response.json().await?;
        body.into_text().ok_or(ReasoningError::Empty)
    }

    async fn chat(&self, kind: RequestType, prompt: String) -> Result<String, ReasoningError> {
        let request = self.models.chat_request(kind, prompt);
        tokio::time::timeout(self.timeout, self.send(&request))
            .await
            .map_err(|_| ReasoningError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl ReasoningService for OpenAiReasoner {
    async fn classify(&self, content: &str) -> Result<Classification, ReasoningError> {
        let prompt = classify_prompt(&truncate_content(content, CONTENT_CEILING));
        let raw = self.chat(RequestType::Classify, prompt).await?;
        parse_classification(&raw)
    }

    async fn extract(&self, content: &str) -> Result<Vec<Candidate>, ReasoningError> {
        let prompt = extract_prompt(&truncate_content(content, CONTENT_CEILING));
        let raw = self.chat(RequestType::Extract, prompt).await?;
        decode_extraction(&raw)
    }

    async fn score(
        &self,
        candidate: &Candidate,
        profile: &UserProfile,
    ) -> Result<ScoreResult, ReasoningError> {
        let raw = self
            .chat(RequestType::Score, score_prompt(candidate, profile))
            .await?;
        parse_score(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_routing_by_request_type() {
        let models = ModelSettings::default();
        assert_eq!(
            models.for_request(RequestType::Classify),
            ("gpt-5-nano", ReasoningEffort::Low)
        );
        assert_eq!(
            models.for_request(RequestType::Score),
            ("gpt-5-mini", ReasoningEffort::Medium)
        );
    }

    #[test]
    fn chat_request_wire_shape() {
        let request = ModelSettings::default().chat_request(RequestType::Extract, "hi".into());
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["model"], "gpt-5-nano");
        assert_eq!(value["max_completion_tokens"], 8000);
        assert_eq!(value["reasoning_effort"], "low");
        assert_eq!(value["messages"][0]["role"], "user");
    }

    #[test]
    fn empty_choice_has_no_text() {
        let response: ChatResponse = serde_json::from_value(serde_json::json!({
            "choices": [{"message": {"content": "  "}}]
        }))
        .expect("response");
        assert!(response.into_text().is_none());
    }
}
