//! The external reasoning service: classification, extraction and scoring.

use std::time::Duration;

use async_trait::async_trait;
use radar_core::{Candidate, Classification, ScoreResult, UserProfile};
use radar_storage::PoolClosed;
use thiserror::Error;

pub mod decode;
pub mod openai;
pub mod prompts;

pub use decode::{decode_extraction, parse_classification, parse_score, strip_code_fence, ExtractionShape};
pub use openai::{ModelSettings, OpenAiReasoner, ReasoningEffort};

#[derive(Debug, Error)]
pub enum ReasoningError {
    #[error("reasoning call timed out after {0:?}")]
    Timeout(Duration),
    #[error("reasoning transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("reasoning api error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("reasoning service returned no content")]
    Empty,
    #[error("unparsable reasoning output: {0}")]
    Unparsable(String),
    #[error(transparent)]
    Pool(#[from] PoolClosed),
}

#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn classify(&self, content: &str) -> Result<Classification, ReasoningError>;

    /// Candidates in the order the service listed them, before any URL fixing
    /// or filtering.
    async fn extract(&self, content: &str) -> Result<Vec<Candidate>, ReasoningError>;

    async fn score(
        &self,
        candidate: &Candidate,
        profile: &UserProfile,
    ) -> Result<ScoreResult, ReasoningError>;
}
