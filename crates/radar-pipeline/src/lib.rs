//! Ingestion pipeline: classify, extract, dedup, score and persist
//! opportunities found on configured sources, online or through the batch API.

use chrono::{DateTime, Utc};
use radar_core::Opportunity;
use radar_storage::StoreError;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub mod app;
pub mod batch;
pub mod config;
pub mod funnel;
pub mod orchestrator;
pub mod reasoning;
pub mod registry;
pub mod report;
pub mod scheduler;
pub mod scoring;

pub use app::Radar;
pub use batch::{BatchClient, BatchError, BatchManifest, BatchSubmissionPath, ReplaySummary};
pub use config::RadarConfig;
pub use funnel::{ContentFunnel, FunnelOutcome};
pub use orchestrator::PipelineOrchestrator;
pub use reasoning::{ReasoningError, ReasoningService};
pub use scoring::{Attribution, ScoringFanout};

/// Which leg of the pipeline failed. Every variant is contained where it
/// happens; none of them aborts a run.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("classification failed: {0}")]
    Classification(#[source] ReasoningError),
    #[error("extraction failed: {0}")]
    Extraction(#[source] ReasoningError),
    #[error("scoring failed: {0}")]
    Scoring(#[source] ReasoningError),
    #[error("persistence failed: {0}")]
    Persistence(#[source] StoreError),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_sources: usize,
    pub pages_fetched: usize,
    pub unchanged_pages: usize,
    pub opportunities_found: usize,
    pub errors: usize,
    pub opportunities: Vec<Opportunity>,
}
