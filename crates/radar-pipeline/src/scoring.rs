use std::sync::Arc;

use futures::future::join_all;
use radar_core::{Candidate, FetchResult, NewOpportunity, Opportunity, ScoreResult, UserProfile};
use radar_storage::{content_hash, ConcurrencyGovernor, OpportunityStore, Pool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::funnel::identity_url;
use crate::reasoning::{ReasoningError, ReasoningService};
use crate::StageError;

/// Chars of page text kept on each persisted record for auditing.
pub const RAW_CONTENT_LIMIT: usize = 5000;

/// Where a candidate came from.
#[derive(Debug, Clone, Default)]
pub struct Attribution {
    pub source_id: Option<Uuid>,
    pub page_url: Option<String>,
    pub raw_content: String,
}

impl Attribution {
    pub fn new(source_id: Option<Uuid>, page_url: Option<&str>, content: &str) -> Self {
        Self {
            source_id,
            page_url: page_url.filter(|u| !u.is_empty()).map(str::to_string),
            raw_content: content.chars().take(RAW_CONTENT_LIMIT).collect(),
        }
    }

    pub fn from_fetch(fetched: &FetchResult) -> Self {
        Self::new(Some(fetched.source_id), Some(&fetched.url), &fetched.content)
    }
}

#[derive(Clone)]
pub struct ScoringFanout {
    store: Arc<dyn OpportunityStore>,
    reasoner: Arc<dyn ReasoningService>,
    governor: ConcurrencyGovernor,
}

impl ScoringFanout {
    pub fn new(
        store: Arc<dyn OpportunityStore>,
        reasoner: Arc<dyn ReasoningService>,
        governor: ConcurrencyGovernor,
    ) -> Self {
        Self {
            store,
            reasoner,
            governor,
        }
    }

    /// Scores every candidate concurrently and persists the ones worth
    /// keeping. Returns the records actually written.
    pub async fn score_and_persist(
        &self,
        candidates: Vec<Candidate>,
        profile: &UserProfile,
        attribution: &Attribution,
    ) -> Vec<Opportunity> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let scores = join_all(candidates.iter().map(|candidate| self.score(candidate, profile))).await;

        let mut stored = Vec::new();
        for (candidate, outcome) in candidates.into_iter().zip(scores) {
            let score = match outcome {
                Ok(score) => score,
                Err(err) => {
                    warn!(title = candidate.title(), error = %StageError::Scoring(err), "dropping candidate");
                    continue;
                }
            };
            if score.recommendation.is_skip() {
                debug!(title = candidate.title(), relevance = score.relevance_score, "recommended skip");
                continue;
            }
            if let Some(record) = self.persist(candidate, score, attribution).await {
                stored.push(record);
            }
        }
        stored
    }

    async fn score(
        &self,
        candidate: &Candidate,
        profile: &UserProfile,
    ) -> Result<ScoreResult, ReasoningError> {
        self.governor
            .governed(Pool::Reasoning, self.reasoner.score(candidate, profile))
            .await?
    }

    /// Writes one scored candidate. Uniqueness rejections and store failures
    /// are logged and yield `None`.
    pub async fn persist(
        &self,
        candidate: Candidate,
        score: ScoreResult,
        attribution: &Attribution,
    ) -> Option<Opportunity> {
        let normalized_url = identity_url(&candidate);
        let hash_input = format!(
            "{}{}",
            candidate.url.as_deref().unwrap_or_default(),
            candidate.title()
        );
        let new = NewOpportunity {
            source_id: attribution.source_id,
            normalized_url,
            content_hash: content_hash(&hash_input),
            raw_content: attribution.raw_content.clone(),
            candidate,
            score,
        };

        match self.store.insert_opportunity(new).await {
            Ok(record) => {
                info!(
                    title = record.candidate.title(),
                    relevance = record.score.relevance_score,
                    recommendation = record.score.recommendation.as_str(),
                    "opportunity stored"
                );
                Some(record)
            }
            Err(err) if err.is_duplicate() => {
                debug!(error = %err, "already stored");
                None
            }
            Err(err) => {
                warn!(error = %StageError::Persistence(err), "opportunity not stored");
                None
            }
        }
    }
}
