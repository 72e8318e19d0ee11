//! Cost-optimized bulk mode: collect fresh content into one manifest, submit
//! it as an asynchronous batch job, and later replay the responses through the
//! same extract, dedup, score and persist stages the online path uses.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use radar_core::{
    BatchJob, BatchRequest, BatchStatus, Candidate, Opportunity, RequestType, Source, UserProfile,
};
use radar_sources::SourceFetcher;
use radar_storage::{ConcurrencyGovernor, OpportunityStore, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::funnel::ContentFunnel;
use crate::orchestrator::SourceReport;
use crate::reasoning::openai::{ChatRequest, ChatResponse, ModelSettings};
use crate::reasoning::prompts::prompt_for;
use crate::reasoning::{decode_extraction, parse_classification, parse_score, ReasoningError};
use crate::scoring::{Attribution, ScoringFanout};
use crate::StageError;

pub mod openai;

pub use openai::OpenAiBatchClient;

pub const BATCH_ENDPOINT: &str = "/v1/chat/completions";

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("batch api error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("manifest has no requests")]
    Empty,
    #[error("batch {0} has no output file")]
    NoOutput(String),
    #[error("batch {0} is not completed")]
    NotCompleted(String),
    #[error("manifest encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error(transparent)]
    Prompt(#[from] ReasoningError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The provider's view of a batch job.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteBatch {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub output_file_id: Option<String>,
    #[serde(default)]
    pub error_file_id: Option<String>,
}

#[async_trait]
pub trait BatchClient: Send + Sync {
    /// Uploads a JSONL manifest and returns its file id.
    async fn upload_manifest(&self, jsonl: String) -> Result<String, BatchError>;

    async fn create_job(&self, input_file_id: &str) -> Result<RemoteBatch, BatchError>;

    async fn retrieve(&self, batch_id: &str) -> Result<RemoteBatch, BatchError>;

    async fn download(&self, file_id: &str) -> Result<String, BatchError>;
}

#[derive(Debug, Serialize)]
struct ManifestLine<'a> {
    custom_id: &'a str,
    method: &'static str,
    url: &'static str,
    body: ChatRequest,
}

/// Requests accumulated for one submission. Ids are `<type>_<index>_<tag>`.
#[derive(Debug, Clone)]
pub struct BatchManifest {
    tag: i64,
    requests: Vec<BatchRequest>,
}

impl Default for BatchManifest {
    fn default() -> Self {
        Self::with_tag(Utc::now().timestamp())
    }
}

impl BatchManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(tag: i64) -> Self {
        Self {
            tag,
            requests: Vec::new(),
        }
    }

    pub fn push(
        &mut self,
        request_type: RequestType,
        source_id: Option<Uuid>,
        source_url: Option<&str>,
        content: impl Into<String>,
    ) -> String {
        let custom_id = format!(
            "{}_{}_{}",
            request_type.as_str(),
            self.requests.len(),
            self.tag
        );
        self.requests.push(BatchRequest {
            custom_id: custom_id.clone(),
            request_type,
            source_id,
            source_url: source_url.map(str::to_string),
            content: content.into(),
        });
        custom_id
    }

    /// Queues a score request; the candidate travels as JSON content.
    pub fn push_score(
        &mut self,
        candidate: &Candidate,
        attribution: &Attribution,
    ) -> Result<String, serde_json::Error> {
        let content = serde_json::to_string(candidate)?;
        Ok(self.push(
            RequestType::Score,
            attribution.source_id,
            attribution.page_url.as_deref(),
            content,
        ))
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn requests(&self) -> &[BatchRequest] {
        &self.requests
    }

    pub fn into_requests(self) -> Vec<BatchRequest> {
        self.requests
    }

    pub fn to_jsonl(&self, models: &ModelSettings, profile: &UserProfile) -> Result<String, BatchError> {
        let mut lines = Vec::with_capacity(self.requests.len());
        for request in &self.requests {
            let line = ManifestLine {
                custom_id: &request.custom_id,
                method: "POST",
                url: BATCH_ENDPOINT,
                body: models.chat_request(request.request_type, prompt_for(request, profile)?),
            };
            lines.push(serde_json::to_string(&line)?);
        }
        Ok(lines.join("\n"))
    }
}

#[derive(Debug, Deserialize)]
struct OutputLine {
    custom_id: String,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    response: Option<OutputResponse>,
}

#[derive(Debug, Deserialize)]
struct OutputResponse {
    #[serde(default)]
    status_code: u16,
    #[serde(default)]
    body: ChatResponse,
}

/// One successful response from a batch output file.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResponse {
    pub custom_id: String,
    pub content: String,
}

/// Parses a JSONL output file. Errored, non-2xx, empty and malformed lines
/// are skipped; the count of skipped lines is returned alongside.
pub fn parse_output(text: &str) -> (Vec<BatchResponse>, usize) {
    let mut responses = Vec::new();
    let mut skipped = 0;
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let parsed: OutputLine = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(error = %err, "unparsable batch output line");
                skipped += 1;
                continue;
            }
        };
        if let Some(error) = parsed.error.filter(|e| !e.is_null()) {
            warn!(custom_id = %parsed.custom_id, %error, "batch request failed");
            skipped += 1;
            continue;
        }
        let Some(response) = parsed.response else {
            warn!(custom_id = %parsed.custom_id, "batch output line without response");
            skipped += 1;
            continue;
        };
        if !(200..300).contains(&response.status_code) {
            warn!(custom_id = %parsed.custom_id, status = response.status_code, "batch request rejected");
            skipped += 1;
            continue;
        }
        match response.body.into_text() {
            Some(content) => responses.push(BatchResponse {
                custom_id: parsed.custom_id,
                content,
            }),
            None => {
                warn!(custom_id = %parsed.custom_id, "batch response has no content");
                skipped += 1;
            }
        }
    }
    (responses, skipped)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectSummary {
    pub sources: usize,
    pub admitted: usize,
    pub unchanged: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplaySummary {
    pub batch_id: String,
    pub responses: usize,
    pub skipped: usize,
    /// Classify responses that passed the confidence gate.
    pub positive: usize,
    pub opportunities: Vec<Opportunity>,
}

enum Replayed {
    Skipped,
    Negative,
    Stored { positive: bool, records: Vec<Opportunity> },
}

#[derive(Clone)]
pub struct BatchSubmissionPath {
    store: Arc<dyn OpportunityStore>,
    client: Arc<dyn BatchClient>,
    fetcher: SourceFetcher,
    funnel: ContentFunnel,
    fanout: ScoringFanout,
    governor: ConcurrencyGovernor,
    models: ModelSettings,
}

impl BatchSubmissionPath {
    pub fn new(
        store: Arc<dyn OpportunityStore>,
        client: Arc<dyn BatchClient>,
        fetcher: SourceFetcher,
        funnel: ContentFunnel,
        fanout: ScoringFanout,
        governor: ConcurrencyGovernor,
        models: ModelSettings,
    ) -> Self {
        Self {
            store,
            client,
            fetcher,
            funnel,
            fanout,
            governor,
            models,
        }
    }

    /// Fetches every source and queues one classify request per fresh page.
    /// Checkpoints are written exactly as in the online path.
    pub async fn collect(&self, sources: Vec<Source>) -> (BatchManifest, CollectSummary) {
        let mut summary = CollectSummary {
            sources: sources.len(),
            ..CollectSummary::default()
        };
        let fetched = join_all(sources.iter().map(|source| self.collect_source(source))).await;

        let mut manifest = BatchManifest::new();
        for (report, pages) in fetched {
            summary.unchanged += report.unchanged;
            if report.error.is_some() {
                summary.errors += 1;
            }
            for (source_id, url, content) in pages {
                manifest.push(RequestType::Classify, Some(source_id), Some(&url), content);
                summary.admitted += 1;
            }
            if let Err(err) = self
                .store
                .update_source_checkpoint(report.source_id, report.error.as_deref())
                .await
            {
                warn!(source = %report.source_name, error = %err, "checkpoint update failed");
            }
        }

        info!(
            sources = summary.sources,
            admitted = summary.admitted,
            unchanged = summary.unchanged,
            errors = summary.errors,
            "batch collection done"
        );
        (manifest, summary)
    }

    async fn collect_source(&self, source: &Source) -> (SourceReport, Vec<(Uuid, String, String)>) {
        let strategy = Arc::clone(self.fetcher.strategy_for(source));
        let span = info_span!("collect", source = %source.name, pool = %strategy.pool());
        async move {
            let mut report = SourceReport::new(source);
            let mut fresh = Vec::new();
            let pages = match self.governor.governed(strategy.pool(), strategy.fetch(source)).await {
                Ok(pages) => pages,
                Err(closed) => {
                    report.note_error(&StageError::Fetch(closed.to_string()));
                    return (report, fresh);
                }
            };
            for page in pages {
                match self.funnel.admit(&page).await {
                    Ok(true) => {
                        report.pages += 1;
                        fresh.push((page.source_id, page.url, page.content));
                    }
                    Ok(false) => {
                        report.pages += 1;
                        report.unchanged += 1;
                    }
                    Err(err) => {
                        warn!(url = %page.url, error = %err, "page not collected");
                        report.note_error(&err);
                    }
                }
            }
            (report, fresh)
        }
        .instrument(span)
        .await
    }

    /// Uploads the manifest, creates the job and records it with its full
    /// request list.
    pub async fn submit(
        &self,
        manifest: BatchManifest,
        profile: &UserProfile,
    ) -> Result<BatchJob, BatchError> {
        if manifest.is_empty() {
            return Err(BatchError::Empty);
        }
        let jsonl = manifest.to_jsonl(&self.models, profile)?;
        let input_file_id = self.client.upload_manifest(jsonl).await?;
        let remote = self.client.create_job(&input_file_id).await?;

        let now = Utc::now();
        let job = BatchJob {
            batch_id: remote.id,
            input_file_id,
            status: BatchStatus::from_provider(&remote.status).unwrap_or(BatchStatus::Submitted),
            output_file_id: remote.output_file_id,
            requests: manifest.into_requests(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            processed_at: None,
        };
        self.store.insert_batch_job(&job).await?;
        info!(batch_id = %job.batch_id, requests = job.requests.len(), "batch submitted");
        Ok(job)
    }

    /// Collects and submits. `Ok(None)` when no source had fresh content.
    pub async fn collect_and_submit(
        &self,
        sources: Vec<Source>,
        profile: &UserProfile,
    ) -> Result<Option<BatchJob>, BatchError> {
        let (manifest, _) = self.collect(sources).await;
        if manifest.is_empty() {
            info!("no fresh content, nothing to submit");
            return Ok(None);
        }
        self.submit(manifest, profile).await.map(Some)
    }

    /// Refreshes one job's status from the provider and stores the change.
    pub async fn poll(&self, job: &BatchJob) -> Result<BatchJob, BatchError> {
        let remote = self.client.retrieve(&job.batch_id).await?;
        let status = BatchStatus::from_provider(&remote.status).unwrap_or(job.status);
        let output_file_id = remote.output_file_id.or_else(|| job.output_file_id.clone());

        self.store
            .update_batch_status(&job.batch_id, status, output_file_id.as_deref())
            .await?;

        if status != job.status {
            info!(batch_id = %job.batch_id, from = job.status.as_str(), to = status.as_str(), "batch status changed");
        }
        if status == BatchStatus::Failed {
            warn!(batch_id = %job.batch_id, remote_status = %remote.status, "batch failed, no retry");
        }

        let mut updated = job.clone();
        updated.status = status;
        updated.output_file_id = output_file_id;
        updated.updated_at = Utc::now();
        if status == BatchStatus::Completed && updated.completed_at.is_none() {
            updated.completed_at = Some(updated.updated_at);
        }
        Ok(updated)
    }

    /// Polls every pending job. Individual poll failures are logged and the
    /// job is returned unchanged.
    pub async fn refresh_pending(&self) -> Result<Vec<BatchJob>, BatchError> {
        let pending = self.store.list_pending_batches().await?;
        let mut refreshed = Vec::with_capacity(pending.len());
        for job in pending {
            if job.status.is_terminal() {
                refreshed.push(job);
                continue;
            }
            match self.poll(&job).await {
                Ok(updated) => refreshed.push(updated),
                Err(err) => {
                    warn!(batch_id = %job.batch_id, error = %err, "batch poll failed");
                    refreshed.push(job);
                }
            }
        }
        Ok(refreshed)
    }

    /// Polls pending jobs and replays each completed one exactly once.
    pub async fn process_ready(&self, profile: &UserProfile) -> Result<Vec<ReplaySummary>, BatchError> {
        let mut summaries = Vec::new();
        for job in self.refresh_pending().await? {
            if job.status != BatchStatus::Completed {
                debug!(batch_id = %job.batch_id, status = job.status.as_str(), "batch not ready");
                continue;
            }
            match self.replay(&job, profile).await {
                Ok(summary) => {
                    self.store.mark_batch_processed(&job.batch_id).await?;
                    summaries.push(summary);
                }
                Err(err) => warn!(batch_id = %job.batch_id, error = %err, "batch replay failed"),
            }
        }
        Ok(summaries)
    }

    /// Matches each response to its stored request and resumes the funnel.
    pub async fn replay(&self, job: &BatchJob, profile: &UserProfile) -> Result<ReplaySummary, BatchError> {
        if job.status != BatchStatus::Completed {
            return Err(BatchError::NotCompleted(job.batch_id.clone()));
        }
        let output = job
            .output_file_id
            .as_deref()
            .ok_or_else(|| BatchError::NoOutput(job.batch_id.clone()))?;
        let text = self.client.download(output).await?;
        let (responses, skipped) = parse_output(&text);

        let requests: HashMap<&str, &BatchRequest> = job
            .requests
            .iter()
            .map(|r| (r.custom_id.as_str(), r))
            .collect();

        let mut summary = ReplaySummary {
            batch_id: job.batch_id.clone(),
            responses: responses.len(),
            skipped,
            ..ReplaySummary::default()
        };

        let requests = &requests;
        let outcomes = join_all(responses.iter().map(|response| async move {
            match requests.get(response.custom_id.as_str()) {
                Some(request) => self.replay_one(request, &response.content, profile).await,
                None => {
                    warn!(custom_id = %response.custom_id, "response for unknown request");
                    Replayed::Skipped
                }
            }
        }))
        .await;

        for outcome in outcomes {
            match outcome {
                Replayed::Skipped => summary.skipped += 1,
                Replayed::Negative => {}
                Replayed::Stored { positive, records } => {
                    if positive {
                        summary.positive += 1;
                    }
                    summary.opportunities.extend(records);
                }
            }
        }

        info!(
            batch_id = %summary.batch_id,
            responses = summary.responses,
            skipped = summary.skipped,
            positive = summary.positive,
            stored = summary.opportunities.len(),
            "batch replayed"
        );
        Ok(summary)
    }

    async fn replay_one(&self, request: &BatchRequest, content: &str, profile: &UserProfile) -> Replayed {
        let page_url = request.source_url.as_deref().unwrap_or_default();
        let attribution = Attribution::new(request.source_id, request.source_url.as_deref(), &request.content);

        match request.request_type {
            RequestType::Classify => {
                let classification = match parse_classification(content) {
                    Ok(c) => c,
                    Err(err) => {
                        warn!(custom_id = %request.custom_id, error = %StageError::Classification(err), "treating as no opportunity");
                        return Replayed::Negative;
                    }
                };
                if !classification.passes_gate() {
                    return Replayed::Negative;
                }
                let candidates = self.funnel.extract(&request.content, page_url).await;
                let records = self.fanout.score_and_persist(candidates, profile, &attribution).await;
                Replayed::Stored { positive: true, records }
            }
            RequestType::Extract => {
                let extracted = match decode_extraction(content) {
                    Ok(list) => list,
                    Err(err) => {
                        warn!(custom_id = %request.custom_id, error = %StageError::Extraction(err), "extraction yielded nothing");
                        return Replayed::Negative;
                    }
                };
                let candidates = self.funnel.refine(extracted, page_url).await;
                let records = self.fanout.score_and_persist(candidates, profile, &attribution).await;
                Replayed::Stored { positive: false, records }
            }
            RequestType::Score => {
                let candidate: Candidate = match serde_json::from_str(&request.content) {
                    Ok(candidate) => candidate,
                    Err(err) => {
                        warn!(custom_id = %request.custom_id, error = %err, "stored candidate unreadable");
                        return Replayed::Skipped;
                    }
                };
                let score = match parse_score(content) {
                    Ok(score) => score,
                    Err(err) => {
                        warn!(custom_id = %request.custom_id, error = %StageError::Scoring(err), "dropping candidate");
                        return Replayed::Negative;
                    }
                };
                if score.recommendation.is_skip() {
                    return Replayed::Negative;
                }
                let attribution = Attribution {
                    raw_content: String::new(),
                    ..attribution
                };
                let records = self
                    .fanout
                    .persist(candidate, score, &attribution)
                    .await
                    .into_iter()
                    .collect();
                Replayed::Stored { positive: false, records }
            }
        }
    }
}
