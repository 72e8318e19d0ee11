//! Fans fetches out across every active source and chains each completed
//! fetch straight into the funnel and scoring.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use radar_core::{FetchResult, Opportunity, Source, UserProfile};
use radar_sources::SourceFetcher;
use radar_storage::{ConcurrencyGovernor, OpportunityStore};
use tokio::task::{AbortHandle, Id, JoinSet};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::funnel::{ContentFunnel, FunnelOutcome};
use crate::scoring::{Attribution, ScoringFanout};
use crate::{RunSummary, StageError};

/// Outcome of one source's lifecycle.
#[derive(Debug, Clone, Default)]
pub struct SourceReport {
    pub source_id: Uuid,
    pub source_name: String,
    pub pages: usize,
    pub unchanged: usize,
    pub opportunities: Vec<Opportunity>,
    /// First failure seen for the source; recorded on its checkpoint.
    pub error: Option<String>,
}

impl SourceReport {
    pub(crate) fn new(source: &Source) -> Self {
        Self {
            source_id: source.id,
            source_name: source.name.clone(),
            ..Self::default()
        }
    }

    fn failed(source_id: Uuid, source_name: String, error: String) -> Self {
        Self {
            source_id,
            source_name,
            error: Some(error),
            ..Self::default()
        }
    }

    pub(crate) fn note_error(&mut self, err: &StageError) {
        if self.error.is_none() {
            self.error = Some(err.to_string());
        }
    }
}

enum PageOutcome {
    Unchanged,
    Processed(Vec<Opportunity>),
}

struct SummaryBuilder {
    run_id: Uuid,
    started_at: chrono::DateTime<Utc>,
    total_sources: usize,
    pages_fetched: usize,
    unchanged_pages: usize,
    errors: usize,
    opportunities: Vec<Opportunity>,
}

impl SummaryBuilder {
    fn start(total_sources: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            total_sources,
            pages_fetched: 0,
            unchanged_pages: 0,
            errors: 0,
            opportunities: Vec::new(),
        }
    }

    fn absorb(&mut self, report: SourceReport) {
        self.pages_fetched += report.pages;
        self.unchanged_pages += report.unchanged;
        if report.error.is_some() {
            self.errors += 1;
        }
        self.opportunities.extend(report.opportunities);
    }

    fn finish(self) -> RunSummary {
        let summary = RunSummary {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            total_sources: self.total_sources,
            pages_fetched: self.pages_fetched,
            unchanged_pages: self.unchanged_pages,
            opportunities_found: self.opportunities.len(),
            errors: self.errors,
            opportunities: self.opportunities,
        };
        info!(
            run_id = %summary.run_id,
            sources = summary.total_sources,
            pages = summary.pages_fetched,
            unchanged = summary.unchanged_pages,
            found = summary.opportunities_found,
            errors = summary.errors,
            "run complete"
        );
        summary
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// The per-run task group. Remembers which source each task serves so a task
/// that never finishes still yields a report for that source.
#[derive(Default)]
struct SourceTasks {
    set: JoinSet<SourceReport>,
    owners: HashMap<Id, (Uuid, String)>,
}

impl SourceTasks {
    fn spawn<F>(&mut self, source: &Source, task: F) -> AbortHandle
    where
        F: Future<Output = SourceReport> + Send + 'static,
    {
        let owner = (source.id, source.name.clone());
        let handle = self.set.spawn(task);
        self.owners.insert(handle.id(), owner);
        handle
    }

    async fn next(&mut self) -> Option<SourceReport> {
        match self.set.join_next_with_id().await? {
            Ok((id, report)) => {
                self.owners.remove(&id);
                Some(report)
            }
            Err(err) => {
                let (source_id, name) = self
                    .owners
                    .remove(&err.id())
                    .unwrap_or_else(|| (Uuid::nil(), "unknown".to_string()));
                error!(source = %name, error = %err, "source task did not complete");
                Some(SourceReport::failed(
                    source_id,
                    name,
                    format!("source task did not complete: {err}"),
                ))
            }
        }
    }
}

#[derive(Clone)]
pub struct PipelineOrchestrator {
    store: Arc<dyn OpportunityStore>,
    fetcher: SourceFetcher,
    funnel: ContentFunnel,
    fanout: ScoringFanout,
    governor: ConcurrencyGovernor,
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<dyn OpportunityStore>,
        fetcher: SourceFetcher,
        funnel: ContentFunnel,
        fanout: ScoringFanout,
        governor: ConcurrencyGovernor,
    ) -> Self {
        Self {
            store,
            fetcher,
            funnel,
            fanout,
            governor,
        }
    }

    pub fn governor(&self) -> &ConcurrencyGovernor {
        &self.governor
    }

    /// One task per source in a single task group. A source's checkpoint is
    /// written exactly once, when its task is gathered.
    pub async fn run(&self, sources: Vec<Source>, profile: UserProfile) -> RunSummary {
        let mut summary = SummaryBuilder::start(sources.len());
        let profile = Arc::new(profile);

        let (browser, plain): (Vec<Source>, Vec<Source>) =
            sources.into_iter().partition(Source::uses_browser);
        info!(
            run_id = %summary.run_id,
            browser = browser.len(),
            plain = plain.len(),
            "starting concurrent run"
        );

        let mut tasks = SourceTasks::default();
        for source in browser.into_iter().chain(plain) {
            let this = self.clone();
            let profile = Arc::clone(&profile);
            let task_source = source.clone();
            tasks.spawn(&source, async move { this.guarded(task_source, profile).await });
        }

        while let Some(report) = tasks.next().await {
            self.checkpoint(&report).await;
            summary.absorb(report);
        }

        summary.finish()
    }

    /// Same lifecycle as [`run`](Self::run), one source at a time.
    pub async fn run_sequential(&self, sources: Vec<Source>, profile: UserProfile) -> RunSummary {
        let mut summary = SummaryBuilder::start(sources.len());
        let profile = Arc::new(profile);
        info!(run_id = %summary.run_id, sources = summary.total_sources, "starting sequential run");

        for source in sources {
            let report = self.guarded(source, Arc::clone(&profile)).await;
            self.checkpoint(&report).await;
            summary.absorb(report);
        }
        summary.finish()
    }

    /// Converts a panic anywhere in the source lifecycle into a report error.
    async fn guarded(&self, source: Source, profile: Arc<UserProfile>) -> SourceReport {
        let (id, name) = (source.id, source.name.clone());
        match AssertUnwindSafe(self.process_source(source, profile))
            .catch_unwind()
            .await
        {
            Ok(report) => report,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(source = %name, panic = %message, "source task panicked");
                SourceReport::failed(id, name, format!("source task panicked: {message}"))
            }
        }
    }

    pub async fn process_source(&self, source: Source, profile: Arc<UserProfile>) -> SourceReport {
        let strategy = Arc::clone(self.fetcher.strategy_for(&source));
        let span = info_span!("source", source = %source.name, pool = %strategy.pool());

        async move {
            let mut report = SourceReport::new(&source);
            let fetched = match self
                .governor
                .governed(strategy.pool(), strategy.fetch(&source))
                .await
            {
                Ok(pages) => pages,
                Err(closed) => {
                    report.note_error(&StageError::Fetch(closed.to_string()));
                    return report;
                }
            };

            let outcomes =
                join_all(fetched.iter().map(|page| self.process_page(page, &profile))).await;

            for (page, outcome) in fetched.iter().zip(outcomes) {
                match outcome {
                    Ok(PageOutcome::Unchanged) => {
                        report.pages += 1;
                        report.unchanged += 1;
                    }
                    Ok(PageOutcome::Processed(stored)) => {
                        report.pages += 1;
                        report.opportunities.extend(stored);
                    }
                    Err(err) => {
                        warn!(url = %page.url, error = %err, "page failed");
                        report.note_error(&err);
                    }
                }
            }

            info!(
                pages = report.pages,
                unchanged = report.unchanged,
                stored = report.opportunities.len(),
                failed = report.error.is_some(),
                "source done"
            );
            report
        }
        .instrument(span)
        .await
    }

    async fn process_page(
        &self,
        page: &FetchResult,
        profile: &UserProfile,
    ) -> Result<PageOutcome, StageError> {
        let candidates = match self.funnel.process(page).await? {
            FunnelOutcome::Unchanged => return Ok(PageOutcome::Unchanged),
            FunnelOutcome::NoOpportunity => Vec::new(),
            FunnelOutcome::Candidates(list) => list,
        };
        let stored = self
            .fanout
            .score_and_persist(candidates, profile, &Attribution::from_fetch(page))
            .await;
        Ok(PageOutcome::Processed(stored))
    }

    async fn checkpoint(&self, report: &SourceReport) {
        if let Err(err) = self
            .store
            .update_source_checkpoint(report.source_id, report.error.as_deref())
            .await
        {
            warn!(source = %report.source_name, error = %err, "checkpoint update failed");
        }
    }
}
