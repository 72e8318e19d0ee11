//! Per-page funnel: content gate, classify, extract, URL repair,
//! generic-listing filter and dedup.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use radar_core::{Candidate, FetchResult};
use radar_storage::{content_hash, normalize_url, ConcurrencyGovernor, OpportunityStore, Pool};
use regex::Regex;
use tracing::{debug, info, warn};
use url::Url;

use crate::reasoning::prompts::{truncate_content, CONTENT_CEILING};
use crate::reasoning::{ReasoningError, ReasoningService};
use crate::StageError;

const MIN_TITLE_CHARS: usize = 5;
const MIN_SUMMARY_CHARS: usize = 20;

static GENERIC_TITLES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^(find|search|browse|explore|view|see)\s+(your\s+)?(next\s+)?(job|career|role|position)",
        r"^(careers?|jobs?|positions?|openings?|opportunities?)\s+(at|@)\s+",
        r"^(open\s+)?(positions?|roles?)\s*$",
        r"^(join\s+)?(our\s+)?team",
        r"^(work|working)\s+(at|with)\s+",
        r"^(current\s+)?(job\s+)?openings?",
        r"^(we'?re?\s+)?hiring",
        r"^(check\s+out\s+)?(all\s+)?(open\s+)?jobs?",
        r"^internships?\s+and\s+(early\s+)?talent",
        r"^emerging\s+talent$",
    ]
    .iter()
    .map(|pattern| Regex::new(&format!("(?i){pattern}")).expect("generic title pattern"))
    .collect()
});

/// Drops listing-page boilerplate masquerading as an opportunity.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericFilter;

impl GenericFilter {
    pub fn is_generic_title(title: &str) -> bool {
        let title = title.trim().to_lowercase();
        title.chars().count() < MIN_TITLE_CHARS
            || GENERIC_TITLES.iter().any(|re| re.is_match(&title))
    }

    pub fn keeps(candidate: &Candidate) -> bool {
        let summary_ok = candidate
            .summary
            .as_deref()
            .is_some_and(|s| s.trim().chars().count() >= MIN_SUMMARY_CHARS);
        summary_ok && !Self::is_generic_title(candidate.title())
    }
}

/// Relative candidate URLs are joined onto the page they came from;
/// a missing URL becomes the page URL.
pub fn resolve_candidate_urls(candidates: &mut [Candidate], page_url: &str) {
    let base = Url::parse(page_url).ok();
    for candidate in candidates.iter_mut() {
        let raw = candidate.url.as_deref().map(str::trim).unwrap_or_default();
        if raw.is_empty() {
            if !page_url.is_empty() {
                candidate.url = Some(page_url.to_string());
            }
            continue;
        }
        if Url::parse(raw).is_ok() {
            continue;
        }
        if let Some(joined) = base.as_ref().and_then(|b| b.join(raw).ok()) {
            candidate.url = Some(joined.to_string());
        }
    }
}

/// The normalized URL that identifies this candidate. After URL resolution
/// this is set for every candidate extracted from a page, including ones that
/// point back at the page itself.
pub fn identity_url(candidate: &Candidate) -> Option<String> {
    let url = candidate.url.as_deref().map(str::trim).filter(|u| !u.is_empty())?;
    Some(normalize_url(url))
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunnelOutcome {
    /// Content hash already seen; nothing was sent to the reasoning service.
    Unchanged,
    NoOpportunity,
    Candidates(Vec<Candidate>),
}

impl FunnelOutcome {
    pub fn candidates(self) -> Vec<Candidate> {
        match self {
            Self::Candidates(list) => list,
            Self::Unchanged | Self::NoOpportunity => Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct ContentFunnel {
    store: Arc<dyn OpportunityStore>,
    reasoner: Arc<dyn ReasoningService>,
    governor: ConcurrencyGovernor,
    ceiling: usize,
}

impl ContentFunnel {
    pub fn new(
        store: Arc<dyn OpportunityStore>,
        reasoner: Arc<dyn ReasoningService>,
        governor: ConcurrencyGovernor,
    ) -> Self {
        Self {
            store,
            reasoner,
            governor,
            ceiling: CONTENT_CEILING,
        }
    }

    pub fn with_ceiling(mut self, ceiling: usize) -> Self {
        self.ceiling = ceiling;
        self
    }

    /// Content gate. `Ok(false)` means the exact text was seen before.
    /// Fresh content is marked seen before any reasoning happens.
    pub async fn admit(&self, fetched: &FetchResult) -> Result<bool, StageError> {
        if !fetched.success {
            let message = fetched
                .error
                .clone()
                .unwrap_or_else(|| "fetch failed".to_string());
            return Err(StageError::Fetch(message));
        }

        let hash = content_hash(&fetched.content);
        if self
            .store
            .is_content_seen(&hash)
            .await
            .map_err(StageError::Persistence)?
        {
            debug!(url = %fetched.url, hash, "content unchanged");
            return Ok(false);
        }
        self.store
            .mark_content_seen(&hash, Some(fetched.source_id), &fetched.url)
            .await
            .map_err(StageError::Persistence)?;
        Ok(true)
    }

    pub async fn process(&self, fetched: &FetchResult) -> Result<FunnelOutcome, StageError> {
        if !self.admit(fetched).await? {
            return Ok(FunnelOutcome::Unchanged);
        }
        Ok(self.from_content(&fetched.content, &fetched.url).await)
    }

    /// Classify, extract and refine. Every reasoning failure closes the gate
    /// for this page rather than failing the source.
    pub async fn from_content(&self, content: &str, page_url: &str) -> FunnelOutcome {
        let text = truncate_content(content, self.ceiling);

        let classification = match self.reason(self.reasoner.classify(&text)).await {
            Ok(c) => c,
            Err(err) => {
                warn!(url = page_url, error = %StageError::Classification(err), "treating page as no opportunity");
                return FunnelOutcome::NoOpportunity;
            }
        };
        if !classification.passes_gate() {
            debug!(
                url = page_url,
                confidence = classification.confidence,
                contains = classification.contains_opportunity,
                "classifier gate closed"
            );
            return FunnelOutcome::NoOpportunity;
        }

        FunnelOutcome::Candidates(self.extract(&text, page_url).await)
    }

    /// Extraction onward, for content that already passed the classifier.
    pub async fn extract(&self, content: &str, page_url: &str) -> Vec<Candidate> {
        let text = truncate_content(content, self.ceiling);
        match self.reason(self.reasoner.extract(&text)).await {
            Ok(extracted) => self.refine(extracted, page_url).await,
            Err(err) => {
                warn!(url = page_url, error = %StageError::Extraction(err), "extraction yielded nothing");
                Vec::new()
            }
        }
    }

    /// Post-extraction steps shared by the online and batch paths.
    pub async fn refine(&self, mut candidates: Vec<Candidate>, page_url: &str) -> Vec<Candidate> {
        let extracted = candidates.len();
        resolve_candidate_urls(&mut candidates, page_url);
        candidates.retain(GenericFilter::keeps);
        let specific = candidates.len();
        let survivors = self.dedup(candidates).await;
        info!(
            url = page_url,
            extracted,
            specific,
            novel = survivors.len(),
            "candidates refined"
        );
        survivors
    }

    async fn dedup(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let mut seen_urls = HashSet::new();
        let mut seen_pairs = HashSet::new();
        let mut out = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            if let Some(url) = identity_url(&candidate) {
                if !seen_urls.insert(url.clone()) || self.url_known(&url).await {
                    debug!(title = candidate.title(), url, "duplicate url");
                    continue;
                }
            }
            if let (Some(title), Some(org)) = (
                candidate.title.as_deref().filter(|t| !t.is_empty()),
                candidate.organization.as_deref().filter(|o| !o.is_empty()),
            ) {
                if !seen_pairs.insert((title.to_string(), org.to_string()))
                    || self.title_org_known(title, org).await
                {
                    debug!(title, organization = org, "duplicate title/organization");
                    continue;
                }
            }
            out.push(candidate);
        }
        out
    }

    async fn url_known(&self, url: &str) -> bool {
        self.store
            .opportunity_url_exists(url)
            .await
            .unwrap_or_else(|err| {
                warn!(url, error = %err, "url dedup check failed, keeping candidate");
                false
            })
    }

    async fn title_org_known(&self, title: &str, org: &str) -> bool {
        self.store
            .opportunity_title_org_exists(title, org)
            .await
            .unwrap_or_else(|err| {
                warn!(title, error = %err, "title dedup check failed, keeping candidate");
                false
            })
    }

    async fn reason<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, ReasoningError>>,
    ) -> Result<T, ReasoningError> {
        self.governor.governed(Pool::Reasoning, call).await?
    }
}
