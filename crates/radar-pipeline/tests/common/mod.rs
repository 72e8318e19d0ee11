#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use radar_core::{
    Candidate, Classification, FetchResult, NewOpportunity, ScoreResult, Source, UserProfile,
};
use radar_pipeline::batch::RemoteBatch;
use radar_pipeline::reasoning::{decode_extraction, parse_classification, parse_score};
use radar_pipeline::{BatchClient, BatchError, Radar, RadarConfig, ReasoningError, ReasoningService};
use radar_sources::{
    EmailStrategy, FetchStrategy, MailError, Mailbox, RawMessage, SourceFetcher,
};
use radar_storage::{
    content_hash, normalize_url, ConcurrencyGovernor, MemoryStore, Pool, PoolSizes,
};

pub const NOT_AN_OPPORTUNITY: &str = r#"{"contains_opportunity": false, "confidence": 0.1}"#;

pub fn positive(confidence: f64) -> String {
    format!(r#"{{"contains_opportunity": true, "confidence": {confidence}, "opportunity_types": ["job"]}}"#)
}

pub fn score_json(recommendation: &str, relevance: f64) -> String {
    format!(
        r#"{{"relevance_score": {relevance}, "prestige_score": 0.6, "recommendation": "{recommendation}", "reasoning": "fits"}}"#
    )
}

pub fn candidate_json(title: &str, org: &str, url: &str) -> serde_json::Value {
    serde_json::json!({
        "title": title,
        "organization": org,
        "url": url,
        "type": "job",
        "summary": format!("{title} at {org}, paid and open to early career applicants."),
    })
}

/// Reasoning fake that answers with raw model text, so the real decoders run.
/// Classify and extract answers are keyed by a marker substring of the content;
/// score answers by candidate title.
#[derive(Default)]
pub struct ScriptedReasoner {
    classify: Vec<(String, String)>,
    extract: Vec<(String, String)>,
    score: HashMap<String, String>,
    pub classify_calls: AtomicUsize,
    pub extract_calls: AtomicUsize,
    pub score_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    delay: Duration,
    started: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedReasoner {
    pub fn classify(mut self, marker: &str, raw: impl Into<String>) -> Self {
        self.classify.push((marker.to_string(), raw.into()));
        self
    }

    pub fn extract(mut self, marker: &str, raw: impl Into<String>) -> Self {
        self.extract.push((marker.to_string(), raw.into()));
        self
    }

    pub fn score(mut self, title: &str, raw: impl Into<String>) -> Self {
        self.score.insert(title.to_string(), raw.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> (usize, usize, usize) {
        (
            self.classify_calls.load(Ordering::SeqCst),
            self.extract_calls.load(Ordering::SeqCst),
            self.score_calls.load(Ordering::SeqCst),
        )
    }

    /// When each call started, labelled by stage.
    pub fn started(&self) -> Vec<(String, Instant)> {
        self.started.lock().expect("lock").clone()
    }

    fn stamp(&self, stage: &str) {
        self.started
            .lock()
            .expect("lock")
            .push((stage.to_string(), Instant::now()));
    }

    fn lookup<'a>(script: &'a [(String, String)], content: &str) -> Option<&'a str> {
        script
            .iter()
            .find(|(marker, _)| content.contains(marker.as_str()))
            .map(|(_, raw)| raw.as_str())
    }

    async fn hold(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoner {
    async fn classify(&self, content: &str) -> Result<Classification, ReasoningError> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        self.stamp("classify");
        self.hold().await;
        parse_classification(Self::lookup(&self.classify, content).unwrap_or(NOT_AN_OPPORTUNITY))
    }

    async fn extract(&self, content: &str) -> Result<Vec<Candidate>, ReasoningError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        self.stamp("extract");
        self.hold().await;
        decode_extraction(Self::lookup(&self.extract, content).unwrap_or("[]"))
    }

    async fn score(
        &self,
        candidate: &Candidate,
        _profile: &UserProfile,
    ) -> Result<ScoreResult, ReasoningError> {
        self.score_calls.fetch_add(1, Ordering::SeqCst);
        self.stamp("score");
        self.hold().await;
        match self.score.get(candidate.title()) {
            Some(raw) => parse_score(raw),
            None => Err(ReasoningError::Api {
                status: 500,
                message: "no scripted score".into(),
            }),
        }
    }
}

#[derive(Clone)]
pub enum Script {
    Pages(Vec<(String, String)>),
    Fail(String),
    Panic,
}

/// Fetch fake keyed by source name. Tracks how many fetches overlap.
pub struct ScriptedStrategy {
    pool: Pool,
    scripts: HashMap<String, Script>,
    delay: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub fetches: AtomicUsize,
    finished: Mutex<Vec<Instant>>,
}

impl ScriptedStrategy {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            scripts: HashMap::new(),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            finished: Mutex::new(Vec::new()),
        }
    }

    pub fn script(mut self, source: &str, script: Script) -> Self {
        self.scripts.insert(source.to_string(), script);
        self
    }

    pub fn page(self, source: &str, url: &str, content: &str) -> Self {
        self.script(source, Script::Pages(vec![(url.to_string(), content.to_string())]))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// When each fetch returned.
    pub fn finished(&self) -> Vec<Instant> {
        self.finished.lock().expect("lock").clone()
    }
}

#[async_trait]
impl FetchStrategy for ScriptedStrategy {
    fn pool(&self) -> Pool {
        self.pool
    }

    async fn fetch(&self, source: &Source) -> Vec<FetchResult> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.finished.lock().expect("lock").push(Instant::now());

        match self.scripts.get(&source.name).cloned() {
            Some(Script::Pages(pages)) => pages
                .into_iter()
                .map(|(url, content)| FetchResult::ok(source, url, content))
                .collect(),
            Some(Script::Fail(error)) => {
                vec![FetchResult::failed(source, source.url().unwrap_or_default(), error)]
            }
            Some(Script::Panic) => panic!("driver crashed for {}", source.name),
            None => vec![FetchResult::failed(source, "", "no script")],
        }
    }
}

/// Mailbox fake holding raw RFC 822 messages, newest first.
#[derive(Default)]
pub struct ScriptedMailbox {
    messages: Vec<RawMessage>,
    failure: Option<String>,
    pub polls: AtomicUsize,
}

impl ScriptedMailbox {
    pub fn message(mut self, from: &str, message_id: &str, subject: &str, html: &str) -> Self {
        let uid = (self.messages.len() + 1).to_string();
        let body = format!(
            "From: {from}\r\nSubject: {subject}\r\nDate: Tue, 3 Mar 2026 09:15:00 +0000\r\n\
             Message-ID: <{message_id}>\r\nMIME-Version: 1.0\r\n\
             Content-Type: text/html; charset=utf-8\r\n\r\n<html><body>{html}</body></html>\r\n"
        );
        self.messages.push(RawMessage {
            uid,
            body: body.into_bytes(),
        });
        self
    }

    pub fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }
}

impl Mailbox for ScriptedMailbox {
    fn recent(&self, _since_days: u32, limit: usize) -> Result<Vec<RawMessage>, MailError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.failure {
            return Err(MailError::Login(reason.clone()));
        }
        Ok(self.messages.iter().take(limit).cloned().collect())
    }
}

#[derive(Default)]
struct BatchState {
    uploads: Vec<String>,
    remote_status: String,
    output: Option<String>,
    downloads: usize,
}

/// In-memory batch provider. Jobs start `validating`; tests move them along.
#[derive(Default)]
pub struct FakeBatchClient {
    state: Mutex<BatchState>,
}

impl FakeBatchClient {
    pub fn uploads(&self) -> Vec<String> {
        self.state.lock().expect("lock").uploads.clone()
    }

    pub fn set_remote(&self, status: &str, output: Option<String>) {
        let mut state = self.state.lock().expect("lock");
        state.remote_status = status.to_string();
        state.output = output;
    }

    pub fn downloads(&self) -> usize {
        self.state.lock().expect("lock").downloads
    }

    fn remote(&self, id: &str) -> RemoteBatch {
        let state = self.state.lock().expect("lock");
        RemoteBatch {
            id: id.to_string(),
            status: if state.remote_status.is_empty() {
                "validating".to_string()
            } else {
                state.remote_status.clone()
            },
            output_file_id: state.output.as_ref().map(|_| "file-out".to_string()),
            error_file_id: None,
        }
    }
}

#[async_trait]
impl BatchClient for FakeBatchClient {
    async fn upload_manifest(&self, jsonl: String) -> Result<String, BatchError> {
        let mut state = self.state.lock().expect("lock");
        state.uploads.push(jsonl);
        Ok(format!("file-in-{}", state.uploads.len()))
    }

    async fn create_job(&self, _input_file_id: &str) -> Result<RemoteBatch, BatchError> {
        Ok(self.remote("batch_1"))
    }

    async fn retrieve(&self, batch_id: &str) -> Result<RemoteBatch, BatchError> {
        Ok(self.remote(batch_id))
    }

    async fn download(&self, _file_id: &str) -> Result<String, BatchError> {
        let mut state = self.state.lock().expect("lock");
        state.downloads += 1;
        state.output.clone().ok_or(BatchError::NoOutput("batch_1".into()))
    }
}

/// One JSONL output line answering `custom_id` with `content`.
pub fn output_line(custom_id: &str, content: &str) -> String {
    serde_json::json!({
        "custom_id": custom_id,
        "response": {
            "status_code": 200,
            "body": {"choices": [{"message": {"content": content}}]}
        }
    })
    .to_string()
}

pub struct Harness {
    pub radar: Radar,
    pub store: Arc<MemoryStore>,
    pub reasoner: Arc<ScriptedReasoner>,
    pub http: Arc<ScriptedStrategy>,
    pub browser: Arc<ScriptedStrategy>,
    pub batch_client: Arc<FakeBatchClient>,
    pub mailbox: Option<Arc<ScriptedMailbox>>,
    pub sources: Vec<Source>,
}

impl Harness {
    pub async fn new(
        sources: Vec<Source>,
        reasoner: ScriptedReasoner,
        http: ScriptedStrategy,
        browser: ScriptedStrategy,
        sizes: PoolSizes,
    ) -> Self {
        Self::build(sources, reasoner, http, browser, None, sizes).await
    }

    pub async fn with_mailbox(
        sources: Vec<Source>,
        reasoner: ScriptedReasoner,
        http: ScriptedStrategy,
        mailbox: ScriptedMailbox,
    ) -> Self {
        Self::build(
            sources,
            reasoner,
            http,
            ScriptedStrategy::new(Pool::Browser),
            Some(mailbox),
            PoolSizes::default(),
        )
        .await
    }

    async fn build(
        sources: Vec<Source>,
        reasoner: ScriptedReasoner,
        http: ScriptedStrategy,
        browser: ScriptedStrategy,
        mailbox: Option<ScriptedMailbox>,
        sizes: PoolSizes,
    ) -> Self {
        let store = Arc::new(MemoryStore::with_sources(sources.clone()).await);
        let reasoner = Arc::new(reasoner);
        let http = Arc::new(http);
        let browser = Arc::new(browser);
        let batch_client = Arc::new(FakeBatchClient::default());

        let governor = ConcurrencyGovernor::new(sizes);
        let mailbox = mailbox.map(Arc::new);

        let mut fetcher = SourceFetcher::new(http.clone(), browser.clone());
        if let Some(mailbox) = &mailbox {
            let mailbox: Arc<dyn Mailbox> = mailbox.clone();
            fetcher = fetcher.with_email(Arc::new(EmailStrategy::new(
                mailbox,
                governor.blocking().clone(),
            )));
        }
        let radar = Radar::assemble(
            RadarConfig::default(),
            store.clone(),
            reasoner.clone(),
            batch_client.clone(),
            fetcher,
            governor,
        );
        Self {
            radar,
            store,
            reasoner,
            http,
            browser,
            batch_client,
            mailbox,
            sources,
        }
    }

    pub async fn plain(sources: Vec<Source>, reasoner: ScriptedReasoner, http: ScriptedStrategy) -> Self {
        Self::new(
            sources,
            reasoner,
            http,
            ScriptedStrategy::new(Pool::Browser),
            PoolSizes::default(),
        )
        .await
    }

    pub async fn run(&self) -> radar_pipeline::RunSummary {
        self.radar
            .orchestrator()
            .run(self.sources.clone(), profile())
            .await
    }

    pub async fn checkpoint_error(&self, source: &Source) -> Option<Option<String>> {
        let checkpoints = self.store.checkpoints().await;
        let mine: Vec<_> = checkpoints.iter().filter(|c| c.source_id == source.id).collect();
        assert!(mine.len() <= 1, "source {} checkpointed {} times", source.name, mine.len());
        mine.first().map(|c| c.error.clone())
    }
}

pub fn profile() -> UserProfile {
    UserProfile {
        name: "Ada".into(),
        background: "Systems undergrad".into(),
        high_value_signals: vec!["paid".into()],
        ..UserProfile::default()
    }
}

/// A stored record as if an earlier run had persisted it.
pub fn existing(title: &str, org: &str, url: &str) -> NewOpportunity {
    let candidate: Candidate =
        serde_json::from_value(candidate_json(title, org, url)).expect("candidate");
    NewOpportunity {
        source_id: None,
        normalized_url: Some(normalize_url(url)),
        content_hash: content_hash(&format!("{url}{title}")),
        raw_content: String::new(),
        score: parse_score(&score_json("apply", 0.7)).expect("score"),
        candidate,
    }
}

pub async fn seen(store: &MemoryStore, content: &str) {
    store.seed_seen(&content_hash(content)).await;
}
