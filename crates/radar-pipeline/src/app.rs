//! Composition root: every collaborator is built once here and handed down
//! explicitly.

use std::sync::Arc;

use anyhow::{Context, Result};
use radar_core::{BatchJob, Source, SourceKind, UserProfile};
use radar_sources::{
    BrowserDriver, BrowserStrategy, BrowserlessDriver, ChromeDriver, EmailStrategy,
    FlareSolverrClient, HttpStrategy, ImapMailbox, SourceFetcher,
};
use radar_storage::{
    ConcurrencyGovernor, HttpClientConfig, HttpFetcher, OpportunityStore, PgStore,
};
use tracing::{info, warn};

use crate::batch::{BatchClient, BatchSubmissionPath, OpenAiBatchClient, ReplaySummary};
use crate::config::RadarConfig;
use crate::funnel::ContentFunnel;
use crate::orchestrator::PipelineOrchestrator;
use crate::reasoning::{OpenAiReasoner, ReasoningService};
use crate::registry::{resolve_profile, sync_registry, SourceRegistry};
use crate::report::write_run_report;
use crate::scoring::ScoringFanout;
use crate::RunSummary;

#[derive(Clone)]
pub struct Radar {
    config: RadarConfig,
    store: Arc<dyn OpportunityStore>,
    governor: ConcurrencyGovernor,
    orchestrator: PipelineOrchestrator,
    batch: BatchSubmissionPath,
    polls_email: bool,
}

impl Radar {
    /// Connects to Postgres, applies migrations and wires the OpenAI-backed
    /// reasoning and batch clients.
    pub async fn from_config(config: RadarConfig) -> Result<Self> {
        let store = PgStore::connect(&config.database_url, config.database_max_connections)
            .await
            .context("connecting to database")?;
        store.migrate().await.context("running migrations")?;

        let api_key = config
            .openai_api_key
            .clone()
            .context("OPENAI_API_KEY is not set")?;
        let mut reasoner = OpenAiReasoner::new(&api_key, config.models())
            .with_timeout(config.reasoning_timeout());
        let mut batch_client = OpenAiBatchClient::new(&api_key);
        if let Some(base) = &config.openai_base_url {
            reasoner = reasoner.with_base_url(base);
            batch_client = batch_client.with_base_url(base);
        }

        let governor = ConcurrencyGovernor::new(config.pools);
        let fetcher = build_fetcher(&config, &governor)?;
        Ok(Self::assemble(
            config,
            Arc::new(store),
            Arc::new(reasoner),
            Arc::new(batch_client),
            fetcher,
            governor,
        ))
    }

    pub fn assemble(
        config: RadarConfig,
        store: Arc<dyn OpportunityStore>,
        reasoner: Arc<dyn ReasoningService>,
        batch_client: Arc<dyn BatchClient>,
        fetcher: SourceFetcher,
        governor: ConcurrencyGovernor,
    ) -> Self {
        let polls_email = fetcher.polls_email();
        let funnel = ContentFunnel::new(store.clone(), reasoner.clone(), governor.clone());
        let fanout = ScoringFanout::new(store.clone(), reasoner, governor.clone());
        let orchestrator = PipelineOrchestrator::new(
            store.clone(),
            fetcher.clone(),
            funnel.clone(),
            fanout.clone(),
            governor.clone(),
        );
        let batch = BatchSubmissionPath::new(
            store.clone(),
            batch_client,
            fetcher,
            funnel,
            fanout,
            governor.clone(),
            config.models(),
        );
        Self {
            config,
            store,
            governor,
            orchestrator,
            batch,
            polls_email,
        }
    }

    pub fn config(&self) -> &RadarConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &PipelineOrchestrator {
        &self.orchestrator
    }

    pub fn batch(&self) -> &BatchSubmissionPath {
        &self.batch
    }

    async fn registry(&self) -> Option<SourceRegistry> {
        match SourceRegistry::load(&self.config.sources_file).await {
            Ok(registry) => Some(registry),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "source registry unavailable");
                None
            }
        }
    }

    pub async fn profile(&self) -> UserProfile {
        let registry = self.registry().await;
        resolve_profile(self.store.as_ref(), registry.as_ref()).await
    }

    /// Active page sources, plus email sources when a mailbox is configured.
    pub async fn active_sources(&self) -> Result<Vec<Source>> {
        let mut sources = self
            .store
            .get_active_sources(Some(SourceKind::Page))
            .await
            .context("loading active page sources")?;
        let email = self
            .store
            .get_active_sources(Some(SourceKind::Email))
            .await
            .context("loading active email sources")?;
        if self.polls_email {
            sources.extend(email);
        } else if !email.is_empty() {
            warn!(skipped = email.len(), "no mailbox configured, email sources not polled");
        }
        Ok(sources)
    }

    /// One online run over every active source, concurrent unless
    /// `sequential` is set. Writes the run report when a reports dir is configured.
    pub async fn run(&self, sequential: bool) -> Result<RunSummary> {
        let profile = self.profile().await;
        let sources = self.active_sources().await?;

        let summary = if sequential {
            self.orchestrator.run_sequential(sources, profile).await
        } else {
            self.orchestrator.run(sources, profile).await
        };

        if let Some(dir) = &self.config.reports_dir {
            let run_dir = write_run_report(dir, &summary).await?;
            info!(path = %run_dir.display(), "run report written");
        }
        Ok(summary)
    }

    pub async fn submit_batch(&self) -> Result<Option<BatchJob>> {
        let profile = self.profile().await;
        let sources = self.active_sources().await?;
        Ok(self.batch.collect_and_submit(sources, &profile).await?)
    }

    pub async fn batch_status(&self) -> Result<Vec<BatchJob>> {
        Ok(self.batch.refresh_pending().await?)
    }

    pub async fn process_batches(&self) -> Result<Vec<ReplaySummary>> {
        let profile = self.profile().await;
        Ok(self.batch.process_ready(&profile).await?)
    }

    /// Closes every pool; in-flight work finishes, queued work fails fast.
    pub fn shutdown(&self) {
        self.governor.shutdown();
    }
}

/// Applies migrations and loads the registry file into the database.
/// Needs no reasoning credentials.
pub async fn initialize(config: &RadarConfig) -> Result<usize> {
    let store = PgStore::connect(&config.database_url, config.database_max_connections)
        .await
        .context("connecting to database")?;
    store.migrate().await.context("running migrations")?;
    let registry = SourceRegistry::load(&config.sources_file).await?;
    sync_registry(&store, &registry).await
}

/// Plain HTTP and browser strategies, with the browser backed by Browserless
/// when configured and a local Chrome otherwise. The IMAP mailbox is wired in
/// when credentials are set.
pub fn build_fetcher(config: &RadarConfig, governor: &ConcurrencyGovernor) -> Result<SourceFetcher> {
    let mut http_config = HttpClientConfig {
        timeout: config.http_timeout(),
        ..HttpClientConfig::default()
    };
    if let Some(agent) = &config.user_agent {
        http_config.user_agent = agent.clone();
    }
    let http = HttpFetcher::new(http_config)?;

    let driver: Arc<dyn BrowserDriver> = match &config.browserless_url {
        Some(url) => Arc::new(BrowserlessDriver::new(
            url,
            config.browserless_token.as_deref(),
            config.browser_timeout(),
        )?),
        None => Arc::new(ChromeDriver::new(&config.chrome_bin, config.browser_timeout())),
    };
    let bypass = Arc::new(FlareSolverrClient::new(
        &config.flaresolverr_url,
        config.bypass_timeout(),
    )?);

    let blocking = governor.blocking().clone();
    let browser = BrowserStrategy::new(driver, bypass, blocking.clone())
        .with_render_timeout(config.browser_timeout())
        .with_politeness_delay(config.politeness_delay());

    let fetcher = SourceFetcher::new(
        Arc::new(HttpStrategy::new(http, blocking.clone())),
        Arc::new(browser),
    );
    Ok(match config.imap() {
        Some(settings) => {
            let mailbox = Arc::new(ImapMailbox::new(settings));
            fetcher.with_email(Arc::new(
                EmailStrategy::new(mailbox, blocking)
                    .with_window(config.email_since_days, config.email_limit),
            ))
        }
        None => fetcher,
    })
}
