//! Source fetching: plain HTTP, headless-browser and mailbox strategies that
//! turn a configured [`Source`] into a list of [`FetchResult`]s.

use std::sync::Arc;

use async_trait::async_trait;
use radar_core::{FetchResult, Source, SourceKind};
use radar_storage::{BlockingError, FetchError, Pool};
use thiserror::Error;

pub mod browser;
pub mod bypass;
pub mod challenge;
pub mod email;
pub mod links;
pub mod strategy;
pub mod text;

pub use browser::{BrowserDriver, BrowserError, BrowserlessDriver, ChromeDriver, RenderedPage};
pub use bypass::{BypassFetcher, FlareSolverrClient};
pub use challenge::is_challenge_page;
pub use email::{
    EmailMessage, EmailStrategy, ImapMailbox, ImapSettings, MailError, Mailbox, NoMailbox, RawMessage,
};
pub use links::select_follow_links;
pub use strategy::{BrowserStrategy, HttpStrategy};
pub use text::{extract_page, PageText};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source has no url configured")]
    MissingUrl,
    #[error(transparent)]
    Http(#[from] FetchError),
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error("bot challenge not cleared for {url}")]
    Challenge { url: String },
    #[error("page parsing failed: {0}")]
    Parse(#[from] BlockingError),
}

/// A way of turning one source into fetched pages.
///
/// Failures never escape as `Err`; they come back as a failed [`FetchResult`]
/// so every source yields a uniform list.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    /// The governor pool a fetch with this strategy must hold.
    fn pool(&self) -> Pool;

    async fn fetch(&self, source: &Source) -> Vec<FetchResult>;
}

/// Picks the strategy a source is configured for.
#[derive(Clone)]
pub struct SourceFetcher {
    http: Arc<dyn FetchStrategy>,
    browser: Arc<dyn FetchStrategy>,
    email: Arc<dyn FetchStrategy>,
    polls_email: bool,
}

impl SourceFetcher {
    pub fn new(http: Arc<dyn FetchStrategy>, browser: Arc<dyn FetchStrategy>) -> Self {
        Self {
            http,
            browser,
            email: Arc::new(NoMailbox),
            polls_email: false,
        }
    }

    pub fn with_email(mut self, email: Arc<dyn FetchStrategy>) -> Self {
        self.email = email;
        self.polls_email = true;
        self
    }

    /// Whether a mailbox is wired in. Without one, email sources are not polled.
    pub fn polls_email(&self) -> bool {
        self.polls_email
    }

    pub fn strategy_for(&self, source: &Source) -> &Arc<dyn FetchStrategy> {
        match source.kind {
            SourceKind::Email => &self.email,
            SourceKind::Page if source.uses_browser() => &self.browser,
            SourceKind::Page => &self.http,
        }
    }
}
