//! IMAP mailbox polling. Each message that matches a source's sender patterns
//! becomes one markdown [`FetchResult`] keyed `email:<message id>`.

use std::collections::BTreeSet;
use std::net::TcpStream;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailparse::{parse_mail, DispositionType, MailHeaderMap, ParsedMail};
use radar_core::{FetchResult, Source};
use radar_storage::{BlockingError, BlockingPool, Pool};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::text::extract_page;
use crate::FetchStrategy;

const IO_TIMEOUT: Duration = Duration::from_secs(30);

static URL_IN_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"']+"#).expect("url pattern"));

static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank line pattern"));

static JOB_LINKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"careers\.",
        r"/careers/",
        r"/jobs?/",
        r"greenhouse\.io",
        r"lever\.co",
        r"workday",
        r"ashbyhq\.com",
        r"icims\.com",
        r"apply",
        r"/fellowship",
        r"/internship",
        r"/residency",
    ])
});

static NOISE_LINKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"unsubscribe",
        r"preferences",
        r"mailto:",
        r"facebook\.com",
        r"twitter\.com",
        r"linkedin\.com/company",
        r"instagram\.com",
        r"view.*browser",
        r"email-tracking",
        r"click\.convertkit",
        r"list-manage\.com",
    ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("link pattern"))
        .collect()
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("imap connection failed: {0}")]
    Connect(#[from] std::io::Error),
    #[error("tls handshake failed: {0}")]
    Tls(String),
    #[error("imap login failed: {0}")]
    Login(String),
    #[error(transparent)]
    Imap(#[from] imap::Error),
    #[error("message {id} could not be parsed: {reason}")]
    Parse { id: String, reason: String },
    #[error(transparent)]
    Blocking(#[from] BlockingError),
}

/// One raw RFC 822 message as the server returned it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub uid: String,
    pub body: Vec<u8>,
}

/// A synchronous mailbox. Calls run on the blocking pool.
pub trait Mailbox: Send + Sync {
    /// Messages received in the last `since_days`, newest first, at most `limit`.
    fn recent(&self, since_days: u32, limit: usize) -> Result<Vec<RawMessage>, MailError>;
}

#[derive(Debug, Clone)]
pub struct ImapSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub folder: String,
}

pub struct ImapMailbox {
    settings: ImapSettings,
}

impl ImapMailbox {
    pub fn new(settings: ImapSettings) -> Self {
        Self { settings }
    }
}

impl Mailbox for ImapMailbox {
    fn recent(&self, since_days: u32, limit: usize) -> Result<Vec<RawMessage>, MailError> {
        let s = &self.settings;
        let tls = native_tls::TlsConnector::builder()
            .build()
            .map_err(|e| MailError::Tls(e.to_string()))?;
        let tcp = TcpStream::connect((s.host.as_str(), s.port))?;
        tcp.set_read_timeout(Some(IO_TIMEOUT))?;
        tcp.set_write_timeout(Some(IO_TIMEOUT))?;
        let stream = tls
            .connect(&s.host, tcp)
            .map_err(|e| MailError::Tls(e.to_string()))?;

        let mut client = imap::Client::new(stream);
        client.read_greeting()?;
        let mut session = client
            .login(&s.username, &s.password)
            .map_err(|(err, _)| MailError::Login(err.to_string()))?;
        info!(host = %s.host, user = %s.username, "imap session open");

        session.select(&s.folder)?;
        let since = (Utc::now() - chrono::Duration::days(i64::from(since_days)))
            .format("%d-%b-%Y")
            .to_string();
        let mut uids: Vec<u32> = session.uid_search(format!("SINCE {since}"))?.into_iter().collect();
        uids.sort_unstable();
        let newest: Vec<u32> = uids.into_iter().rev().take(limit).collect();

        let mut messages = Vec::with_capacity(newest.len());
        for uid in newest {
            let fetched = match session.uid_fetch(uid.to_string(), "RFC822") {
                Ok(fetched) => fetched,
                Err(err) => {
                    warn!(uid, error = %err, "message fetch failed");
                    continue;
                }
            };
            for message in fetched.iter() {
                if let Some(body) = message.body() {
                    messages.push(RawMessage {
                        uid: uid.to_string(),
                        body: body.to_vec(),
                    });
                }
            }
        }

        if let Err(err) = session.logout() {
            debug!(error = %err, "imap logout failed");
        }
        Ok(messages)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    /// `Message-ID` header when present, otherwise the server uid.
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub date: Option<DateTime<Utc>>,
    pub text_body: String,
    pub html_body: String,
    pub links: Vec<String>,
}

impl EmailMessage {
    pub fn parse(raw: &RawMessage) -> Result<Self, MailError> {
        let parse_error = |reason: String| MailError::Parse {
            id: raw.uid.clone(),
            reason,
        };
        let parsed = parse_mail(&raw.body).map_err(|e| parse_error(e.to_string()))?;

        let header = |name: &str| parsed.headers.get_first_value(name).unwrap_or_default();
        let id = header("Message-ID")
            .trim()
            .trim_start_matches('<')
            .trim_end_matches('>')
            .to_string();
        let date = parsed
            .headers
            .get_first_value("Date")
            .and_then(|d| mailparse::dateparse(&d).ok())
            .and_then(|ts| DateTime::from_timestamp(ts, 0));

        let (text_body, html_body) = bodies(&parsed);
        let links = collect_links(&text_body, &html_body);

        Ok(Self {
            id: if id.is_empty() { raw.uid.clone() } else { id },
            subject: header("Subject").trim().to_string(),
            sender: header("From").trim().to_string(),
            date,
            text_body,
            html_body,
            links,
        })
    }

    /// Patterns are case-insensitive and `*` matches anything. No patterns
    /// accepts every sender.
    pub fn from_any(&self, patterns: &[String]) -> bool {
        if patterns.is_empty() {
            return true;
        }
        let sender = self.sender.to_lowercase();
        patterns.iter().any(|pattern| {
            let glob = regex::escape(&pattern.to_lowercase()).replace(r"\*", ".*");
            Regex::new(&glob).is_ok_and(|re| re.is_match(&sender))
        })
    }

    /// Subject, sender and date, then the body as text. HTML wins over plain text.
    pub fn to_markdown(&self) -> String {
        let body = if self.html_body.trim().is_empty() {
            self.text_body.clone()
        } else {
            extract_page(&self.html_body, "").text
        };
        let body = BLANK_RUNS.replace_all(body.trim(), "\n\n");

        let mut out = format!("# {}\n\nFrom: {}\n", self.subject, self.sender);
        if let Some(date) = self.date {
            out.push_str(&format!("Date: {}\n", date.to_rfc2822()));
        }
        out.push('\n');
        out.push_str(&body);
        out
    }

    /// Links that look like postings or application pages, minus
    /// unsubscribe, social and tracking links.
    pub fn job_links(&self) -> Vec<String> {
        self.links
            .iter()
            .filter(|link| {
                let lower = link.to_lowercase();
                !NOISE_LINKS.iter().any(|re| re.is_match(&lower))
                    && JOB_LINKS.iter().any(|re| re.is_match(&lower))
            })
            .cloned()
            .collect()
    }

    pub fn fetch_url(&self) -> String {
        format!("email:{}", self.id)
    }
}

fn bodies(parsed: &ParsedMail<'_>) -> (String, String) {
    let mut text = String::new();
    let mut html = String::new();
    for part in parsed.parts() {
        if !part.subparts.is_empty()
            || matches!(
                part.get_content_disposition().disposition,
                DispositionType::Attachment
            )
        {
            continue;
        }
        let Ok(body) = part.get_body() else {
            warn!(mimetype = %part.ctype.mimetype, "undecodable message part");
            continue;
        };
        match part.ctype.mimetype.as_str() {
            "text/plain" if text.is_empty() => text = body,
            "text/html" if html.is_empty() => html = body,
            _ => {}
        }
    }
    (text, html)
}

fn collect_links(text: &str, html: &str) -> Vec<String> {
    let mut links = BTreeSet::new();
    if !html.is_empty() {
        links.extend(extract_page(html, "").links);
    }
    for found in URL_IN_TEXT.find_iter(text).chain(URL_IN_TEXT.find_iter(html)) {
        links.insert(found.as_str().trim_end_matches(['.', ',', ';', ':', ')']).to_string());
    }
    links.into_iter().filter(|l| l.len() > 10).collect()
}

/// Polls one shared mailbox; each email source keeps the messages from its senders.
pub struct EmailStrategy {
    mailbox: Arc<dyn Mailbox>,
    blocking: BlockingPool,
    since_days: u32,
    limit: usize,
}

impl EmailStrategy {
    pub fn new(mailbox: Arc<dyn Mailbox>, blocking: BlockingPool) -> Self {
        Self {
            mailbox,
            blocking,
            since_days: 7,
            limit: 50,
        }
    }

    pub fn with_window(mut self, since_days: u32, limit: usize) -> Self {
        self.since_days = since_days;
        self.limit = limit;
        self
    }

    async fn messages(&self, patterns: Vec<String>) -> Result<Vec<EmailMessage>, MailError> {
        let mailbox = Arc::clone(&self.mailbox);
        let (since_days, limit) = (self.since_days, self.limit);
        self.blocking
            .run(move || {
                let raw = mailbox.recent(since_days, limit)?;
                let parsed = raw
                    .iter()
                    .filter_map(|message| match EmailMessage::parse(message) {
                        Ok(parsed) => Some(parsed),
                        Err(err) => {
                            warn!(error = %err, "skipping message");
                            None
                        }
                    })
                    .filter(|message| message.from_any(&patterns))
                    .collect();
                Ok(parsed)
            })
            .await?
    }
}

#[async_trait]
impl FetchStrategy for EmailStrategy {
    fn pool(&self) -> Pool {
        Pool::Fetch
    }

    async fn fetch(&self, source: &Source) -> Vec<FetchResult> {
        match self.messages(source.config.sender_patterns.clone()).await {
            Ok(messages) => {
                info!(source = %source.name, messages = messages.len(), "mailbox polled");
                messages
                    .into_iter()
                    .map(|message| {
                        debug!(
                            subject = %message.subject,
                            job_links = message.job_links().len(),
                            "email fetched"
                        );
                        FetchResult::ok(source, message.fetch_url(), message.to_markdown())
                    })
                    .collect()
            }
            Err(err) => {
                warn!(source = %source.name, error = %err, "mailbox poll failed");
                vec![FetchResult::failed(source, "", err.to_string())]
            }
        }
    }
}

/// Stands in when no mailbox credentials are configured.
pub struct NoMailbox;

#[async_trait]
impl FetchStrategy for NoMailbox {
    fn pool(&self) -> Pool {
        Pool::Fetch
    }

    async fn fetch(&self, source: &Source) -> Vec<FetchResult> {
        vec![FetchResult::failed(
            source,
            "",
            "no mailbox configured (set IMAP_USERNAME and IMAP_PASSWORD)",
        )]
    }
}
