//! Core domain model for the opportunity radar: sources, fetch outcomes,
//! extracted candidates, scores and batch jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod lenient;

/// Minimum classifier confidence for content to move on to extraction.
pub const CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Default cap on followed links for browser sources.
pub const DEFAULT_MAX_LINKS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Page,
    Email,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Email => "email",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Per-source fetch strategy settings. Email-only fields stay empty for page sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub url: Option<String>,
    pub use_browser: bool,
    /// CSS selector the browser waits for before capturing the page.
    pub wait_for: Option<String>,
    pub link_pattern: Option<String>,
    pub max_links: usize,
    pub check_frequency_hours: Option<u32>,
    pub sender_patterns: Vec<String>,
    pub notes: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: None,
            use_browser: false,
            wait_for: None,
            link_pattern: None,
            max_links: DEFAULT_MAX_LINKS,
            check_frequency_hours: None,
            sender_patterns: Vec::new(),
            notes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub kind: SourceKind,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub config: SourceConfig,
    pub active: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Source {
    pub fn page(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind: SourceKind::Page,
            priority: Priority::default(),
            tags: Vec::new(),
            config: SourceConfig {
                url: Some(url.into()),
                ..SourceConfig::default()
            },
            active: true,
            last_checked_at: None,
            last_error: None,
        }
    }

    pub fn email<S: Into<String>>(name: impl Into<String>, sender_patterns: impl IntoIterator<Item = S>) -> Self {
        Self {
            kind: SourceKind::Email,
            config: SourceConfig {
                sender_patterns: sender_patterns.into_iter().map(Into::into).collect(),
                ..SourceConfig::default()
            },
            ..Self::page(name, "")
        }
    }

    pub fn with_browser(mut self) -> Self {
        self.config.use_browser = true;
        self
    }

    pub fn uses_browser(&self) -> bool {
        self.config.use_browser
    }

    pub fn url(&self) -> Option<&str> {
        self.config.url.as_deref().filter(|u| !u.trim().is_empty())
    }
}

/// One fetched page. A browser source with link following yields several.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub source_id: Uuid,
    pub source_name: String,
    pub url: String,
    pub content: String,
    pub success: bool,
    pub error: Option<String>,
}

impl FetchResult {
    pub fn ok(source: &Source, url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source_id: source.id,
            source_name: source.name.clone(),
            url: url.into(),
            content: content.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(source: &Source, url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            source_id: source.id,
            source_name: source.name.clone(),
            url: url.into(),
            content: String::new(),
            success: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelSupport {
    None,
    Partial,
    Full,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Classifier verdict for one page of content.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Classification {
    #[serde(deserialize_with = "lenient::flag_or_false")]
    pub contains_opportunity: bool,
    #[serde(deserialize_with = "lenient::number_or_zero")]
    pub confidence: f64,
    #[serde(deserialize_with = "lenient::string_list")]
    pub opportunity_types: Vec<String>,
    #[serde(alias = "brief_reason", deserialize_with = "lenient::text")]
    pub reason: Option<String>,
}

impl Classification {
    pub fn passes_gate(&self) -> bool {
        self.contains_opportunity && self.confidence >= CONFIDENCE_THRESHOLD
    }
}

/// An extracted, not yet scored opportunity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Candidate {
    #[serde(deserialize_with = "lenient::text")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub organization: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub url: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub application_url: Option<String>,
    #[serde(rename = "type", deserialize_with = "lenient::text")]
    pub opportunity_type: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub deadline: Option<String>,
    #[serde(deserialize_with = "lenient::number")]
    pub stipend_amount: Option<f64>,
    #[serde(deserialize_with = "lenient::text")]
    pub stipend_currency: Option<String>,
    pub travel_support: Option<TravelSupport>,
    #[serde(deserialize_with = "lenient::text")]
    pub location: Option<String>,
    #[serde(deserialize_with = "lenient::flag")]
    pub is_remote: Option<bool>,
    #[serde(deserialize_with = "lenient::text")]
    pub eligibility: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub summary: Option<String>,
    #[serde(deserialize_with = "lenient::string_list")]
    pub highlights: Vec<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub prize_details: Option<String>,
}

impl Candidate {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or_default()
    }

    pub fn organization(&self) -> &str {
        self.organization.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    StrongApply,
    Apply,
    Maybe,
    Skip,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrongApply => "strong_apply",
            Self::Apply => "apply",
            Self::Maybe => "maybe",
            Self::Skip => "skip",
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    #[serde(default, deserialize_with = "lenient::number_or_zero")]
    pub relevance_score: f64,
    #[serde(default, deserialize_with = "lenient::number_or_zero")]
    pub prestige_score: f64,
    pub recommendation: Recommendation,
    #[serde(default, deserialize_with = "lenient::text")]
    pub reasoning: Option<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub matched_high_signals: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub matched_low_signals: Vec<String>,
}

/// Scored candidate ready to be written, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOpportunity {
    pub source_id: Option<Uuid>,
    pub candidate: Candidate,
    pub score: ScoreResult,
    pub normalized_url: Option<String>,
    pub content_hash: String,
    pub raw_content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub source_id: Option<Uuid>,
    pub candidate: Candidate,
    pub score: ScoreResult,
    pub normalized_url: Option<String>,
    pub content_hash: String,
    pub raw_content: String,
}

impl Opportunity {
    pub fn from_new(new: NewOpportunity) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            source_id: new.source_id,
            candidate: new.candidate,
            score: new.score,
            normalized_url: new.normalized_url,
            content_hash: new.content_hash,
            raw_content: new.raw_content,
        }
    }
}

/// Who the radar is looking on behalf of; passed verbatim to the scorer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub name: String,
    pub background: String,
    pub interests: Vec<String>,
    pub constraints: serde_json::Value,
    pub high_value_signals: Vec<String>,
    pub low_value_signals: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Classify,
    Extract,
    Score,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Extract => "extract",
            Self::Score => "score",
        }
    }
}

/// One line of a batch manifest, kept in full so replay never re-fetches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub custom_id: String,
    pub request_type: RequestType,
    pub source_id: Option<Uuid>,
    pub source_url: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Submitted,
    InProgress,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "submitted" => Some(Self::Submitted),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Maps a provider-side batch status onto the local lifecycle.
    /// Unrecognized statuses return `None` so the caller keeps what it has.
    pub fn from_provider(value: &str) -> Option<Self> {
        match value {
            "validating" | "in_progress" | "finalizing" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" | "expired" | "cancelling" | "cancelled" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub batch_id: String,
    pub input_file_id: String,
    pub status: BatchStatus,
    pub output_file_id: Option<String>,
    pub requests: Vec<BatchRequest>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl BatchJob {
    pub fn request(&self, custom_id: &str) -> Option<&BatchRequest> {
        self.requests.iter().find(|r| r.custom_id == custom_id)
    }

    pub fn is_pending(&self) -> bool {
        self.status != BatchStatus::Failed && self.processed_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_requires_flag_and_confidence() {
        let mut c = Classification {
            contains_opportunity: true,
            confidence: 0.5,
            ..Default::default()
        };
        assert!(c.passes_gate());
        c.confidence = 0.49;
        assert!(!c.passes_gate());
        c.confidence = 0.9;
        c.contains_opportunity = false;
        assert!(!c.passes_gate());
    }

    #[test]
    fn candidate_decoding_tolerates_loose_types() {
        let candidate: Candidate = serde_json::from_value(serde_json::json!({
            "title": "Research Residency",
            "organization": null,
            "stipend_amount": "$12,000",
            "travel_support": "sometimes",
            "is_remote": "yes",
            "highlights": "Housing included",
            "type": "residency"
        }))
        .expect("candidate");

        assert_eq!(candidate.title(), "Research Residency");
        assert_eq!(candidate.organization, None);
        assert_eq!(candidate.stipend_amount, Some(12000.0));
        assert_eq!(candidate.travel_support, Some(TravelSupport::Unknown));
        assert_eq!(candidate.is_remote, Some(true));
        assert_eq!(candidate.highlights, vec!["Housing included".to_string()]);
        assert_eq!(candidate.opportunity_type.as_deref(), Some("residency"));
    }

    #[test]
    fn provider_status_mapping() {
        assert_eq!(BatchStatus::from_provider("validating"), Some(BatchStatus::InProgress));
        assert_eq!(BatchStatus::from_provider("finalizing"), Some(BatchStatus::InProgress));
        assert_eq!(BatchStatus::from_provider("completed"), Some(BatchStatus::Completed));
        assert_eq!(BatchStatus::from_provider("expired"), Some(BatchStatus::Failed));
        assert_eq!(BatchStatus::from_provider("paused"), None);
        assert!(BatchStatus::Failed.is_terminal());
        assert!(!BatchStatus::Submitted.is_terminal());
    }

    #[test]
    fn priority_orders_high_first() {
        let mut priorities = vec![Priority::Low, Priority::High, Priority::Medium];
        priorities.sort();
        assert_eq!(priorities, vec![Priority::High, Priority::Medium, Priority::Low]);
    }
}
