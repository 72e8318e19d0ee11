//! YAML source registry: page sources, email sources and the user profile.

use std::path::Path;

use anyhow::{Context, Result};
use radar_core::{Priority, Source, SourceConfig, SourceKind, UserProfile, DEFAULT_MAX_LINKS};
use radar_storage::OpportunityStore;
use serde::Deserialize;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceRegistry {
    #[serde(default)]
    pub page_sources: Vec<PageSourceEntry>,
    #[serde(default)]
    pub email_sources: Vec<EmailSourceEntry>,
    #[serde(default)]
    pub user_profile: Option<UserProfile>,
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageSourceEntry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub check_frequency_hours: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub use_browser: bool,
    #[serde(default)]
    pub wait_for: Option<String>,
    #[serde(default)]
    pub link_pattern: Option<String>,
    #[serde(default)]
    pub max_links: Option<usize>,
    #[serde(default = "enabled")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailSourceEntry {
    pub name: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub sender_patterns: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default = "enabled")]
    pub active: bool,
}

impl PageSourceEntry {
    fn to_source(&self) -> Source {
        Source {
            id: Uuid::new_v4(),
            name: self.name.clone(),
            kind: SourceKind::Page,
            priority: self.priority,
            tags: self.tags.clone(),
            config: SourceConfig {
                url: Some(self.url.clone()),
                use_browser: self.use_browser,
                wait_for: self.wait_for.clone(),
                link_pattern: self.link_pattern.clone(),
                max_links: self.max_links.unwrap_or(DEFAULT_MAX_LINKS),
                check_frequency_hours: self.check_frequency_hours,
                sender_patterns: Vec::new(),
                notes: self.notes.clone(),
            },
            active: self.active,
            last_checked_at: None,
            last_error: None,
        }
    }
}

impl EmailSourceEntry {
    fn to_source(&self) -> Source {
        Source {
            id: Uuid::new_v4(),
            name: self.name.clone(),
            kind: SourceKind::Email,
            priority: self.priority,
            tags: self.tags.clone(),
            config: SourceConfig {
                sender_patterns: self.sender_patterns.clone(),
                notes: self.notes.clone(),
                ..SourceConfig::default()
            },
            active: self.active,
            last_checked_at: None,
            last_error: None,
        }
    }
}

impl SourceRegistry {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing source registry")
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Page sources first, then email sources, in file order.
    pub fn sources(&self) -> Vec<Source> {
        self.page_sources
            .iter()
            .map(PageSourceEntry::to_source)
            .chain(self.email_sources.iter().map(EmailSourceEntry::to_source))
            .collect()
    }
}

/// Upserts every registry source (by name) and saves the profile if one is
/// declared. Returns the number of sources written.
pub async fn sync_registry(store: &dyn OpportunityStore, registry: &SourceRegistry) -> Result<usize> {
    let mut count = 0;
    for source in registry.sources() {
        store
            .upsert_source(&source)
            .await
            .with_context(|| format!("upserting source {}", source.name))?;
        count += 1;
    }
    if let Some(profile) = &registry.user_profile {
        store
            .save_user_profile(profile)
            .await
            .context("saving user profile")?;
    }
    info!(sources = count, profile = registry.user_profile.is_some(), "registry synced");
    Ok(count)
}

/// The stored profile, else the registry's, else an empty one.
pub async fn resolve_profile(
    store: &dyn OpportunityStore,
    registry: Option<&SourceRegistry>,
) -> UserProfile {
    match store.get_user_profile().await {
        Ok(Some(profile)) => return profile,
        Ok(None) => {}
        Err(err) => warn!(error = %err, "loading stored profile failed"),
    }
    match registry.and_then(|r| r.user_profile.clone()) {
        Some(profile) => profile,
        None => {
            warn!("no user profile configured, scoring against an empty profile");
            UserProfile::default()
        }
    }
}
