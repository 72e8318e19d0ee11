//! In-process store used by tests and dry runs.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use radar_core::{
    BatchJob, BatchStatus, NewOpportunity, Opportunity, Source, SourceKind, UserProfile,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::store::{OpportunityStore, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub source_id: Uuid,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
#[cfg_attr(not(any(test, feature = "testing")), allow(dead_code))]
struct MemoryState {
    sources: Vec<Source>,
    seen: HashSet<String>,
    opportunities: Vec<Opportunity>,
    checkpoints: Vec<Checkpoint>,
    profile: Option<UserProfile>,
    batches: Vec<BatchJob>,
    insert_attempts: usize,
    fail_inserts: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_sources(sources: Vec<Source>) -> Self {
        let store = Self::new();
        store.state.lock().await.sources = sources;
        store
    }
}

/// Seeding and inspection hooks for tests. Enabled with the `testing` feature.
#[cfg(any(test, feature = "testing"))]
impl MemoryStore {
    pub async fn seed_seen(&self, content_hash: &str) {
        self.state.lock().await.seen.insert(content_hash.to_string());
    }

    pub async fn seed_opportunity(&self, new: NewOpportunity) {
        self.state.lock().await.opportunities.push(Opportunity::from_new(new));
    }

    /// Makes every later insert fail, to exercise persistence-failure paths.
    pub async fn fail_inserts(&self, fail: bool) {
        self.state.lock().await.fail_inserts = fail;
    }

    pub async fn opportunities(&self) -> Vec<Opportunity> {
        self.state.lock().await.opportunities.clone()
    }

    pub async fn checkpoints(&self) -> Vec<Checkpoint> {
        self.state.lock().await.checkpoints.clone()
    }

    pub async fn insert_attempts(&self) -> usize {
        self.state.lock().await.insert_attempts
    }

    pub async fn seen_count(&self) -> usize {
        self.state.lock().await.seen.len()
    }

    pub async fn source(&self, id: Uuid) -> Option<Source> {
        self.state
            .lock()
            .await
            .sources
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }
}

fn conflicts(existing: &Opportunity, new: &NewOpportunity) -> bool {
    let same_url = matches!(
        (&existing.normalized_url, &new.normalized_url),
        (Some(a), Some(b)) if a == b
    );
    let same_title_org = match (&existing.candidate.organization, &new.candidate.organization) {
        (Some(a), Some(b)) => a == b && existing.candidate.title == new.candidate.title,
        _ => false,
    };
    same_url || same_title_org
}

#[async_trait]
impl OpportunityStore for MemoryStore {
    async fn is_content_seen(&self, content_hash: &str) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.seen.contains(content_hash))
    }

    async fn mark_content_seen(
        &self,
        content_hash: &str,
        _source_id: Option<Uuid>,
        _url: &str,
    ) -> Result<(), StoreError> {
        self.state.lock().await.seen.insert(content_hash.to_string());
        Ok(())
    }

    async fn opportunity_url_exists(&self, normalized_url: &str) -> Result<bool, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .opportunities
            .iter()
            .any(|o| o.normalized_url.as_deref() == Some(normalized_url)))
    }

    async fn opportunity_title_org_exists(
        &self,
        title: &str,
        organization: &str,
    ) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.opportunities.iter().any(|o| {
            o.candidate.title.as_deref() == Some(title)
                && o.candidate.organization.as_deref() == Some(organization)
        }))
    }

    async fn insert_opportunity(&self, new: NewOpportunity) -> Result<Opportunity, StoreError> {
        let mut state = self.state.lock().await;
        state.insert_attempts += 1;
        if state.fail_inserts {
            return Err(StoreError::Unavailable("inserts disabled".to_string()));
        }
        if state.opportunities.iter().any(|o| conflicts(o, &new)) {
            return Err(StoreError::Duplicate(new.candidate.title().to_string()));
        }
        let record = Opportunity::from_new(new);
        state.opportunities.push(record.clone());
        Ok(record)
    }

    async fn update_source_checkpoint(
        &self,
        source_id: Uuid,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.checkpoints.push(Checkpoint {
            source_id,
            error: error.map(str::to_string),
        });
        if let Some(source) = state.sources.iter_mut().find(|s| s.id == source_id) {
            source.last_checked_at = Some(Utc::now());
            source.last_error = error.map(str::to_string);
        }
        Ok(())
    }

    async fn get_active_sources(&self, kind: Option<SourceKind>) -> Result<Vec<Source>, StoreError> {
        let mut sources: Vec<Source> = self
            .state
            .lock()
            .await
            .sources
            .iter()
            .filter(|s| s.active && kind.map_or(true, |k| s.kind == k))
            .cloned()
            .collect();
        sources.sort_by_key(|s| s.priority);
        Ok(sources)
    }

    async fn upsert_source(&self, source: &Source) -> Result<Source, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.sources.iter_mut().find(|s| s.name == source.name) {
            existing.kind = source.kind;
            existing.priority = source.priority;
            existing.tags = source.tags.clone();
            existing.config = source.config.clone();
            existing.active = source.active;
            return Ok(existing.clone());
        }
        state.sources.push(source.clone());
        Ok(source.clone())
    }

    async fn get_user_profile(&self) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.state.lock().await.profile.clone())
    }

    async fn save_user_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        self.state.lock().await.profile = Some(profile.clone());
        Ok(())
    }

    async fn insert_batch_job(&self, job: &BatchJob) -> Result<(), StoreError> {
        self.state.lock().await.batches.push(job.clone());
        Ok(())
    }

    async fn update_batch_status(
        &self,
        batch_id: &str,
        status: BatchStatus,
        output_file_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let job = state
            .batches
            .iter_mut()
            .find(|j| j.batch_id == batch_id)
            .ok_or_else(|| StoreError::NotFound(batch_id.to_string()))?;
        let now = Utc::now();
        job.status = status;
        job.updated_at = now;
        if output_file_id.is_some() {
            job.output_file_id = output_file_id.map(str::to_string);
        }
        if status == BatchStatus::Completed && job.completed_at.is_none() {
            job.completed_at = Some(now);
        }
        Ok(())
    }

    async fn mark_batch_processed(&self, batch_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let job = state
            .batches
            .iter_mut()
            .find(|j| j.batch_id == batch_id)
            .ok_or_else(|| StoreError::NotFound(batch_id.to_string()))?;
        job.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn list_pending_batches(&self) -> Result<Vec<BatchJob>, StoreError> {
        let state = self.state.lock().await;
        let mut jobs: Vec<BatchJob> = state.batches.iter().filter(|j| j.is_pending()).cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn get_batch_job(&self, batch_id: &str) -> Result<Option<BatchJob>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .batches
            .iter()
            .find(|j| j.batch_id == batch_id)
            .cloned())
    }
}
