use async_trait::async_trait;
use radar_core::{
    BatchJob, BatchStatus, NewOpportunity, Opportunity, Source, SourceKind, UserProfile,
};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Insert rejected by a uniqueness rule; the record already exists.
    #[error("duplicate opportunity: {0}")]
    Duplicate(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Everything the pipeline reads from or writes to durable state.
///
/// Opportunities are unique by normalized URL and by `(title, organization)`;
/// implementations reject a violating insert with [`StoreError::Duplicate`]
/// so concurrent check-then-insert races cannot produce two rows.
#[async_trait]
pub trait OpportunityStore: Send + Sync {
    async fn is_content_seen(&self, content_hash: &str) -> Result<bool, StoreError>;

    async fn mark_content_seen(
        &self,
        content_hash: &str,
        source_id: Option<Uuid>,
        url: &str,
    ) -> Result<(), StoreError>;

    async fn opportunity_url_exists(&self, normalized_url: &str) -> Result<bool, StoreError>;

    async fn opportunity_title_org_exists(
        &self,
        title: &str,
        organization: &str,
    ) -> Result<bool, StoreError>;

    async fn insert_opportunity(&self, new: NewOpportunity) -> Result<Opportunity, StoreError>;

    /// Stamps `last_checked_at` and replaces `last_error` (cleared on success).
    async fn update_source_checkpoint(
        &self,
        source_id: Uuid,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Active sources, highest priority first.
    async fn get_active_sources(&self, kind: Option<SourceKind>) -> Result<Vec<Source>, StoreError>;

    /// Inserts or updates by source name, returning the stored row.
    async fn upsert_source(&self, source: &Source) -> Result<Source, StoreError>;

    async fn get_user_profile(&self) -> Result<Option<UserProfile>, StoreError>;

    async fn save_user_profile(&self, profile: &UserProfile) -> Result<(), StoreError>;

    async fn insert_batch_job(&self, job: &BatchJob) -> Result<(), StoreError>;

    async fn update_batch_status(
        &self,
        batch_id: &str,
        status: BatchStatus,
        output_file_id: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn mark_batch_processed(&self, batch_id: &str) -> Result<(), StoreError>;

    /// Jobs that are neither failed nor already replayed, oldest first.
    async fn list_pending_batches(&self) -> Result<Vec<BatchJob>, StoreError>;

    async fn get_batch_job(&self, batch_id: &str) -> Result<Option<BatchJob>, StoreError>;
}
