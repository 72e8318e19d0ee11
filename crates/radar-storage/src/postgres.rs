//! Postgres-backed [`OpportunityStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use radar_core::{
    BatchJob, BatchRequest, BatchStatus, NewOpportunity, Opportunity, Priority, Source,
    SourceConfig, SourceKind, UserProfile,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::{OpportunityStore, StoreError};

const SOURCE_COLUMNS: &str =
    "id, name, kind, priority, tags, config, active, last_checked_at, last_error";
const BATCH_COLUMNS: &str = "batch_id, input_file_id, status, output_file_id, requests, created_at, updated_at, completed_at, processed_at";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct SourceRow {
    id: Uuid,
    name: String,
    kind: String,
    priority: String,
    tags: Json<Vec<String>>,
    config: Json<SourceConfig>,
    active: bool,
    last_checked_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl TryFrom<SourceRow> for Source {
    type Error = StoreError;

    fn try_from(row: SourceRow) -> Result<Self, Self::Error> {
        let kind = match row.kind.as_str() {
            "page" => SourceKind::Page,
            "email" => SourceKind::Email,
            other => return Err(StoreError::NotFound(format!("source kind {other}"))),
        };
        let priority = match row.priority.as_str() {
            "high" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Medium,
        };
        Ok(Source {
            id: row.id,
            name: row.name,
            kind,
            priority,
            tags: row.tags.0,
            config: row.config.0,
            active: row.active,
            last_checked_at: row.last_checked_at,
            last_error: row.last_error,
        })
    }
}

#[derive(Debug, FromRow)]
struct BatchRow {
    batch_id: String,
    input_file_id: String,
    status: String,
    output_file_id: Option<String>,
    requests: Json<Vec<BatchRequest>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
}

impl From<BatchRow> for BatchJob {
    fn from(row: BatchRow) -> Self {
        BatchJob {
            status: BatchStatus::parse(&row.status).unwrap_or(BatchStatus::Submitted),
            batch_id: row.batch_id,
            input_file_id: row.input_file_id,
            output_file_id: row.output_file_id,
            requests: row.requests.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
            processed_at: row.processed_at,
        }
    }
}

#[async_trait]
impl OpportunityStore for PgStore {
    async fn is_content_seen(&self, content_hash: &str) -> Result<bool, StoreError> {
        let found: Option<(String,)> =
            sqlx::query_as("SELECT content_hash FROM seen_content WHERE content_hash = $1")
                .bind(content_hash)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn mark_content_seen(
        &self,
        content_hash: &str,
        source_id: Option<Uuid>,
        url: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO seen_content (content_hash, source_id, url) VALUES ($1, $2, $3) \
             ON CONFLICT (content_hash) DO NOTHING",
        )
        .bind(content_hash)
        .bind(source_id)
        .bind(url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn opportunity_url_exists(&self, normalized_url: &str) -> Result<bool, StoreError> {
        let found: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM opportunities WHERE normalized_url = $1 LIMIT 1")
                .bind(normalized_url)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn opportunity_title_org_exists(
        &self,
        title: &str,
        organization: &str,
    ) -> Result<bool, StoreError> {
        let found: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM opportunities WHERE title = $1 AND organization = $2 LIMIT 1",
        )
        .bind(title)
        .bind(organization)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn insert_opportunity(&self, new: NewOpportunity) -> Result<Opportunity, StoreError> {
        let record = Opportunity::from_new(new);
        let candidate = serde_json::to_value(&record.candidate)?;
        let score = serde_json::to_value(&record.score)?;

        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO opportunities (
                id, source_id, title, organization, url, normalized_url, opportunity_type,
                deadline, recommendation, relevance_score, prestige_score, candidate, score,
                content_hash, raw_content, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(record.id)
        .bind(record.source_id)
        .bind(record.candidate.title())
        .bind(record.candidate.organization.as_deref())
        .bind(record.candidate.url.as_deref())
        .bind(record.normalized_url.as_deref())
        .bind(record.candidate.opportunity_type.as_deref())
        .bind(record.candidate.deadline.as_deref())
        .bind(record.score.recommendation.as_str())
        .bind(record.score.relevance_score)
        .bind(record.score.prestige_score)
        .bind(candidate)
        .bind(score)
        .bind(&record.content_hash)
        .bind(&record.raw_content)
        .bind(record.created_at)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(_) => {
                debug!(id = %record.id, title = record.candidate.title(), "opportunity inserted");
                Ok(record)
            }
            None => Err(StoreError::Duplicate(record.candidate.title().to_string())),
        }
    }

    async fn update_source_checkpoint(
        &self,
        source_id: Uuid,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE sources SET last_checked_at = now(), last_error = $2 WHERE id = $1")
            .bind(source_id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_active_sources(&self, kind: Option<SourceKind>) -> Result<Vec<Source>, StoreError> {
        let sql = format!(
            "SELECT {SOURCE_COLUMNS} FROM sources \
             WHERE active AND ($1::text IS NULL OR kind = $1) \
             ORDER BY CASE priority WHEN 'high' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END, name"
        );
        let rows: Vec<SourceRow> = sqlx::query_as(&sql)
            .bind(kind.map(|k| k.as_str()))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Source::try_from).collect()
    }

    async fn upsert_source(&self, source: &Source) -> Result<Source, StoreError> {
        let sql = format!(
            "INSERT INTO sources (id, name, kind, priority, tags, config, active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (name) DO UPDATE SET kind = EXCLUDED.kind, priority = EXCLUDED.priority, \
             tags = EXCLUDED.tags, config = EXCLUDED.config, active = EXCLUDED.active \
             RETURNING {SOURCE_COLUMNS}"
        );
        let row: SourceRow = sqlx::query_as(&sql)
            .bind(source.id)
            .bind(&source.name)
            .bind(source.kind.as_str())
            .bind(source.priority.as_str())
            .bind(serde_json::to_value(&source.tags)?)
            .bind(serde_json::to_value(&source.config)?)
            .bind(source.active)
            .fetch_one(&self.pool)
            .await?;
        Source::try_from(row)
    }

    async fn get_user_profile(&self) -> Result<Option<UserProfile>, StoreError> {
        let row: Option<(Json<UserProfile>,)> =
            sqlx::query_as("SELECT profile FROM user_profile WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(profile,)| profile.0))
    }

    async fn save_user_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO user_profile (id, profile, updated_at) VALUES (1, $1, now()) \
             ON CONFLICT (id) DO UPDATE SET profile = EXCLUDED.profile, updated_at = now()",
        )
        .bind(serde_json::to_value(profile)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_batch_job(&self, job: &BatchJob) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO batch_jobs (batch_id, input_file_id, status, output_file_id, requests, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&job.batch_id)
        .bind(&job.input_file_id)
        .bind(job.status.as_str())
        .bind(job.output_file_id.as_deref())
        .bind(serde_json::to_value(&job.requests)?)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_batch_status(
        &self,
        batch_id: &str,
        status: BatchStatus,
        output_file_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE batch_jobs SET status = $2, output_file_id = COALESCE($3, output_file_id), \
             updated_at = now(), \
             completed_at = CASE WHEN $2 = 'completed' THEN COALESCE(completed_at, now()) ELSE completed_at END \
             WHERE batch_id = $1",
        )
        .bind(batch_id)
        .bind(status.as_str())
        .bind(output_file_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(batch_id.to_string()));
        }
        Ok(())
    }

    async fn mark_batch_processed(&self, batch_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE batch_jobs SET processed_at = now(), updated_at = now() WHERE batch_id = $1",
        )
        .bind(batch_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(batch_id.to_string()));
        }
        Ok(())
    }

    async fn list_pending_batches(&self) -> Result<Vec<BatchJob>, StoreError> {
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM batch_jobs \
             WHERE processed_at IS NULL AND status <> 'failed' ORDER BY created_at"
        );
        let rows: Vec<BatchRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(BatchJob::from).collect())
    }

    async fn get_batch_job(&self, batch_id: &str) -> Result<Option<BatchJob>, StoreError> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM batch_jobs WHERE batch_id = $1");
        let row: Option<BatchRow> = sqlx::query_as(&sql)
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(BatchJob::from))
    }
}

