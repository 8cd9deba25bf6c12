//! Job execution repository for database operations.
//!
//! Jobs are durable: every state change lands here before the in-process
//! worker observes it, so a restarted worker can pick up scheduled retries
//! from the table alone.

use base64::{engine::general_purpose::URL_SAFE, Engine};
use chrono::{DateTime, Duration, Utc};
use domain::models::{
    retry_delay_minutes, JobExecution, JobProgress, JobStatus, JobType,
};
use rand::Rng;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::JobExecutionEntity;
use crate::metrics::QueryTimer;

/// Repository for durable job execution database operations.
#[derive(Clone)]
pub struct JobExecutionRepository {
    pool: PgPool,
}

impl JobExecutionRepository {
    /// Create a new repository instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Generate a unique correlation ID.
    pub fn generate_correlation_id() -> String {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; 12] = rng.gen();
        let encoded = URL_SAFE.encode(random_bytes);
        format!("job_{}", encoded)
    }

    /// Create a new job in PENDING state.
    pub async fn create(
        &self,
        job_type: JobType,
        owner: &str,
        payload: &JsonValue,
        max_retries: i32,
    ) -> Result<JobExecution, sqlx::Error> {
        let correlation_id = Self::generate_correlation_id();

        let timer = QueryTimer::new("create_job_execution");
        let result = sqlx::query_as::<_, JobExecutionEntity>(
            r#"
            INSERT INTO job_executions (job_type, correlation_id, owner, payload, max_retries)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, job_type, correlation_id, status, owner, payload, retry_count,
                      max_retries, next_retry_at, error_message, error_details, progress,
                      created_at, updated_at, started_at, completed_at
            "#,
        )
        .bind(job_type.as_str())
        .bind(&correlation_id)
        .bind(owner)
        .bind(payload)
        .bind(max_retries)
        .fetch_one(&self.pool)
        .await;
        timer.record();

        Ok(entity_to_domain(result?))
    }

    /// Find a job by ID.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<JobExecution>, sqlx::Error> {
        let timer = QueryTimer::new("find_job_by_id");
        let result = sqlx::query_as::<_, JobExecutionEntity>(
            r#"
            SELECT id, job_type, correlation_id, status, owner, payload, retry_count,
                   max_retries, next_retry_at, error_message, error_details, progress,
                   created_at, updated_at, started_at, completed_at
            FROM job_executions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();

        Ok(result?.map(entity_to_domain))
    }

    /// Find a job by its correlation ID.
    pub async fn find_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Option<JobExecution>, sqlx::Error> {
        let timer = QueryTimer::new("find_job_by_correlation_id");
        let result = sqlx::query_as::<_, JobExecutionEntity>(
            r#"
            SELECT id, job_type, correlation_id, status, owner, payload, retry_count,
                   max_retries, next_retry_at, error_message, error_details, progress,
                   created_at, updated_at, started_at, completed_at
            FROM job_executions
            WHERE correlation_id = $1
            "#,
        )
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();

        Ok(result?.map(entity_to_domain))
    }

    /// Claim a job for execution.
    ///
    /// Only PENDING and RETRY_SCHEDULED jobs can be claimed; the guard makes
    /// concurrent claims race-safe since only one UPDATE wins.
    pub async fn mark_running(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("mark_job_running");
        let result = sqlx::query(
            r#"
            UPDATE job_executions
            SET status = 'RUNNING', started_at = COALESCE(started_at, NOW()),
                next_retry_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status IN ('PENDING', 'RETRY_SCHEDULED')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await;
        timer.record();

        Ok(result?.rows_affected() > 0)
    }

    /// Mark a job as completed.
    pub async fn mark_completed(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("mark_job_completed");
        let result = sqlx::query(
            r#"
            UPDATE job_executions
            SET status = 'COMPLETED', updated_at = NOW(), completed_at = NOW()
            WHERE id = $1 AND status = 'RUNNING'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await;
        timer.record();

        Ok(result?.rows_affected() > 0)
    }

    /// Schedule the next retry after a failed attempt.
    ///
    /// Increments the retry counter and computes the exponential backoff
    /// from the new count.
    pub async fn schedule_retry(
        &self,
        id: Uuid,
        retry_count: i32,
        error_message: &str,
        error_details: Option<&JsonValue>,
    ) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
        let next_retry_at = Utc::now() + Duration::minutes(retry_delay_minutes(retry_count));

        let timer = QueryTimer::new("schedule_job_retry");
        let result = sqlx::query(
            r#"
            UPDATE job_executions
            SET status = 'RETRY_SCHEDULED', retry_count = $2, next_retry_at = $3,
                error_message = $4, error_details = $5, updated_at = NOW()
            WHERE id = $1 AND status = 'RUNNING'
            "#,
        )
        .bind(id)
        .bind(retry_count)
        .bind(next_retry_at)
        .bind(error_message)
        .bind(error_details)
        .execute(&self.pool)
        .await;
        timer.record();

        Ok((result?.rows_affected() > 0).then_some(next_retry_at))
    }

    /// Mark a job as permanently failed.
    pub async fn mark_failed(
        &self,
        id: Uuid,
        error_message: &str,
        error_details: Option<&JsonValue>,
    ) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("mark_job_failed");
        let result = sqlx::query(
            r#"
            UPDATE job_executions
            SET status = 'FAILED', error_message = $2, error_details = $3,
                updated_at = NOW(), completed_at = NOW()
            WHERE id = $1 AND status IN ('PENDING', 'RUNNING', 'RETRY_SCHEDULED')
            "#,
        )
        .bind(id)
        .bind(error_message)
        .bind(error_details)
        .execute(&self.pool)
        .await;
        timer.record();

        Ok(result?.rows_affected() > 0)
    }

    /// Mark a job as cancelled.
    pub async fn mark_cancelled(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("mark_job_cancelled");
        let result = sqlx::query(
            r#"
            UPDATE job_executions
            SET status = 'CANCELLED', updated_at = NOW(), completed_at = NOW()
            WHERE id = $1 AND status IN ('PENDING', 'RUNNING', 'RETRY_SCHEDULED')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await;
        timer.record();

        Ok(result?.rows_affected() > 0)
    }

    /// Replace the progress snapshot of a running job.
    pub async fn update_progress(
        &self,
        id: Uuid,
        progress: &JobProgress,
    ) -> Result<bool, sqlx::Error> {
        let progress_json =
            serde_json::to_value(progress).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        let timer = QueryTimer::new("update_job_progress");
        let result = sqlx::query(
            r#"
            UPDATE job_executions
            SET progress = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'RUNNING'
            "#,
        )
        .bind(id)
        .bind(&progress_json)
        .execute(&self.pool)
        .await;
        timer.record();

        Ok(result?.rows_affected() > 0)
    }

    /// Find retry-scheduled jobs whose backoff has elapsed.
    pub async fn find_due_retries(&self, limit: i64) -> Result<Vec<JobExecution>, sqlx::Error> {
        let timer = QueryTimer::new("find_due_job_retries");
        let result = sqlx::query_as::<_, JobExecutionEntity>(
            r#"
            SELECT id, job_type, correlation_id, status, owner, payload, retry_count,
                   max_retries, next_retry_at, error_message, error_details, progress,
                   created_at, updated_at, started_at, completed_at
            FROM job_executions
            WHERE status = 'RETRY_SCHEDULED' AND next_retry_at <= NOW()
            ORDER BY next_retry_at
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await;
        timer.record();

        Ok(result?.into_iter().map(entity_to_domain).collect())
    }

    /// Recover jobs left RUNNING by a crashed worker.
    ///
    /// Anything still RUNNING with no update for the given window is assumed
    /// orphaned and goes back to PENDING for a fresh claim.
    pub async fn reset_stale_running(&self, stale_minutes: i64) -> Result<i64, sqlx::Error> {
        let timer = QueryTimer::new("reset_stale_running_jobs");
        let result = sqlx::query(
            r#"
            UPDATE job_executions
            SET status = 'PENDING', updated_at = NOW()
            WHERE status = 'RUNNING' AND updated_at < NOW() - ($1 * INTERVAL '1 minute')
            "#,
        )
        .bind(stale_minutes)
        .execute(&self.pool)
        .await;
        timer.record();

        Ok(result?.rows_affected() as i64)
    }

    /// List jobs for an owner, newest first.
    pub async fn list_for_owner(
        &self,
        owner: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JobExecution>, sqlx::Error> {
        let timer = QueryTimer::new("list_jobs_for_owner");
        let result = sqlx::query_as::<_, JobExecutionEntity>(
            r#"
            SELECT id, job_type, correlation_id, status, owner, payload, retry_count,
                   max_retries, next_retry_at, error_message, error_details, progress,
                   created_at, updated_at, started_at, completed_at
            FROM job_executions
            WHERE owner = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(owner)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await;
        timer.record();

        Ok(result?.into_iter().map(entity_to_domain).collect())
    }
}

fn entity_to_domain(entity: JobExecutionEntity) -> JobExecution {
    let job_type = entity
        .job_type
        .parse::<JobType>()
        .unwrap_or(JobType::BulkExecution);
    let status = entity
        .status
        .parse::<JobStatus>()
        .unwrap_or(JobStatus::Pending);
    let progress = entity
        .progress
        .and_then(|value| serde_json::from_value::<JobProgress>(value).ok());

    JobExecution {
        id: entity.id,
        job_type,
        correlation_id: entity.correlation_id,
        status,
        owner: entity.owner,
        payload: entity.payload,
        retry_count: entity.retry_count,
        max_retries: entity.max_retries,
        next_retry_at: entity.next_retry_at,
        error_message: entity.error_message,
        error_details: entity.error_details,
        progress,
        created_at: entity.created_at,
        updated_at: entity.updated_at,
        started_at: entity.started_at,
        completed_at: entity.completed_at,
    }
}
