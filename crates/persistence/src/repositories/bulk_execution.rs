//! Bulk execution repository for database operations.

use domain::models::{BulkExecution, BulkExecutionStatus, ProgressCounters};
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::BulkExecutionEntity;
use crate::metrics::QueryTimer;

/// Repository for bulk execution aggregate database operations.
#[derive(Clone)]
pub struct BulkExecutionRepository {
    pool: PgPool,
}

impl BulkExecutionRepository {
    /// Create a new repository instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new execution in PENDING state with its parsed row count.
    pub async fn create(
        &self,
        project_id: Uuid,
        owner: &str,
        total_rows: i32,
    ) -> Result<BulkExecution, sqlx::Error> {
        let timer = QueryTimer::new("create_bulk_execution");
        let result = sqlx::query_as::<_, BulkExecutionEntity>(
            r#"
            INSERT INTO bulk_executions (project_id, owner, total_rows)
            VALUES ($1, $2, $3)
            RETURNING id, project_id, owner, status, total_rows, processed_rows,
                      successful_rows, failed_rows, error_summary, created_at, updated_at,
                      completed_at
            "#,
        )
        .bind(project_id)
        .bind(owner)
        .bind(total_rows)
        .fetch_one(&self.pool)
        .await;
        timer.record();

        Ok(entity_to_domain(result?))
    }

    /// Find an execution by ID.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<BulkExecution>, sqlx::Error> {
        let timer = QueryTimer::new("find_bulk_execution_by_id");
        let result = sqlx::query_as::<_, BulkExecutionEntity>(
            r#"
            SELECT id, project_id, owner, status, total_rows, processed_rows,
                   successful_rows, failed_rows, error_summary, created_at, updated_at,
                   completed_at
            FROM bulk_executions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();

        Ok(result?.map(entity_to_domain))
    }

    /// Move an execution from PENDING to PROCESSING and record the row count.
    pub async fn mark_processing(&self, id: Uuid, total_rows: i32) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("mark_bulk_execution_processing");
        let result = sqlx::query(
            r#"
            UPDATE bulk_executions
            SET status = 'PROCESSING', total_rows = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .bind(total_rows)
        .execute(&self.pool)
        .await;
        timer.record();

        Ok(result?.rows_affected() > 0)
    }

    /// Flush progress counters for a running execution.
    pub async fn update_counters(
        &self,
        id: Uuid,
        counters: &ProgressCounters,
    ) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("update_bulk_execution_counters");
        let result = sqlx::query(
            r#"
            UPDATE bulk_executions
            SET processed_rows = $2, successful_rows = $3, failed_rows = $4, updated_at = NOW()
            WHERE id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(id)
        .bind(counters.processed())
        .bind(counters.successful)
        .bind(counters.failed)
        .execute(&self.pool)
        .await;
        timer.record();

        Ok(result?.rows_affected() > 0)
    }

    /// Mark an execution as completed with final counters.
    pub async fn mark_completed(
        &self,
        id: Uuid,
        counters: &ProgressCounters,
    ) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("mark_bulk_execution_completed");
        let result = sqlx::query(
            r#"
            UPDATE bulk_executions
            SET status = 'COMPLETED', processed_rows = $2, successful_rows = $3,
                failed_rows = $4, updated_at = NOW(), completed_at = NOW()
            WHERE id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(id)
        .bind(counters.processed())
        .bind(counters.successful)
        .bind(counters.failed)
        .execute(&self.pool)
        .await;
        timer.record();

        Ok(result?.rows_affected() > 0)
    }

    /// Mark an execution as failed with an error summary.
    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("mark_bulk_execution_failed");
        let result = sqlx::query(
            r#"
            UPDATE bulk_executions
            SET status = 'FAILED', error_summary = $2, updated_at = NOW(), completed_at = NOW()
            WHERE id = $1 AND status IN ('PENDING', 'PROCESSING')
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await;
        timer.record();

        Ok(result?.rows_affected() > 0)
    }

    /// Mark an execution as cancelled.
    pub async fn mark_cancelled(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("mark_bulk_execution_cancelled");
        let result = sqlx::query(
            r#"
            UPDATE bulk_executions
            SET status = 'CANCELLED', updated_at = NOW(), completed_at = NOW()
            WHERE id = $1 AND status IN ('PENDING', 'PROCESSING')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await;
        timer.record();

        Ok(result?.rows_affected() > 0)
    }

    /// Check whether an execution has been cancelled.
    ///
    /// Polled between rows so a cancellation takes effect mid-batch.
    pub async fn is_cancelled(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("is_bulk_execution_cancelled");
        let result: Result<Option<String>, sqlx::Error> =
            sqlx::query_scalar("SELECT status FROM bulk_executions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await;
        timer.record();

        Ok(result?.as_deref() == Some("CANCELLED"))
    }

    /// List executions for a project, newest first.
    pub async fn list_for_project(
        &self,
        project_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BulkExecution>, sqlx::Error> {
        let timer = QueryTimer::new("list_bulk_executions_for_project");
        let result = sqlx::query_as::<_, BulkExecutionEntity>(
            r#"
            SELECT id, project_id, owner, status, total_rows, processed_rows,
                   successful_rows, failed_rows, error_summary, created_at, updated_at,
                   completed_at
            FROM bulk_executions
            WHERE project_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(project_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await;
        timer.record();

        Ok(result?.into_iter().map(entity_to_domain).collect())
    }
}

fn entity_to_domain(entity: BulkExecutionEntity) -> BulkExecution {
    let status = entity
        .status
        .parse::<BulkExecutionStatus>()
        .unwrap_or(BulkExecutionStatus::Pending);

    BulkExecution {
        id: entity.id,
        project_id: entity.project_id,
        owner: entity.owner,
        status,
        total_rows: entity.total_rows,
        processed_rows: entity.processed_rows,
        successful_rows: entity.successful_rows,
        failed_rows: entity.failed_rows,
        error_summary: entity.error_summary,
        created_at: entity.created_at,
        updated_at: entity.updated_at,
        completed_at: entity.completed_at,
    }
}
