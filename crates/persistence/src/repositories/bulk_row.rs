//! Per-row result repository for database operations.
//!
//! Rows are written in two phases. The request phase upserts the row with
//! its reconstructed body before the HTTP call goes out; the response
//! phase patches in the outcome. Re-running a row overwrites the previous
//! attempt instead of duplicating it.

use domain::models::BulkRowResult;
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::BulkRowEntity;
use crate::metrics::QueryTimer;

/// Repository for per-row bulk execution results.
#[derive(Clone)]
pub struct BulkRowRepository {
    pool: PgPool,
}

impl BulkRowRepository {
    /// Create a new repository instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert the request phase of a row before it is dispatched.
    pub async fn record_request(
        &self,
        execution_id: Uuid,
        row_index: i32,
        test_case_id: Option<&str>,
        description: Option<&str>,
        request_body: &str,
    ) -> Result<(), sqlx::Error> {
        let timer = QueryTimer::new("record_row_request");
        let result = sqlx::query(
            r#"
            INSERT INTO bulk_execution_rows
                (execution_id, row_index, test_case_id, description, request_body)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (execution_id, row_index) DO UPDATE
            SET test_case_id = EXCLUDED.test_case_id,
                description = EXCLUDED.description,
                request_body = EXCLUDED.request_body,
                response_body = NULL,
                status_code = NULL,
                success = FALSE,
                error = NULL,
                execution_time_ms = NULL
            "#,
        )
        .bind(execution_id)
        .bind(row_index)
        .bind(test_case_id)
        .bind(description)
        .bind(request_body)
        .execute(&self.pool)
        .await;
        timer.record();

        result?;
        Ok(())
    }

    /// Patch the HTTP outcome into a previously recorded row.
    pub async fn record_response(
        &self,
        execution_id: Uuid,
        row_index: i32,
        status_code: i32,
        success: bool,
        response_body: Option<&str>,
        execution_time_ms: i64,
    ) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("record_row_response");
        let result = sqlx::query(
            r#"
            UPDATE bulk_execution_rows
            SET status_code = $3, success = $4, response_body = $5, execution_time_ms = $6
            WHERE execution_id = $1 AND row_index = $2
            "#,
        )
        .bind(execution_id)
        .bind(row_index)
        .bind(status_code)
        .bind(success)
        .bind(response_body)
        .bind(execution_time_ms)
        .execute(&self.pool)
        .await;
        timer.record();

        Ok(result?.rows_affected() > 0)
    }

    /// Record a row-level failure that produced no HTTP response, with the
    /// time spent on the attempt when one was made.
    pub async fn record_failure(
        &self,
        execution_id: Uuid,
        row_index: i32,
        error: &str,
        execution_time_ms: Option<i64>,
    ) -> Result<(), sqlx::Error> {
        let timer = QueryTimer::new("record_row_failure");
        let result = sqlx::query(
            r#"
            INSERT INTO bulk_execution_rows
                (execution_id, row_index, success, error, execution_time_ms)
            VALUES ($1, $2, FALSE, $3, $4)
            ON CONFLICT (execution_id, row_index) DO UPDATE
            SET success = FALSE, error = EXCLUDED.error,
                execution_time_ms = EXCLUDED.execution_time_ms
            "#,
        )
        .bind(execution_id)
        .bind(row_index)
        .bind(error)
        .bind(execution_time_ms)
        .execute(&self.pool)
        .await;
        timer.record();

        result?;
        Ok(())
    }

    /// Find a single row result.
    pub async fn find_row(
        &self,
        execution_id: Uuid,
        row_index: i32,
    ) -> Result<Option<BulkRowResult>, sqlx::Error> {
        let timer = QueryTimer::new("find_row_result");
        let result = sqlx::query_as::<_, BulkRowEntity>(
            r#"
            SELECT id, execution_id, row_index, test_case_id, description, request_body,
                   response_body, status_code, success, error, execution_time_ms, created_at
            FROM bulk_execution_rows
            WHERE execution_id = $1 AND row_index = $2
            "#,
        )
        .bind(execution_id)
        .bind(row_index)
        .fetch_optional(&self.pool)
        .await;
        timer.record();

        Ok(result?.map(entity_to_domain))
    }

    /// List a page of row results ordered by row index.
    pub async fn list_page(
        &self,
        execution_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BulkRowResult>, sqlx::Error> {
        let timer = QueryTimer::new("list_row_results_page");
        let result = sqlx::query_as::<_, BulkRowEntity>(
            r#"
            SELECT id, execution_id, row_index, test_case_id, description, request_body,
                   response_body, status_code, success, error, execution_time_ms, created_at
            FROM bulk_execution_rows
            WHERE execution_id = $1
            ORDER BY row_index
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(execution_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await;
        timer.record();

        Ok(result?.into_iter().map(entity_to_domain).collect())
    }

    /// Count rows recorded for an execution.
    pub async fn count_for_execution(&self, execution_id: Uuid) -> Result<i64, sqlx::Error> {
        let timer = QueryTimer::new("count_rows_for_execution");
        let result: Result<i64, sqlx::Error> = sqlx::query_scalar(
            "SELECT COUNT(*) FROM bulk_execution_rows WHERE execution_id = $1",
        )
        .bind(execution_id)
        .fetch_one(&self.pool)
        .await;
        timer.record();

        result
    }
}

fn entity_to_domain(entity: BulkRowEntity) -> BulkRowResult {
    BulkRowResult {
        execution_id: entity.execution_id,
        row_index: entity.row_index,
        test_case_id: entity.test_case_id,
        description: entity.description,
        request_body: entity.request_body,
        response_body: entity.response_body,
        status_code: entity.status_code,
        success: entity.success,
        error: entity.error,
        execution_time_ms: entity.execution_time_ms,
        created_at: entity.created_at,
    }
}
