//! Bulk execution entity definitions.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Database entity for the bulk_executions table.
#[derive(Debug, Clone, FromRow)]
pub struct BulkExecutionEntity {
    pub id: Uuid,
    pub project_id: Uuid,
    pub owner: String,
    pub status: String,
    pub total_rows: i32,
    pub processed_rows: i32,
    pub successful_rows: i32,
    pub failed_rows: i32,
    pub error_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
