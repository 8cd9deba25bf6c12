//! Per-row result entity definitions.
//!
//! Maps to the bulk_execution_rows table, keyed by (execution id, row
//! index). Request fields are populated before the HTTP call so a crash
//! mid-row still leaves forensic data.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Database entity for the bulk_execution_rows table.
#[derive(Debug, Clone, FromRow)]
pub struct BulkRowEntity {
    pub id: i64,
    pub execution_id: Uuid,
    pub row_index: i32,
    pub test_case_id: Option<String>,
    pub description: Option<String>,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
    pub status_code: Option<i32>,
    pub success: bool,
    pub error: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}
