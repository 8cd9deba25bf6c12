//! Durable job execution models: types, statuses, progress and retry math.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Backoff cap in minutes.
pub const MAX_RETRY_DELAY_MINUTES: i64 = 60;

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    BulkExecution,
    TestGeneration,
    TemplateProcessing,
}

impl JobType {
    /// Convert to database string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BulkExecution => "BULK_EXECUTION",
            Self::TestGeneration => "TEST_GENERATION",
            Self::TemplateProcessing => "TEMPLATE_PROCESSING",
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BULK_EXECUTION" => Ok(Self::BulkExecution),
            "TEST_GENERATION" => Ok(Self::TestGeneration),
            "TEMPLATE_PROCESSING" => Ok(Self::TemplateProcessing),
            other => Err(format!("Unknown job type: {}", other)),
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    RetryScheduled,
}

impl JobStatus {
    /// Convert to database string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::RetryScheduled => "RETRY_SCHEDULED",
        }
    }

    /// Terminal states are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            "RETRY_SCHEDULED" => Ok(Self::RetryScheduled),
            other => Err(format!("Unknown job status: {}", other)),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress snapshot attached to a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub total: i32,
    pub processed: i32,
    pub successful: i32,
    pub failed: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item: Option<String>,
}

/// Sanitized error detail stored when an attempt fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobErrorDetail {
    /// Error kind, e.g. the failing component or exception class.
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub final_failure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_retries: Option<i32>,
}

/// One durable job execution row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecution {
    pub id: Uuid,
    pub job_type: JobType,
    /// Externally visible correlation id, unique per job.
    pub correlation_id: String,
    pub status: JobStatus,
    pub owner: String,
    /// Opaque serialized job parameters.
    pub payload: Value,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
    pub progress: Option<JobProgress>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Exponential backoff delay in minutes for the given retry count,
/// capped at [`MAX_RETRY_DELAY_MINUTES`].
pub fn retry_delay_minutes(retry_count: i32) -> i64 {
    if retry_count >= 6 {
        return MAX_RETRY_DELAY_MINUTES;
    }
    let delay = 2i64.pow(retry_count.max(0) as u32);
    delay.min(MAX_RETRY_DELAY_MINUTES)
}
