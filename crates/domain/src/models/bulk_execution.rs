//! Bulk execution models: aggregate state, options and per-row results.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Status of a bulk execution aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkExecutionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl BulkExecutionStatus {
    /// Convert to database string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Status transitions are monotonic; terminal states accept nothing.
    pub fn can_transition_to(&self, next: BulkExecutionStatus) -> bool {
        match self {
            Self::Pending => matches!(
                next,
                Self::Processing | Self::Failed | Self::Cancelled
            ),
            Self::Processing => matches!(
                next,
                Self::Completed | Self::Failed | Self::Cancelled
            ),
            _ => false,
        }
    }
}

impl std::str::FromStr for BulkExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("Unknown bulk execution status: {}", other)),
        }
    }
}

impl std::fmt::Display for BulkExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Declared transformation applied to a request before dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversionMode {
    #[default]
    None,
    SoapToRest,
    RestToSoap,
}

impl ConversionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::SoapToRest => "SOAP_TO_REST",
            Self::RestToSoap => "REST_TO_SOAP",
        }
    }
}

/// Request to start a bulk execution.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BulkExecutionRequest {
    pub project_id: Uuid,

    /// Endpoint to execute against; defaults to the project's first endpoint.
    #[validate(length(max = 255, message = "endpoint_name must be at most 255 characters"))]
    pub endpoint_name: Option<String>,

    /// Dispatch row processing as soon as the job is created.
    #[serde(default = "default_execute_immediately")]
    pub execute_immediately: bool,

    #[serde(default)]
    pub conversion_mode: ConversionMode,

    /// Evaluate fill-color based cell exclusion while parsing.
    #[serde(default)]
    pub apply_color_exclusion: bool,

    /// Maximum retries for the backing job.
    #[validate(range(min = 0, max = 10, message = "max_retries must be 0-10"))]
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
}

fn default_execute_immediately() -> bool {
    true
}

fn default_max_retries() -> i32 {
    3
}

/// One bulk execution aggregate, one per uploaded spreadsheet.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkExecution {
    pub id: Uuid,
    pub project_id: Uuid,
    pub owner: String,
    pub status: BulkExecutionStatus,
    pub total_rows: i32,
    pub processed_rows: i32,
    pub successful_rows: i32,
    pub failed_rows: i32,
    pub error_summary: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Identifier pair returned as soon as a bulk execution is scheduled.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkExecutionHandle {
    pub execution_id: Uuid,
    pub project_id: Uuid,
}

/// Per-row outcome persisted after each HTTP call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRowResult {
    pub execution_id: Uuid,
    /// Original spreadsheet row index.
    pub row_index: i32,
    pub test_case_id: Option<String>,
    pub description: Option<String>,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
    pub status_code: Option<i32>,
    pub success: bool,
    pub error: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Running aggregate counters for one execution.
///
/// `processed` is derived, never stored, so the invariant
/// `processed = successful + failed <= total` holds by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressCounters {
    pub total: i32,
    pub successful: i32,
    pub failed: i32,
}

impl ProgressCounters {
    pub fn new(total: i32) -> Self {
        Self {
            total,
            successful: 0,
            failed: 0,
        }
    }

    pub fn processed(&self) -> i32 {
        self.successful + self.failed
    }

    pub fn record_success(&mut self) {
        self.successful += 1;
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            BulkExecutionStatus::Pending,
            BulkExecutionStatus::Processing,
            BulkExecutionStatus::Completed,
            BulkExecutionStatus::Failed,
            BulkExecutionStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<BulkExecutionStatus>().unwrap(), status);
        }
        assert!("RUNNING".parse::<BulkExecutionStatus>().is_err());
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        use BulkExecutionStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Processing));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!BulkExecutionStatus::Pending.is_terminal());
        assert!(!BulkExecutionStatus::Processing.is_terminal());
        assert!(BulkExecutionStatus::Completed.is_terminal());
        assert!(BulkExecutionStatus::Failed.is_terminal());
        assert!(BulkExecutionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_request_deserialize_defaults() {
        let request: BulkExecutionRequest = serde_json::from_value(json!({
            "projectId": "550e8400-e29b-41d4-a716-446655440000"
        }))
        .unwrap();
        assert!(request.execute_immediately);
        assert_eq!(request.conversion_mode, ConversionMode::None);
        assert_eq!(request.max_retries, 3);
        assert!(!request.apply_color_exclusion);
    }

    #[test]
    fn test_request_validation_rejects_excessive_retries() {
        let request: BulkExecutionRequest = serde_json::from_value(json!({
            "projectId": "550e8400-e29b-41d4-a716-446655440000",
            "maxRetries": 50
        }))
        .unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_conversion_mode_serde() {
        let mode: ConversionMode = serde_json::from_value(json!("SOAP_TO_REST")).unwrap();
        assert_eq!(mode, ConversionMode::SoapToRest);
        assert_eq!(mode.as_str(), "SOAP_TO_REST");
    }

    #[test]
    fn test_progress_counters_invariant() {
        let mut counters = ProgressCounters::new(5);
        counters.record_success();
        counters.record_success();
        counters.record_failure();

        assert_eq!(counters.processed(), 3);
        assert_eq!(counters.processed(), counters.successful + counters.failed);
        assert!(counters.processed() <= counters.total);
    }
}
