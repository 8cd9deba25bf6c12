//! Bulk execution orchestrator.
//!
//! Takes a parsed sheet and a project, reconstructs one request body per
//! row, dispatches it and persists the outcome. Row failures are recorded
//! and counted, never propagated; the batch itself only fails on
//! batch-level errors such as a missing project or a dead token endpoint.

use async_trait::async_trait;
use domain::models::{
    BulkExecution, BulkExecutionHandle, BulkExecutionRequest, Cell, ConversionMode, EndpointMeta,
    JobExecution, JobProgress, JobType, ProgressCounters, Project, ProjectType, RowRecord,
    SheetData, SheetGrid,
};
use domain::services::conversion::{json_to_xml, xml_to_json};
use domain::services::parser::{parse_sheet, ColorExclusionRule, ParseOptions};
use domain::services::coercion::{reconstruct_body, HeaderOptions};
use lazy_static::lazy_static;
use persistence::repositories::{
    BulkExecutionRepository, BulkRowRepository, JobExecutionRepository, ProjectRepository,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::pagination::PageParams;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::error::EngineError;
use crate::services::http_client::{prepare_request, HttpDispatcher};
use crate::services::job_engine::{JobEngine, JobHandler};

/// Counters are flushed to the database every this many processed rows.
const PROGRESS_FLUSH_INTERVAL: i32 = 10;

/// Bookkeeping columns read from the sheet but never sent downstream.
pub const TEST_CASE_ID_COLUMN: &str = "Test Case ID";
pub const DESCRIPTION_COLUMN: &str = "Description";

lazy_static! {
    static ref PLACEHOLDER_RE: Regex = Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").unwrap();
}

/// Durable payload of a BULK_EXECUTION job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkExecutionPayload {
    pub execution_id: Uuid,
    pub project_id: Uuid,
    pub endpoint_name: String,
    pub conversion_mode: ConversionMode,
    pub sheet: SheetData,
}

/// Replace `{{Header}}` placeholders with the row's cell values.
///
/// Unresolvable placeholders are left in place so the failure surfaces
/// downstream instead of silently sending an empty segment.
pub fn substitute_placeholders(input: &str, row: &RowRecord) -> String {
    PLACEHOLDER_RE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let header = caps[1].trim();
            row.value(header)
                .map(|v| v.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Cells that survive color exclusion, keyed by header.
fn included_cells(row: &RowRecord) -> HashMap<String, Cell> {
    row.cells
        .iter()
        .filter(|(_, cell)| !cell.excluded)
        .map(|(header, cell)| (header.clone(), cell.clone()))
        .collect()
}

/// Resolve the template rows are reconstructed against.
///
/// SOAP projects may store their request template as XML text inside a
/// JSON string; it is structurally reparsed so header derivation and
/// coercion see typed leaves instead of one string blob.
fn effective_template(template: &Value) -> Result<Value, EngineError> {
    match template {
        Value::String(text) if text.trim_start().starts_with('<') => Ok(xml_to_json(text)?),
        other => Ok(other.clone()),
    }
}

/// Execution ID carried in a bulk job payload. Read directly from the
/// JSON so it survives payloads that fail full deserialization.
fn payload_execution_id(payload: &Value) -> Option<Uuid> {
    payload
        .get("executionId")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

/// Serialize a reconstructed body for the wire.
///
/// SOAP projects and REST_TO_SOAP conversions go out as XML with the
/// endpoint name as the document root; everything else is JSON.
fn serialize_body(
    project_type: ProjectType,
    mode: ConversionMode,
    body: &Value,
    root: &str,
) -> Result<String, EngineError> {
    let as_xml = match mode {
        ConversionMode::RestToSoap => true,
        ConversionMode::SoapToRest => false,
        ConversionMode::None => project_type == ProjectType::Soap,
    };

    if as_xml {
        Ok(json_to_xml(body, root)?)
    } else {
        serde_json::to_string(body).map_err(EngineError::from)
    }
}

/// Orchestrates bulk executions end to end.
pub struct BulkExecutionService {
    projects: ProjectRepository,
    executions: BulkExecutionRepository,
    rows: BulkRowRepository,
    jobs: JobExecutionRepository,
    dispatcher: Arc<HttpDispatcher>,
}

impl BulkExecutionService {
    pub fn new(
        projects: ProjectRepository,
        executions: BulkExecutionRepository,
        rows: BulkRowRepository,
        jobs: JobExecutionRepository,
        dispatcher: Arc<HttpDispatcher>,
    ) -> Self {
        Self {
            projects,
            executions,
            rows,
            jobs,
            dispatcher,
        }
    }

    /// Validate, parse and schedule a bulk execution.
    ///
    /// Returns the execution handle as soon as the durable job exists; row
    /// processing happens on the job engine.
    pub async fn start(
        &self,
        engine: &Arc<JobEngine>,
        request: &BulkExecutionRequest,
        grid: &SheetGrid,
        owner: &str,
    ) -> Result<BulkExecutionHandle, EngineError> {
        request.validate()?;

        let project = self
            .projects
            .find_by_id(request.project_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("Project {} not found", request.project_id))
            })?;

        let endpoint = resolve_endpoint(&project, request.endpoint_name.as_deref())?;
        let endpoint_name = endpoint.name.clone();

        let options = ParseOptions {
            color_exclusion: request
                .apply_color_exclusion
                .then(ColorExclusionRule::default),
        };
        let sheet = parse_sheet(grid, &options)
            .map_err(|e| EngineError::Validation(e.to_string()))?;

        let execution = self
            .executions
            .create(project.id, owner, sheet.valid_rows.len() as i32)
            .await?;

        let payload = BulkExecutionPayload {
            execution_id: execution.id,
            project_id: project.id,
            endpoint_name,
            conversion_mode: request.conversion_mode,
            sheet,
        };
        let payload_json = serde_json::to_value(&payload)?;

        let job = engine
            .create_job(JobType::BulkExecution, owner, &payload_json, request.max_retries)
            .await?;

        info!(
            execution_id = %execution.id,
            correlation_id = %job.correlation_id,
            rows = payload.sheet.valid_rows.len(),
            skipped = payload.sheet.skipped_rows.len(),
            "Bulk execution scheduled"
        );

        if request.execute_immediately {
            engine.submit(job).await?;
        }

        Ok(BulkExecutionHandle {
            execution_id: execution.id,
            project_id: project.id,
        })
    }

    /// Cancel an execution on behalf of its owner.
    ///
    /// The row loop polls the aggregate status between rows and stops at
    /// the next boundary; rows already dispatched keep their results.
    pub async fn cancel(&self, execution_id: Uuid, owner: &str) -> Result<(), EngineError> {
        let execution = self
            .executions
            .find_by_id(execution_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("Execution {} not found", execution_id))
            })?;

        if execution.owner != owner {
            return Err(EngineError::Forbidden(
                "Execution belongs to a different owner".to_string(),
            ));
        }
        if execution.status.is_terminal() {
            return Err(EngineError::Validation(format!(
                "Execution is already {}",
                execution.status
            )));
        }

        self.executions.mark_cancelled(execution_id).await?;
        info!(execution_id = %execution_id, "Bulk execution cancelled");
        Ok(())
    }

    /// List a project's executions, newest first.
    pub async fn list_for_project(
        &self,
        project_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BulkExecution>, EngineError> {
        let page = PageParams::new(limit, offset)
            .map_err(|e| EngineError::Validation(e.to_string()))?;
        Ok(self
            .executions
            .list_for_project(project_id, page.limit, page.offset)
            .await?)
    }

    /// Process every row of a scheduled execution.
    async fn run_rows(&self, job: &JobExecution, payload: &BulkExecutionPayload) -> Result<(), EngineError> {
        let execution_id = payload.execution_id;
        let total = payload.sheet.valid_rows.len() as i32;

        let project = self
            .projects
            .find_by_id(payload.project_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("Project {} not found", payload.project_id))
            })?;
        let endpoint = resolve_endpoint(&project, Some(&payload.endpoint_name))?;
        let template = effective_template(&project.request_template)?;

        self.executions.mark_processing(execution_id, total).await?;

        // One token for the whole batch; the cache refreshes it if a long
        // batch outlives the TTL and a later row needs a fresh one.
        let token = match &project.meta.auth {
            Some(auth) => match self.dispatcher.acquire_token(auth).await {
                Ok(token) => Some(token),
                Err(e) => {
                    self.executions
                        .mark_failed(execution_id, &e.to_string())
                        .await?;
                    return Err(e);
                }
            },
            None => None,
        };

        let mut counters = ProgressCounters::new(total);
        let mut cancelled = false;

        for row in &payload.sheet.valid_rows {
            if self.executions.is_cancelled(execution_id).await? {
                info!(
                    execution_id = %execution_id,
                    processed = counters.processed(),
                    "Cancellation observed, stopping row loop"
                );
                cancelled = true;
                break;
            }

            let success = match self
                .process_row(&project, endpoint, &template, payload.conversion_mode, execution_id, row, token.as_deref())
                .await
            {
                Ok(success) => success,
                Err(e) => {
                    warn!(
                        execution_id = %execution_id,
                        row_index = row.row_index,
                        error = %e,
                        "Row failed"
                    );
                    self.rows
                        .record_failure(execution_id, row.row_index as i32, &e.to_string(), None)
                        .await?;
                    false
                }
            };

            if success {
                counters.record_success();
            } else {
                counters.record_failure();
            }

            if counters.processed() % PROGRESS_FLUSH_INTERVAL == 0 {
                self.flush_progress(job.id, execution_id, &counters, row).await?;
            }
        }

        let progress = JobProgress {
            total: counters.total,
            processed: counters.processed(),
            successful: counters.successful,
            failed: counters.failed,
            current_item: None,
        };
        let _ = self.jobs.update_progress(job.id, &progress).await?;

        if !cancelled {
            self.executions.mark_completed(execution_id, &counters).await?;
            info!(
                execution_id = %execution_id,
                successful = counters.successful,
                failed = counters.failed,
                "Bulk execution completed"
            );
        }

        Ok(())
    }

    async fn flush_progress(
        &self,
        job_id: Uuid,
        execution_id: Uuid,
        counters: &ProgressCounters,
        current_row: &RowRecord,
    ) -> Result<(), EngineError> {
        self.executions.update_counters(execution_id, counters).await?;

        let progress = JobProgress {
            total: counters.total,
            processed: counters.processed(),
            successful: counters.successful,
            failed: counters.failed,
            current_item: Some(format!("row {}", current_row.row_index)),
        };
        self.jobs.update_progress(job_id, &progress).await?;
        Ok(())
    }

    /// Build, persist, dispatch and record one row.
    ///
    /// Returns whether the row counts as successful. Transport failures
    /// after retries are recorded against the row and count as failed.
    async fn process_row(
        &self,
        project: &Project,
        endpoint: &EndpointMeta,
        template: &Value,
        mode: ConversionMode,
        execution_id: Uuid,
        row: &RowRecord,
        token: Option<&str>,
    ) -> Result<bool, EngineError> {
        let test_case_id = row.value(TEST_CASE_ID_COLUMN);
        let description = row.value(DESCRIPTION_COLUMN);

        let cells = included_cells(row);
        let body = reconstruct_body(template, &cells, &HeaderOptions::default());
        let body_str = serialize_body(project.project_type, mode, &body, &endpoint.name)?;

        let resolved = EndpointMeta {
            name: endpoint.name.clone(),
            method: endpoint.method.clone(),
            path: substitute_placeholders(&endpoint.path, row),
            soap_action: endpoint.soap_action.clone(),
        };
        let mut request = prepare_request(
            project.project_type,
            &project.meta,
            &resolved,
            Some(body_str.clone()),
            token,
        );
        for value in request.query_params.values_mut() {
            *value = substitute_placeholders(value, row);
        }

        // Request persisted before dispatch; a crash mid-call still leaves
        // the row's request on record.
        self.rows
            .record_request(
                execution_id,
                row.row_index as i32,
                test_case_id,
                description,
                &body_str,
            )
            .await?;

        let started = Instant::now();
        let outcome = match self.dispatcher.execute(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.rows
                    .record_failure(
                        execution_id,
                        row.row_index as i32,
                        &e.to_string(),
                        Some(started.elapsed().as_millis() as i64),
                    )
                    .await?;
                return Ok(false);
            }
        };

        self.rows
            .record_response(
                execution_id,
                row.row_index as i32,
                outcome.status_code as i32,
                outcome.is_success(),
                outcome.body.as_deref(),
                outcome.execution_time_ms,
            )
            .await?;

        Ok(outcome.is_success())
    }
}

fn resolve_endpoint<'a>(
    project: &'a Project,
    name: Option<&str>,
) -> Result<&'a EndpointMeta, EngineError> {
    match name {
        Some(name) => project.meta.endpoint(name).ok_or_else(|| {
            EngineError::Validation(format!("Endpoint '{}' not defined on project", name))
        }),
        None => project.meta.endpoints.first().ok_or_else(|| {
            EngineError::Validation("Project has no endpoints".to_string())
        }),
    }
}

#[async_trait]
impl JobHandler for BulkExecutionService {
    fn job_type(&self) -> JobType {
        JobType::BulkExecution
    }

    async fn run(&self, job: &JobExecution) -> Result<(), EngineError> {
        let payload: BulkExecutionPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| EngineError::Validation(format!("Malformed job payload: {}", e)))?;

        self.run_rows(job, &payload).await
    }

    /// The job is out of retries; the aggregate must end terminal too.
    async fn on_final_failure(&self, job: &JobExecution, error: &EngineError) {
        let Some(execution_id) = payload_execution_id(&job.payload) else {
            warn!(
                correlation_id = %job.correlation_id,
                "Failed job payload carries no execution id"
            );
            return;
        };

        match self
            .executions
            .mark_failed(execution_id, &error.to_string())
            .await
        {
            Ok(true) => warn!(
                execution_id = %execution_id,
                error = %error,
                "Bulk execution failed"
            ),
            // Already terminal, e.g. the token path marked it failed.
            Ok(false) => {}
            Err(e) => warn!(
                execution_id = %execution_id,
                error = %e,
                "Failed to record execution failure"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::CellTypeHint;
    use serde_json::json;

    fn row(values: &[(&str, &str)]) -> RowRecord {
        let cells = values
            .iter()
            .map(|(header, value)| {
                (header.to_string(), Cell::new(*value, CellTypeHint::String))
            })
            .collect();
        RowRecord { row_index: 1, cells }
    }

    #[test]
    fn test_substitute_placeholders() {
        let row = row(&[("orderId", "42"), ("region", "eu")]);
        assert_eq!(
            substitute_placeholders("/orders/{{orderId}}?r={{ region }}", &row),
            "/orders/42?r=eu"
        );
    }

    #[test]
    fn test_substitute_unknown_placeholder_is_kept() {
        let row = row(&[("orderId", "42")]);
        assert_eq!(
            substitute_placeholders("/orders/{{missing}}", &row),
            "/orders/{{missing}}"
        );
    }

    #[test]
    fn test_included_cells_drops_excluded() {
        let mut record = row(&[("a", "1"), ("b", "2")]);
        record.cells.get_mut("b").unwrap().excluded = true;

        let cells = included_cells(&record);
        assert!(cells.contains_key("a"));
        assert!(!cells.contains_key("b"));
    }

    #[test]
    fn test_serialize_body_rest_is_json() {
        let body = json!({"a": 1});
        let out =
            serialize_body(ProjectType::Rest, ConversionMode::None, &body, "order").unwrap();
        assert_eq!(out, r#"{"a":1}"#);
    }

    #[test]
    fn test_serialize_body_soap_is_xml() {
        let body = json!({"a": "1"});
        let out =
            serialize_body(ProjectType::Soap, ConversionMode::None, &body, "order").unwrap();
        assert!(out.starts_with("<order>"));
        assert!(out.contains("<a>1</a>"));
    }

    #[test]
    fn test_serialize_body_conversion_overrides_project_type() {
        let body = json!({"a": "1"});

        let xml =
            serialize_body(ProjectType::Rest, ConversionMode::RestToSoap, &body, "order").unwrap();
        assert!(xml.starts_with("<order>"));

        let json_out =
            serialize_body(ProjectType::Soap, ConversionMode::SoapToRest, &body, "order").unwrap();
        assert_eq!(json_out, r#"{"a":"1"}"#);
    }

    #[test]
    fn test_effective_template_reparses_xml_text() {
        let template = Value::String("<order><id>42</id><open>true</open></order>".to_string());
        let resolved = effective_template(&template).unwrap();
        assert_eq!(resolved, json!({"order": {"id": "42", "open": "true"}}));
    }

    #[test]
    fn test_effective_template_keeps_json_shapes() {
        let object = json!({"a": 1});
        assert_eq!(effective_template(&object).unwrap(), object);

        let plain = Value::String("not markup".to_string());
        assert_eq!(effective_template(&plain).unwrap(), plain);
    }

    #[test]
    fn test_effective_template_rejects_broken_xml() {
        let template = Value::String("<order><id></order>".to_string());
        assert!(matches!(
            effective_template(&template),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_payload_execution_id_extraction() {
        let payload = BulkExecutionPayload {
            execution_id: Uuid::from_u128(7),
            project_id: Uuid::nil(),
            endpoint_name: "createOrder".to_string(),
            conversion_mode: ConversionMode::None,
            sheet: SheetData {
                headers: vec![],
                valid_rows: vec![],
                skipped_rows: vec![],
            },
        };
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(payload_execution_id(&value), Some(Uuid::from_u128(7)));
        assert_eq!(payload_execution_id(&json!({"bogus": true})), None);
    }

    #[test]
    fn test_payload_roundtrip() {
        let payload = BulkExecutionPayload {
            execution_id: Uuid::nil(),
            project_id: Uuid::nil(),
            endpoint_name: "createOrder".to_string(),
            conversion_mode: ConversionMode::None,
            sheet: SheetData {
                headers: vec!["a".to_string()],
                valid_rows: vec![row(&[("a", "1")])],
                skipped_rows: vec![2],
            },
        };

        let value = serde_json::to_value(&payload).unwrap();
        let back: BulkExecutionPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back.endpoint_name, "createOrder");
        assert_eq!(back.sheet.valid_rows.len(), 1);
        assert_eq!(back.sheet.skipped_rows, vec![2]);
    }
}
