//! Result export: per-row bodies, ZIP archives and annotated sheets.

use domain::models::{BulkRowResult, SheetData};
use domain::services::parser::sheet_rows;
use lazy_static::lazy_static;
use persistence::repositories::{BulkExecutionRepository, BulkRowRepository, ProjectRepository};
use regex::Regex;
use shared::flatten::flatten_json;
use shared::pagination::PageParams;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use tracing::info;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::EngineError;

/// Rows are streamed from the database in pages of this size.
const EXPORT_PAGE_SIZE: i64 = 500;

/// Substitute body for rows that never recorded one.
const EMPTY_BODY: &str = "{}";

lazy_static! {
    static ref ENTRY_SANITIZE_RE: Regex = Regex::new(r"[^A-Za-z0-9._-]+").unwrap();
}

/// Which persisted body of a row to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPart {
    Request,
    Response,
}

/// A sheet rendered for export: headers plus one string row per data row.
#[derive(Debug, Clone)]
pub struct ExportedSheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Render the uploaded sheet back from its parsed form, as stored in the
/// execution's job payload.
pub fn original_sheet(sheet: &SheetData) -> ExportedSheet {
    ExportedSheet {
        headers: sheet.headers.clone(),
        rows: sheet_rows(sheet),
    }
}

/// Collapse a test case ID into a safe archive entry stem.
fn sanitize_entry_stem(raw: &str) -> String {
    let sanitized = ENTRY_SANITIZE_RE.replace_all(raw.trim(), "_");
    sanitized.trim_matches('_').to_string()
}

/// Entry stem for one row: the sanitized test case ID, or the row index
/// when the sheet carries none.
fn entry_stem(row: &BulkRowResult) -> String {
    row.test_case_id
        .as_deref()
        .map(sanitize_entry_stem)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("row_{}", row.row_index))
}

/// Fixed bookkeeping columns of the annotated sheet.
const BOOKKEEPING_HEADERS: [&str; 7] = [
    "Row",
    "Test Case ID",
    "Description",
    "Status",
    "Status Code",
    "Error",
    "Duration (ms)",
];

/// Headers for the annotated sheet: bookkeeping columns, then one
/// EXPECTED_ and one ACTUAL_ column per leaf of the response template.
fn annotated_headers(expected_paths: &[String]) -> Vec<String> {
    let mut headers: Vec<String> = BOOKKEEPING_HEADERS.iter().map(|h| h.to_string()).collect();
    for path in expected_paths {
        headers.push(format!("EXPECTED_{}", path));
    }
    for path in expected_paths {
        headers.push(format!("ACTUAL_{}", path));
    }
    headers
}

fn annotated_row(
    row: &BulkRowResult,
    expected_paths: &[String],
    expected_values: &HashMap<String, String>,
) -> Vec<String> {
    let mut cells = vec![
        row.row_index.to_string(),
        row.test_case_id.clone().unwrap_or_default(),
        row.description.clone().unwrap_or_default(),
        if row.success { "PASS" } else { "FAIL" }.to_string(),
        row.status_code.map(|c| c.to_string()).unwrap_or_default(),
        row.error.clone().unwrap_or_default(),
        row.execution_time_ms
            .map(|ms| ms.to_string())
            .unwrap_or_default(),
    ];

    for path in expected_paths {
        cells.push(expected_values.get(path).cloned().unwrap_or_default());
    }

    let actual: HashMap<String, String> = row
        .response_body
        .as_deref()
        .and_then(|body| serde_json::from_str::<serde_json::Value>(body).ok())
        .map(|value| flatten_json(&value).into_iter().collect())
        .unwrap_or_default();
    for path in expected_paths {
        cells.push(actual.get(path).cloned().unwrap_or_default());
    }

    cells
}

/// Export service over persisted bulk execution results.
pub struct ExportService {
    projects: ProjectRepository,
    executions: BulkExecutionRepository,
    rows: BulkRowRepository,
}

impl ExportService {
    pub fn new(
        projects: ProjectRepository,
        executions: BulkExecutionRepository,
        rows: BulkRowRepository,
    ) -> Self {
        Self {
            projects,
            executions,
            rows,
        }
    }

    /// Fetch one persisted body of one row.
    ///
    /// The row must exist; a row that recorded no body yields `{}` so
    /// consumers always receive valid JSON.
    pub async fn row_body(
        &self,
        execution_id: Uuid,
        row_index: i32,
        part: BodyPart,
    ) -> Result<String, EngineError> {
        let row = self
            .rows
            .find_row(execution_id, row_index)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "Row {} of execution {} not found",
                    row_index, execution_id
                ))
            })?;

        let body = match part {
            BodyPart::Request => row.request_body,
            BodyPart::Response => row.response_body,
        };
        Ok(body.unwrap_or_else(|| EMPTY_BODY.to_string()))
    }

    /// Build a ZIP archive with one request and one response file per row.
    pub async fn export_archive(&self, execution_id: Uuid) -> Result<Vec<u8>, EngineError> {
        self.require_execution(execution_id).await?;

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let mut params = export_page_params()?;
        let mut entries = 0usize;
        loop {
            let page = self
                .rows
                .list_page(execution_id, params.limit, params.offset)
                .await?;
            if page.is_empty() {
                break;
            }
            params = params.next();

            for row in &page {
                let stem = entry_stem(row);
                let request = row.request_body.as_deref().unwrap_or(EMPTY_BODY);
                let response = row.response_body.as_deref().unwrap_or(EMPTY_BODY);

                writer
                    .start_file(format!("{}_request.json", stem), options)
                    .map_err(zip_err)?;
                writer.write_all(request.as_bytes()).map_err(io_err)?;

                writer
                    .start_file(format!("{}_response.json", stem), options)
                    .map_err(zip_err)?;
                writer.write_all(response.as_bytes()).map_err(io_err)?;
                entries += 2;
            }
        }

        let cursor = writer.finish().map_err(zip_err)?;
        info!(execution_id = %execution_id, entries = entries, "Result archive built");
        Ok(cursor.into_inner())
    }

    /// Build the annotated result sheet for an execution.
    ///
    /// Expected values come from the project's response template; actual
    /// values are flattened out of each row's recorded response.
    pub async fn annotated_sheet(&self, execution_id: Uuid) -> Result<ExportedSheet, EngineError> {
        let execution = self.require_execution(execution_id).await?;

        let project = self
            .projects
            .find_by_id(execution.project_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("Project {} not found", execution.project_id))
            })?;

        let expected: Vec<(String, String)> = flatten_json(&project.response_template);
        let expected_paths: Vec<String> =
            expected.iter().map(|(path, _)| path.clone()).collect();
        let expected_values: HashMap<String, String> = expected.into_iter().collect();

        let mut sheet = ExportedSheet {
            headers: annotated_headers(&expected_paths),
            rows: Vec::new(),
        };

        let mut params = export_page_params()?;
        loop {
            let page = self
                .rows
                .list_page(execution_id, params.limit, params.offset)
                .await?;
            if page.is_empty() {
                break;
            }
            params = params.next();

            for row in &page {
                sheet
                    .rows
                    .push(annotated_row(row, &expected_paths, &expected_values));
            }
        }

        Ok(sheet)
    }

    async fn require_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<domain::models::BulkExecution, EngineError> {
        self.executions
            .find_by_id(execution_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("Execution {} not found", execution_id))
            })
    }
}

fn export_page_params() -> Result<PageParams, EngineError> {
    PageParams::new(EXPORT_PAGE_SIZE, 0)
        .map_err(|e| EngineError::Internal(format!("Invalid export page size: {}", e)))
}

fn zip_err(e: zip::result::ZipError) -> EngineError {
    EngineError::Internal(format!("Archive write failed: {}", e))
}

fn io_err(e: std::io::Error) -> EngineError {
    EngineError::Internal(format!("Archive write failed: {}", e))
}
