//! Tabular input parser: turns a raw sheet grid into typed row records.

use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

use crate::models::{Cell, CellTypeHint, GridCell, NativeCellKind, RowRecord, SheetData, SheetGrid};

/// Column that flags a row as skipped.
pub const SKIP_COLUMN: &str = "Skip Case(Y/N)";

/// Indexed fill colors that mark a cell as excluded (red, yellow).
pub const DEFAULT_EXCLUSION_COLORS: [u16; 2] = [10, 13];

/// Errors raised while parsing a sheet grid.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Fill-color based cell exclusion rule.
#[derive(Debug, Clone)]
pub struct ColorExclusionRule {
    pub excluded_colors: HashSet<u16>,
}

impl Default for ColorExclusionRule {
    fn default() -> Self {
        Self {
            excluded_colors: DEFAULT_EXCLUSION_COLORS.into_iter().collect(),
        }
    }
}

impl ColorExclusionRule {
    fn excludes(&self, cell: &GridCell) -> bool {
        cell.fill_color
            .map(|c| self.excluded_colors.contains(&c))
            .unwrap_or(false)
    }
}

/// Parser configuration.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Evaluate fill-color exclusion; cells keep `excluded = false` when unset.
    pub color_exclusion: Option<ColorExclusionRule>,
}

/// Parses a grid into headers, valid rows and skipped row indices.
///
/// Row 0 is the header row; a missing header cell yields a synthetic
/// `ColumnN` name (1-based). Rows whose skip cell reads `y`/`yes`
/// (case-insensitive, trimmed) land in `skipped_rows` and nowhere else.
pub fn parse_sheet(grid: &SheetGrid, options: &ParseOptions) -> Result<SheetData, ParseError> {
    if grid.rows.len() < 2 {
        return Err(ParseError::Validation(
            "Spreadsheet must contain a header row and at least one data row".to_string(),
        ));
    }

    let headers = derive_header_names(&grid.rows[0]);
    let skip_column = headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(SKIP_COLUMN));

    let mut valid_rows = Vec::new();
    let mut skipped_rows = Vec::new();

    for (row_index, row) in grid.rows.iter().enumerate().skip(1) {
        if let Some(skip_idx) = skip_column {
            if row
                .get(skip_idx)
                .and_then(|c| c.as_ref())
                .map(|c| is_skip_flag(&c.value))
                .unwrap_or(false)
            {
                skipped_rows.push(row_index);
                continue;
            }
        }

        let mut cells = HashMap::with_capacity(headers.len());
        for (col_index, header) in headers.iter().enumerate() {
            if Some(col_index) == skip_column {
                continue;
            }
            let cell = match row.get(col_index).and_then(|c| c.as_ref()) {
                Some(grid_cell) => build_cell(grid_cell, options),
                None => Cell::new("", CellTypeHint::Blank),
            };
            cells.insert(header.clone(), cell);
        }

        valid_rows.push(RowRecord { row_index, cells });
    }

    debug!(
        valid = valid_rows.len(),
        skipped = skipped_rows.len(),
        "Parsed sheet grid"
    );

    Ok(SheetData {
        headers,
        valid_rows,
        skipped_rows,
    })
}

/// Render parsed rows back into plain string rows in header order.
///
/// Cells a row never carried (including its skip-column slot) come back as
/// empty strings, so every row has one value per header.
pub fn sheet_rows(sheet: &SheetData) -> Vec<Vec<String>> {
    sheet
        .valid_rows
        .iter()
        .map(|record| {
            sheet
                .headers
                .iter()
                .map(|header| {
                    record
                        .cells
                        .get(header)
                        .map(|cell| cell.value.clone())
                        .unwrap_or_default()
                })
                .collect()
        })
        .collect()
}

fn derive_header_names(header_row: &[Option<GridCell>]) -> Vec<String> {
    header_row
        .iter()
        .enumerate()
        .map(|(idx, cell)| {
            cell.as_ref()
                .map(|c| c.value.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Column{}", idx + 1))
        })
        .collect()
}

fn is_skip_flag(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.eq_ignore_ascii_case("y") || trimmed.eq_ignore_ascii_case("yes")
}

fn build_cell(grid_cell: &GridCell, options: &ParseOptions) -> Cell {
    let type_hint = match grid_cell.kind {
        NativeCellKind::Text => CellTypeHint::String,
        NativeCellKind::Numeric { formatted_as_date } => {
            if formatted_as_date {
                CellTypeHint::Date
            } else {
                CellTypeHint::Numeric
            }
        }
        NativeCellKind::Boolean => CellTypeHint::Boolean,
        NativeCellKind::Formula => CellTypeHint::Formula,
        NativeCellKind::Blank => CellTypeHint::Blank,
    };

    let excluded = options
        .color_exclusion
        .as_ref()
        .map(|rule| rule.excludes(grid_cell))
        .unwrap_or(false);

    Cell {
        value: grid_cell.value.clone(),
        excluded,
        type_hint,
    }
}
