//! Spreadsheet grid input and the parsed row model.
//!
//! The file I/O layer (out of scope here) maps an uploaded workbook to a
//! [`SheetGrid`]; parsing turns that grid into [`SheetData`], which is
//! copied into the job payload so execution never re-reads the file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Native cell kind as reported by the underlying workbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeCellKind {
    Text,
    /// Numeric cell; `formatted_as_date` is set when the cell's number
    /// format renders it as a date (the grid producer supplies the value
    /// already ISO-8601 formatted in that case).
    Numeric { formatted_as_date: bool },
    Boolean,
    Formula,
    Blank,
}

/// One cell of the raw input grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridCell {
    pub value: String,
    pub kind: NativeCellKind,
    /// Indexed fill color, when the workbook reports one.
    pub fill_color: Option<u16>,
}

impl GridCell {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: NativeCellKind::Text,
            fill_color: None,
        }
    }

    pub fn numeric(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: NativeCellKind::Numeric {
                formatted_as_date: false,
            },
            fill_color: None,
        }
    }

    pub fn with_fill_color(mut self, color: u16) -> Self {
        self.fill_color = Some(color);
        self
    }
}

/// Two-dimensional input grid; row 0 is the header row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SheetGrid {
    pub rows: Vec<Vec<Option<GridCell>>>,
}

/// Type hint captured for each parsed cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CellTypeHint {
    String,
    Numeric,
    Boolean,
    Date,
    Blank,
    Formula,
}

impl CellTypeHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::Numeric => "NUMERIC",
            Self::Boolean => "BOOLEAN",
            Self::Date => "DATE",
            Self::Blank => "BLANK",
            Self::Formula => "FORMULA",
        }
    }
}

/// One parsed spreadsheet value with its hint and exclusion flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub value: String,
    pub excluded: bool,
    pub type_hint: CellTypeHint,
}

impl Cell {
    pub fn new(value: impl Into<String>, type_hint: CellTypeHint) -> Self {
        Self {
            value: value.into(),
            excluded: false,
            type_hint,
        }
    }
}

/// One data row reduced to a header→cell mapping plus its original index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowRecord {
    /// Index in the original grid (header row is 0, first data row is 1).
    pub row_index: usize,
    pub cells: HashMap<String, Cell>,
}

impl RowRecord {
    /// Cell lookup by header name.
    pub fn cell(&self, header: &str) -> Option<&Cell> {
        self.cells.get(header)
    }

    /// Trimmed cell value by header name, if present and non-empty.
    pub fn value(&self, header: &str) -> Option<&str> {
        self.cells
            .get(header)
            .map(|c| c.value.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Parsed spreadsheet: ordered headers, valid rows, skipped row indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetData {
    pub headers: Vec<String>,
    pub valid_rows: Vec<RowRecord>,
    pub skipped_rows: Vec<usize>,
}
