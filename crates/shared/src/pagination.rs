//! Offset-based pagination for paged repository reads.

use serde::Deserialize;
use thiserror::Error;

/// Default page size when none is supplied.
pub const DEFAULT_PAGE_SIZE: i64 = 100;

/// Upper bound on page size; larger requests are rejected, not clamped.
pub const MAX_PAGE_SIZE: i64 = 1000;

/// Error type for pagination parameters.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("Page size must be between 1 and {MAX_PAGE_SIZE}, got {0}")]
    InvalidSize(i64),
    #[error("Offset must be non-negative, got {0}")]
    InvalidOffset(i64),
}

/// Validated limit/offset pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PageParams {
    pub limit: i64,
    pub offset: i64,
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl PageParams {
    /// Build validated pagination parameters.
    pub fn new(limit: i64, offset: i64) -> Result<Self, PageError> {
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(PageError::InvalidSize(limit));
        }
        if offset < 0 {
            return Err(PageError::InvalidOffset(offset));
        }
        Ok(Self { limit, offset })
    }

    /// Parameters for the page following this one.
    pub fn next(&self) -> Self {
        Self {
            limit: self.limit,
            offset: self.offset + self.limit,
        }
    }
}
