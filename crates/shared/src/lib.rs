//! Shared utilities for the apiforge workspace.
//!
//! This crate contains:
//! - Hashing helpers (token cache keys)
//! - Pagination parameters for paged repository reads
//! - JSON flattening for spreadsheet export

pub mod flatten;
pub mod hashing;
pub mod pagination;
