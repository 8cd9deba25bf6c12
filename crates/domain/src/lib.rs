//! Domain layer for the apiforge platform.
//!
//! This crate contains:
//! - Domain models (Project, BulkExecution, JobExecution, SheetData)
//! - The tabular input parser
//! - The template coercion engine
//! - Structural XML/JSON conversion

pub mod models;
pub mod services;
