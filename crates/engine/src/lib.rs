//! Execution engine for the Apiforge platform.
//!
//! This crate contains:
//! - The durable job engine and its background scheduler
//! - The bulk execution orchestrator
//! - HTTP dispatch with auth token caching
//! - Result export (archives and annotated sheets)

pub mod config;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod services;
