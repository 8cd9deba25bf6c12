//! Engine services.

pub mod bulk_execution;
pub mod export;
pub mod http_client;
pub mod job_engine;
pub mod token_cache;

pub use bulk_execution::BulkExecutionService;
pub use export::ExportService;
pub use http_client::HttpDispatcher;
pub use job_engine::JobEngine;
pub use token_cache::TokenCache;
