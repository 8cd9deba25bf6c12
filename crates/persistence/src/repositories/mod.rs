//! Repository layer for database operations.

mod bulk_execution;
mod bulk_row;
mod job_execution;
mod project;

pub use bulk_execution::BulkExecutionRepository;
pub use bulk_row::BulkRowRepository;
pub use job_execution::JobExecutionRepository;
pub use project::ProjectRepository;
