//! Database entity definitions (row mappings).

mod bulk_execution;
mod bulk_row;
mod job_execution;
mod project;

pub use bulk_execution::BulkExecutionEntity;
pub use bulk_row::BulkRowEntity;
pub use job_execution::JobExecutionEntity;
pub use project::ProjectEntity;
