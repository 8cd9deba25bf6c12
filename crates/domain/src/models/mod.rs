//! Domain model definitions.

mod bulk_execution;
mod job_execution;
mod project;
mod sheet;

pub use bulk_execution::{
    BulkExecution, BulkExecutionHandle, BulkExecutionRequest, BulkExecutionStatus, BulkRowResult,
    ConversionMode, ProgressCounters,
};
pub use job_execution::{
    retry_delay_minutes, JobErrorDetail, JobExecution, JobProgress, JobStatus, JobType,
    MAX_RETRY_DELAY_MINUTES,
};
pub use project::{AuthDescriptor, EndpointMeta, Project, ProjectMeta, ProjectType};
pub use sheet::{Cell, CellTypeHint, GridCell, NativeCellKind, RowRecord, SheetData, SheetGrid};
