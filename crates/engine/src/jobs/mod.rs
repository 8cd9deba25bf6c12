//! Background tasks for the worker daemon.

pub mod pool_metrics;
pub mod retry_sweep;
pub mod scheduler;
pub mod token_purge;

pub use pool_metrics::PoolMetricsTask;
pub use retry_sweep::RetrySweepTask;
pub use scheduler::{PeriodicTask, TaskFrequency, TaskScheduler};
pub use token_purge::TokenPurgeTask;
