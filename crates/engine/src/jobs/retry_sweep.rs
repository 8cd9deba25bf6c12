//! Retry sweep background task.
//!
//! Picks up RETRY_SCHEDULED jobs whose backoff has elapsed and feeds them
//! back into the job engine, and requeues RUNNING jobs orphaned by a
//! crashed worker.

use std::sync::Arc;
use tracing::info;

use crate::services::JobEngine;

use super::scheduler::{PeriodicTask, TaskFrequency};

/// Background task dispatching due job retries.
pub struct RetrySweepTask {
    engine: Arc<JobEngine>,
    poll_secs: u64,
    batch_size: i64,
    stale_job_minutes: i64,
}

impl RetrySweepTask {
    pub fn new(
        engine: Arc<JobEngine>,
        poll_secs: u64,
        batch_size: i64,
        stale_job_minutes: i64,
    ) -> Self {
        Self {
            engine,
            poll_secs,
            batch_size,
            stale_job_minutes,
        }
    }
}

#[async_trait::async_trait]
impl PeriodicTask for RetrySweepTask {
    fn name(&self) -> &'static str {
        "retry_sweep"
    }

    fn frequency(&self) -> TaskFrequency {
        TaskFrequency::Seconds(self.poll_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        self.engine
            .reset_stale_jobs(self.stale_job_minutes)
            .await
            .map_err(|e| format!("Failed to reset stale jobs: {}", e))?;

        let dispatched = self
            .engine
            .process_due_retries(self.batch_size)
            .await
            .map_err(|e| format!("Failed to process due retries: {}", e))?;

        if dispatched > 0 {
            info!(
                dispatched = dispatched,
                batch_size = self.batch_size,
                "Dispatched due job retries"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_frequency_follows_config() {
        let freq = TaskFrequency::Seconds(60);
        assert_eq!(freq.duration(), Duration::from_secs(60));
    }
}
