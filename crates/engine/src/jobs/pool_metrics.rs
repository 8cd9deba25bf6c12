//! Connection pool metrics background task.

use persistence::metrics::record_pool_metrics;
use sqlx::PgPool;

use super::scheduler::{PeriodicTask, TaskFrequency};

/// Periodically samples the database pool into gauges.
pub struct PoolMetricsTask {
    pool: PgPool,
}

impl PoolMetricsTask {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PeriodicTask for PoolMetricsTask {
    fn name(&self) -> &'static str {
        "pool_metrics"
    }

    fn frequency(&self) -> TaskFrequency {
        TaskFrequency::Seconds(30)
    }

    async fn execute(&self) -> Result<(), String> {
        record_pool_metrics(&self.pool);
        Ok(())
    }
}
