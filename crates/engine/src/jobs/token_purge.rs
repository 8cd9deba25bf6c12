//! Token cache purge background task.

use std::sync::Arc;

use crate::services::TokenCache;

use super::scheduler::{PeriodicTask, TaskFrequency};

/// Periodically evicts expired auth tokens from the cache.
pub struct TokenPurgeTask {
    cache: Arc<TokenCache>,
}

impl TokenPurgeTask {
    pub fn new(cache: Arc<TokenCache>) -> Self {
        Self { cache }
    }
}

#[async_trait::async_trait]
impl PeriodicTask for TokenPurgeTask {
    fn name(&self) -> &'static str {
        "token_purge"
    }

    fn frequency(&self) -> TaskFrequency {
        TaskFrequency::Minutes(10)
    }

    async fn execute(&self) -> Result<(), String> {
        self.cache.purge_expired().await;
        Ok(())
    }
}
