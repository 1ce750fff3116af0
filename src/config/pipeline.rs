//! Retry and timeout policy for pipeline invocations

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Orchestrator retry policy and store call bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Total attempts per step on transient failures (2 = one retry)
    pub max_attempts: u32,
    /// Pause before retrying a failed step
    pub retry_backoff_ms: u64,
    /// Upper bound on a single rating store call
    pub store_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            retry_backoff_ms: 50,
            store_timeout_ms: 2000,
        }
    }
}

impl PipelineConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("Pipeline max attempts must be at least 1"));
        }
        if self.store_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Store timeout must be greater than 0"));
        }
        Ok(())
    }
}
