//! Executor configuration.

use std::time::Duration;

use derive_builder::Builder;
use uuid::Uuid;

/// Default interval between claim attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default number of passes one executor drives at a time.
pub const DEFAULT_MAX_PASSES: usize = 4;

/// Configuration of the control-plane executor.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ExecutorConfig {
    /// Interval between claim attempts.
    #[builder(default = "DEFAULT_POLL_INTERVAL")]
    pub poll_interval: Duration,

    /// Consumer name this executor claims entries under.
    #[builder(default = "default_consumer_id()")]
    pub consumer_id: String,

    /// Passes driven concurrently; no entry is claimed while all are busy.
    #[builder(default = "DEFAULT_MAX_PASSES")]
    pub max_passes: usize,
}

fn default_consumer_id() -> String {
    format!("executor-{}", Uuid::new_v4())
}

impl ExecutorConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(interval) = self.poll_interval
            && interval.is_zero()
        {
            return Err("poll_interval must be greater than zero".into());
        }
        if let Some(consumer_id) = &self.consumer_id
            && consumer_id.trim().is_empty()
        {
            return Err("consumer_id cannot be empty".into());
        }
        if self.max_passes == Some(0) {
            return Err("max_passes must be greater than zero".into());
        }
        Ok(())
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            consumer_id: default_consumer_id(),
            max_passes: DEFAULT_MAX_PASSES,
        }
    }
}
