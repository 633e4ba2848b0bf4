//! Executor configuration.

use std::time::Duration;

use anyhow::Context;
use clap::Args;
use duet_runtime::engine::{DEFAULT_MAX_PASSES, ExecutorConfig, ExecutorConfigBuilder};

/// Executor polling settings.
#[derive(Debug, Clone, Args)]
pub struct ExecutorArgs {
    /// Milliseconds between claim attempts on the control stream
    #[arg(long = "poll-interval-ms", env = "EXECUTOR_POLL_INTERVAL_MS", default_value_t = 500)]
    pub poll_interval_ms: u64,

    /// Consumer name within the control group (generated when absent)
    #[arg(long = "consumer-id", env = "EXECUTOR_CONSUMER_ID")]
    pub consumer_id: Option<String>,

    /// Jobs driven at the same time by this executor
    #[arg(long = "max-passes", env = "EXECUTOR_MAX_PASSES", default_value_t = DEFAULT_MAX_PASSES)]
    pub max_passes: usize,
}

impl ExecutorArgs {
    /// Builds the executor configuration.
    pub fn to_config(&self) -> anyhow::Result<ExecutorConfig> {
        let mut builder = ExecutorConfigBuilder::default();
        builder
            .poll_interval(Duration::from_millis(self.poll_interval_ms))
            .max_passes(self.max_passes);
        if let Some(consumer_id) = &self.consumer_id {
            builder.consumer_id(consumer_id.clone());
        }
        builder.build().context("invalid executor configuration")
    }

    pub(super) fn validate(&self) -> anyhow::Result<()> {
        self.to_config().map(drop)
    }
}
