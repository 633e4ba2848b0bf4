//! Job transport configuration.

use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::RetryConfig;

/// Settings shared by the transport implementations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct TransportConfig {
    /// Consumer group reading the control stream
    #[cfg_attr(
        feature = "config",
        arg(long = "control-group", env = "DUET_CONTROL_GROUP", default_value = "control-executor")
    )]
    pub control_group: String,

    /// Seconds before an unacknowledged entry is redelivered
    #[cfg_attr(
        feature = "config",
        arg(long = "ack-wait-secs", env = "DUET_ACK_WAIT_SECS", default_value_t = 300)
    )]
    pub ack_wait_secs: u64,

    /// Retention window of job state and stream entries, in seconds
    #[cfg_attr(
        feature = "config",
        arg(long = "job-ttl-secs", env = "DUET_JOB_TTL_SECS", default_value_t = 86_400)
    )]
    pub job_ttl_secs: u64,

    /// Interval between state reads while waiting for a job result, in milliseconds
    #[cfg_attr(
        feature = "config",
        arg(long = "result-poll-ms", env = "DUET_RESULT_POLL_MS", default_value_t = 250)
    )]
    pub result_poll_ms: u64,

    /// Retries of a failed durable enqueue before the error is surfaced
    #[cfg_attr(
        feature = "config",
        arg(long = "enqueue-retries", env = "DUET_ENQUEUE_RETRIES", default_value_t = 3)
    )]
    pub enqueue_retries: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            control_group: "control-executor".to_string(),
            ack_wait_secs: 300,
            job_ttl_secs: 24 * 60 * 60,
            result_poll_ms: 250,
            enqueue_retries: 3,
        }
    }
}

impl TransportConfig {
    /// Returns the redelivery deadline.
    #[inline]
    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.ack_wait_secs)
    }

    /// Returns the retention window.
    #[inline]
    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }

    /// Returns the result polling interval.
    #[inline]
    pub fn result_poll_interval(&self) -> Duration {
        Duration::from_millis(self.result_poll_ms)
    }

    /// Returns the retry policy for durable enqueues.
    pub fn enqueue_retry(&self) -> RetryConfig {
        RetryConfig::new(self.enqueue_retries, Duration::from_millis(100))
    }

    /// Set the control consumer group.
    #[must_use]
    pub fn with_control_group(mut self, group: impl Into<String>) -> Self {
        self.control_group = group.into();
        self
    }

    /// Set the ack-wait in seconds.
    #[must_use]
    pub fn with_ack_wait_secs(mut self, secs: u64) -> Self {
        self.ack_wait_secs = secs;
        self
    }

    /// Set the retention window in seconds.
    #[must_use]
    pub fn with_job_ttl_secs(mut self, secs: u64) -> Self {
        self.job_ttl_secs = secs;
        self
    }

    /// Validate the configuration and return any issues.
    pub fn validate(&self) -> Result<(), String> {
        if self.control_group.trim().is_empty() {
            return Err("Control consumer group cannot be empty".to_string());
        }
        if self.control_group.contains(['.', '*', '>', ' ']) {
            return Err(format!("Invalid consumer group name: {}", self.control_group));
        }
        if self.job_ttl_secs == 0 {
            return Err("Job TTL must be positive".to_string());
        }
        if self.result_poll_ms == 0 {
            return Err("Result poll interval must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.control_group, "control-executor");
        assert_eq!(config.job_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.result_poll_interval(), Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation() {
        assert!(TransportConfig::default().with_control_group("").validate().is_err());
        assert!(
            TransportConfig::default()
                .with_control_group("control.executor")
                .validate()
                .is_err()
        );
        assert!(TransportConfig::default().with_job_ttl_secs(0).validate().is_err());
    }
}
