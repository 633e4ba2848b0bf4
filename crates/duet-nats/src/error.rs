//! Error types and utilities for job transport operations.

use std::time::Duration;

use crate::job::JobId;

/// Result type for all transport operations in this crate.
///
/// This is a convenience type alias that defaults to using [`Error`] as the error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Unified error type for job transport operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// NATS client/connection errors
    #[error("NATS connection error: {0}")]
    Connection(#[source] async_nats::Error),

    /// Serialization errors when sending or receiving payloads
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The task name does not map to any job stream
    #[error("Unknown job name '{name}'")]
    UnknownJob { name: String },

    /// No state exists for the job (never created or expired)
    #[error("Job '{job_id}' not found")]
    NotFound { job_id: JobId },

    /// The transport was used before it was initialized or after teardown
    #[error("Job transport is not initialized")]
    Uninitialized,

    /// The job reached the failed status while a caller waited for its result
    #[error("Job '{job_id}' failed")]
    JobFailed { job_id: JobId },

    /// Operation timeout
    #[error("Operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Message delivery failed
    #[error("Message delivery failed to subject '{subject}': {reason}")]
    DeliveryFailed { subject: String, reason: String },

    /// Stream operation failed
    #[error("Stream operation failed on '{stream}': {error}")]
    StreamError { stream: String, error: String },

    /// Consumer operation failed
    #[error("Consumer '{consumer}' error: {reason}")]
    ConsumerError { consumer: String, reason: String },

    /// Invalid configuration
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Generic operation error with context
    #[error("NATS operation failed: {operation} - {details}")]
    Operation { operation: String, details: String },
}

impl Error {
    /// Create a connection error from any NATS client error.
    pub fn connection(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Connection(Box::new(error))
    }

    /// Create a delivery failed error
    pub fn delivery_failed(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeliveryFailed {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Create a stream error
    pub fn stream_error(stream: impl Into<String>, error: impl Into<String>) -> Self {
        Self::StreamError {
            stream: stream.into(),
            error: error.into(),
        }
    }

    /// Create a consumer error
    pub fn consumer_error(consumer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConsumerError {
            consumer: consumer.into(),
            reason: reason.into(),
        }
    }

    /// Create an operation error with context
    pub fn operation(op: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Operation {
            operation: op.into(),
            details: details.into(),
        }
    }

    /// Create an unknown job name error
    pub fn unknown_job(name: impl Into<String>) -> Self {
        Self::UnknownJob { name: name.into() }
    }

    /// Create a not found error for the job
    pub fn not_found(job_id: JobId) -> Self {
        Self::NotFound { job_id }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a timeout error with the given duration
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { timeout: duration }
    }

    /// Returns true when the job state is absent rather than merely incomplete.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Returns true for transient failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::Timeout { .. }
                | Error::DeliveryFailed { .. }
                | Error::StreamError { .. }
        )
    }

    /// Get a user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            Error::Connection(_) => {
                "Connection to NATS server failed. Please check your connection.".to_string()
            }
            Error::Timeout { timeout } => {
                format!("Operation timed out after {:?}. Please try again.", timeout)
            }
            Error::NotFound { job_id } => format!("Job '{}' not found.", job_id),
            Error::UnknownJob { name } => format!("Unknown job '{}'.", name),
            Error::JobFailed { job_id } => format!("Job '{}' failed.", job_id),
            Error::Serialization(_) => "Data format error. Please check your input.".to_string(),
            Error::InvalidConfig { reason } => format!("Configuration error: {}", reason),
            Error::Uninitialized => "Job transport is not available.".to_string(),
            _ => "An unexpected error occurred. Please try again.".to_string(),
        }
    }
}
