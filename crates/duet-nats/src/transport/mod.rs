//! The job transport contract and its implementations.
//!
//! [`JobTransport`] is everything the control plane needs from the outside
//! world: durable job delivery between planes, the shared job state and the
//! update bus. [`NatsTransport`] implements it on NATS JetStream;
//! [`MemoryTransport`] implements it in process.

mod config;
mod memory;
mod nats_transport;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
pub use config::TransportConfig;
pub use memory::MemoryTransport;
pub use nats_transport::NatsTransport;

use crate::job::{EntryId, JobId, JobState, JobStatus, Progress, StreamEntry};
use crate::{Error, Result, TRACING_TARGET_TRANSPORT};

/// Durable job delivery plus shared job state.
///
/// Implementations know nothing about workflow graphs: job inputs and graph
/// snapshots are opaque serialized JSON.
#[async_trait]
pub trait JobTransport: Send + Sync + 'static {
    /// Appends a job to the stream its task name routes to and initializes
    /// its state (`advertised`, progress `0`).
    ///
    /// Fails with [`Error::UnknownJob`] for unknown task names and surfaces
    /// connectivity errors instead of dropping the job.
    async fn enqueue_job(&self, name: &str, input: &str) -> Result<JobId>;

    /// Reads a job's status and progress, failing with [`Error::NotFound`]
    /// when the job is unknown or expired.
    async fn get_job_state(&self, job_id: JobId) -> Result<JobState>;

    /// Reads the persisted result without waiting.
    async fn job_result(&self, job_id: JobId) -> Result<Option<Value>>;

    /// Reads the latest persisted graph snapshot.
    async fn job_graph(&self, job_id: JobId) -> Result<Option<String>>;

    /// Creates the control stream's consumer group if it does not exist.
    async fn ensure_control_group(&self) -> Result<()>;

    /// Claims at most one pending control-stream entry for `consumer_id`.
    async fn claim_control_entry(&self, consumer_id: &str) -> Result<Option<StreamEntry>>;

    /// Acknowledges a claimed entry so it is never redelivered.
    async fn acknowledge(&self, entry_id: EntryId) -> Result<()>;

    /// Extends the redelivery deadline of an entry still being processed.
    async fn keep_alive(&self, _entry_id: EntryId) -> Result<()> {
        Ok(())
    }

    /// Appends a partially advanced graph to the worker stream under an
    /// existing job id.
    async fn enqueue_worker_job(&self, job_id: JobId, graph: &str) -> Result<EntryId>;

    /// Overwrites the job's graph snapshot.
    async fn set_job_payload(&self, job_id: JobId, graph: &str) -> Result<()>;

    /// Reports a status change on the update bus.
    async fn publish_status(&self, job_id: JobId, status: JobStatus) -> Result<()>;

    /// Reports a progress change on the update bus.
    async fn publish_progress(&self, job_id: JobId, progress: Progress) -> Result<()>;

    /// Reports a result on the update bus.
    async fn publish_data(&self, job_id: JobId, data: Value) -> Result<()>;

    /// Stops background tasks and releases subscriptions. Idempotent.
    async fn teardown(&self) -> Result<()>;

    /// Interval between state reads in [`JobTransport::get_job_result`].
    fn result_poll_interval(&self) -> Duration {
        Duration::from_millis(250)
    }

    /// Waits until the job completes and returns its result.
    ///
    /// Polls [`JobTransport::get_job_state`] on a fixed interval. Fails with
    /// [`Error::JobFailed`] if the job fails and with [`Error::Timeout`] once
    /// `timeout` elapses. Dropping the future cancels the wait.
    async fn get_job_result(&self, job_id: JobId, timeout: Duration) -> Result<Value> {
        let interval = self.result_poll_interval();
        let wait = async {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let state = self.get_job_state(job_id).await?;
                match state.status {
                    JobStatus::Completed => {
                        return Ok(self.job_result(job_id).await?.unwrap_or(Value::Null));
                    }
                    JobStatus::Failed => return Err(Error::JobFailed { job_id }),
                    status => tracing::trace!(
                        target: TRACING_TARGET_TRANSPORT,
                        job_id = %job_id,
                        status = %status,
                        "Job result not yet available"
                    ),
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::timeout(timeout))?
    }
}
