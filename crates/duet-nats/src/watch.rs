//! Read-side job watching.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::job::{JobId, JobState, JobStatus, Progress};
use crate::transport::JobTransport;

/// A state change forwarded to read-side subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "update", rename_all = "camelCase")]
pub struct JobUpdate {
    /// Job the update belongs to.
    pub job_id: JobId,
    /// Current status.
    pub status: JobStatus,
    /// Current progress.
    pub progress: Progress,
}

impl JobUpdate {
    fn new(job_id: JobId, state: JobState) -> Self {
        Self {
            job_id,
            status: state.status,
            progress: state.progress,
        }
    }
}

/// Polls a job's state and yields an update whenever it changes.
///
/// The first poll always yields. The stream ends after a terminal status and
/// ends with an error when the state cannot be read.
pub fn watch_job<T>(
    transport: Arc<T>,
    job_id: JobId,
    interval: Duration,
) -> impl Stream<Item = Result<JobUpdate>> + Send
where
    T: JobTransport + ?Sized,
{
    async_stream::try_stream! {
        let mut ticker = tokio::time::interval(interval);
        let mut last: Option<JobState> = None;

        loop {
            ticker.tick().await;
            let state = transport.get_job_state(job_id).await?;
            if last != Some(state) {
                last = Some(state);
                yield JobUpdate::new(job_id, state);
            }
            if state.status.is_terminal() {
                break;
            }
        }
    }
}
