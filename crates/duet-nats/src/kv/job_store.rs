//! Typed access to the job state bucket.

use std::time::Duration;

use async_nats::jetstream::{self, kv};
use serde_json::Value;

use super::{JobKey, JobsBucket, KvBucket};
use crate::job::{JobId, JobRecord, JobState, JobStatus, Progress};
use crate::{Error, Result, TRACING_TARGET_KV};

/// Job state store backed by a NATS KV bucket.
///
/// Every write re-puts the value, which also restarts its TTL.
#[derive(Clone)]
pub struct JobStateStore {
    store: kv::Store,
    ttl: Duration,
}

impl JobStateStore {
    /// Opens the jobs bucket, creating it with the given TTL if missing.
    #[tracing::instrument(skip(jetstream), target = TRACING_TARGET_KV)]
    pub async fn new(jetstream: &jetstream::Context, ttl: Duration) -> Result<Self> {
        let store = match jetstream.get_key_value(JobsBucket::NAME).await {
            Ok(store) => {
                tracing::debug!(
                    target: TRACING_TARGET_KV,
                    bucket = %JobsBucket::NAME,
                    "Using existing KV bucket"
                );
                store
            }
            Err(_) => {
                tracing::debug!(
                    target: TRACING_TARGET_KV,
                    bucket = %JobsBucket::NAME,
                    ttl_secs = ttl.as_secs(),
                    "Creating new KV bucket"
                );
                jetstream
                    .create_key_value(kv::Config {
                        bucket: JobsBucket::NAME.to_string(),
                        description: JobsBucket::DESCRIPTION.to_string(),
                        max_age: ttl,
                        history: 1,
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| Error::operation("kv_create", e.to_string()))?
            }
        };

        Ok(Self { store, ttl })
    }

    /// Returns the retention window applied to job keys.
    #[inline]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn put_raw(&self, key: JobKey, bytes: Vec<u8>) -> Result<u64> {
        let key_str = key.to_string();
        let size = bytes.len();
        let revision = self
            .store
            .put(&key_str, bytes.into())
            .await
            .map_err(|e| Error::operation("kv_put", e.to_string()))?;

        tracing::trace!(
            target: TRACING_TARGET_KV,
            key = %key_str,
            revision = revision,
            size_bytes = size,
            "Put value to KV store"
        );
        Ok(revision)
    }

    async fn get_raw(&self, key: JobKey) -> Result<Option<Vec<u8>>> {
        let key_str = key.to_string();
        self.store
            .get(&key_str)
            .await
            .map(|value| value.map(|bytes| bytes.to_vec()))
            .map_err(|e| Error::operation("kv_get", e.to_string()))
    }

    /// Writes the record and the initial `advertised` state of a new job.
    #[tracing::instrument(skip(self, record), target = TRACING_TARGET_KV)]
    pub async fn create(&self, job_id: JobId, record: &JobRecord) -> Result<()> {
        self.put_raw(JobKey::Record(job_id), serde_json::to_vec(record)?)
            .await?;
        self.put_status(job_id, JobStatus::Advertised).await?;
        self.put_progress(job_id, Progress::ZERO).await?;
        Ok(())
    }

    /// Reads the job record.
    pub async fn record(&self, job_id: JobId) -> Result<Option<JobRecord>> {
        match self.get_raw(JobKey::Record(job_id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Reads the job's status and progress.
    ///
    /// Fails with [`Error::NotFound`] when no status was ever written or it expired.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_KV)]
    pub async fn state(&self, job_id: JobId) -> Result<JobState> {
        let status = self
            .get_raw(JobKey::Status(job_id))
            .await?
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|text| text.parse::<JobStatus>().ok())
            .ok_or_else(|| Error::not_found(job_id))?;

        let progress = self
            .get_raw(JobKey::Progress(job_id))
            .await?
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|text| Progress::parse(&text))
            .unwrap_or(Progress::ZERO);

        Ok(JobState::new(status, progress.value()))
    }

    /// Writes a status unconditionally.
    pub async fn put_status(&self, job_id: JobId, status: JobStatus) -> Result<()> {
        self.put_raw(JobKey::Status(job_id), status.as_ref().as_bytes().to_vec())
            .await
            .map(drop)
    }

    /// Writes a progress value unconditionally.
    pub async fn put_progress(&self, job_id: JobId, progress: Progress) -> Result<()> {
        self.put_raw(JobKey::Progress(job_id), progress.value().to_string().into_bytes())
            .await
            .map(drop)
    }

    /// Applies a status update if it keeps status monotonic.
    ///
    /// Returns whether the update was stored. Updates for unknown or expired
    /// jobs are dropped. The job record is re-put so it expires together with
    /// its state.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_KV)]
    pub async fn apply_status(&self, job_id: JobId, status: JobStatus) -> Result<bool> {
        if !admits(self.state(job_id).await, |current| current.accepts_status(status))? {
            return Ok(false);
        }

        self.put_status(job_id, status).await?;
        if let Some(record) = self.get_raw(JobKey::Record(job_id)).await? {
            self.put_raw(JobKey::Record(job_id), record).await?;
        }
        Ok(true)
    }

    /// Applies a progress update if the current state accepts it.
    ///
    /// Updates for unknown or expired jobs are dropped.
    pub async fn apply_progress(&self, job_id: JobId, value: f64) -> Result<bool> {
        if !admits(self.state(job_id).await, |current| current.accepts_progress(value))? {
            return Ok(false);
        }

        self.put_progress(job_id, Progress::raw(value)).await?;
        Ok(true)
    }

    /// Stores the job result.
    pub async fn put_data(&self, job_id: JobId, data: &Value) -> Result<()> {
        self.put_raw(JobKey::Data(job_id), serde_json::to_vec(data)?)
            .await
            .map(drop)
    }

    /// Reads the job result.
    pub async fn data(&self, job_id: JobId) -> Result<Option<Value>> {
        match self.get_raw(JobKey::Data(job_id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Stores the latest graph snapshot.
    pub async fn put_graph(&self, job_id: JobId, graph: &str) -> Result<()> {
        self.put_raw(JobKey::Graph(job_id), graph.as_bytes().to_vec())
            .await
            .map(drop)
    }

    /// Reads the latest graph snapshot.
    pub async fn graph(&self, job_id: JobId) -> Result<Option<String>> {
        Ok(self
            .get_raw(JobKey::Graph(job_id))
            .await?
            .and_then(|bytes| String::from_utf8(bytes).ok()))
    }
}

/// Decides whether an update may be written over the current state.
///
/// A missing state means the job is unknown or expired; writing would
/// resurrect it as a partial key set, so the update is dropped.
fn admits(current: Result<JobState>, accepts: impl FnOnce(&JobState) -> bool) -> Result<bool> {
    match current {
        Ok(current) => Ok(accepts(&current)),
        Err(err) if err.is_not_found() => {
            tracing::debug!(
                target: TRACING_TARGET_KV,
                error = %err,
                "Dropped update for unknown job"
            );
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

impl std::fmt::Debug for JobStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStateStore")
            .field("bucket", &JobsBucket::NAME)
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_for_unknown_jobs_are_dropped() {
        let missing = || Err(Error::not_found(JobId::new()));
        assert!(!admits(missing(), |state| state.accepts_status(JobStatus::Running)).unwrap());
        assert!(!admits(missing(), |state| state.accepts_progress(0.5)).unwrap());
    }

    #[test]
    fn updates_follow_the_current_state() {
        let running = || Ok(JobState::new(JobStatus::Running, 0.4));
        assert!(admits(running(), |state| state.accepts_status(JobStatus::Completed)).unwrap());
        assert!(!admits(running(), |state| state.accepts_status(JobStatus::Queued)).unwrap());
        assert!(admits(running(), |state| state.accepts_progress(0.6)).unwrap());
        assert!(!admits(running(), |state| state.accepts_progress(0.2)).unwrap());
    }

    #[test]
    fn read_failures_are_propagated() {
        let failed = Err(Error::operation("kv_get", "connection reset"));
        assert!(admits(failed, |_| true).is_err());
    }
}
