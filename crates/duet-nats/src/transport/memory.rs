//! In-process job transport.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{JobTransport, TransportConfig};
use crate::job::{
    EntryId, JobEntry, JobId, JobName, JobRecord, JobState, JobStatus, Progress, StreamEntry,
    created_now,
};
use crate::stream::StreamKind;
use crate::{Error, Result, TRACING_TARGET_TRANSPORT};

/// Job transport kept entirely in process memory.
///
/// Mirrors the broker-backed transport: entries wait on per-stream queues,
/// claimed entries stay pending until acknowledged and are redelivered once
/// the ack-wait elapses, job state expires after the TTL, and published
/// updates are persisted with the same monotonicity rules.
#[derive(Debug)]
pub struct MemoryTransport {
    config: TransportConfig,
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    torn_down: bool,
    next_entry: u64,
    streams: HashMap<StreamKind, VecDeque<(EntryId, JobEntry, u64)>>,
    pending: HashMap<EntryId, PendingEntry>,
    jobs: HashMap<JobId, MemoryJob>,
}

#[derive(Debug)]
struct PendingEntry {
    entry: JobEntry,
    stream: StreamKind,
    delivered: u64,
    deadline: Instant,
}

#[derive(Debug)]
struct MemoryJob {
    record: JobRecord,
    status: JobStatus,
    progress: f64,
    data: Option<Value>,
    graph: Option<String>,
    expires_at: Instant,
}

impl MemoryState {
    fn ready(&self) -> Result<()> {
        if self.torn_down {
            Err(Error::Uninitialized)
        } else {
            Ok(())
        }
    }

    fn next_entry_id(&mut self) -> EntryId {
        self.next_entry += 1;
        EntryId::from(self.next_entry)
    }

    fn push(&mut self, stream: StreamKind, entry: JobEntry) -> EntryId {
        let entry_id = self.next_entry_id();
        self.streams
            .entry(stream)
            .or_default()
            .push_back((entry_id, entry, 0));
        entry_id
    }

    fn live_job(&mut self, job_id: JobId) -> Result<&mut MemoryJob> {
        let now = Instant::now();
        if self.jobs.get(&job_id).is_some_and(|job| job.expires_at <= now) {
            self.jobs.remove(&job_id);
        }
        self.jobs.get_mut(&job_id).ok_or_else(|| Error::not_found(job_id))
    }

    /// Moves expired pending entries back to the head of their stream.
    fn redeliver_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<EntryId> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(entry_id, _)| *entry_id)
            .collect();

        for entry_id in expired {
            if let Some(pending) = self.pending.remove(&entry_id) {
                tracing::debug!(
                    target: TRACING_TARGET_TRANSPORT,
                    entry_id = %entry_id,
                    delivered = pending.delivered,
                    "Redelivering unacknowledged entry"
                );
                self.streams.entry(pending.stream).or_default().push_front((
                    entry_id,
                    pending.entry,
                    pending.delivered,
                ));
            }
        }
    }
}

impl MemoryTransport {
    /// Creates an empty transport.
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Returns the transport configuration.
    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Appends a raw entry to a stream, bypassing task-name routing.
    ///
    /// Used to feed malformed or foreign entries to a consumer.
    pub async fn push_entry(&self, stream: StreamKind, entry: JobEntry) -> Result<EntryId> {
        let mut state = self.state.lock().await;
        state.ready()?;
        Ok(state.push(stream, entry))
    }

    /// Returns the entries waiting on a stream, oldest first.
    pub async fn stream_entries(&self, stream: StreamKind) -> Vec<JobEntry> {
        self.state
            .lock()
            .await
            .streams
            .get(&stream)
            .map(|queue| queue.iter().map(|(_, entry, _)| entry.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of claimed but unacknowledged entries.
    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Claims at most one entry from any stream.
    pub async fn claim_entry(&self, stream: StreamKind, consumer_id: &str) -> Result<Option<StreamEntry>> {
        let mut state = self.state.lock().await;
        state.ready()?;
        state.redeliver_expired();

        let Some((entry_id, entry, delivered)) =
            state.streams.get_mut(&stream).and_then(VecDeque::pop_front)
        else {
            return Ok(None);
        };

        let delivered = delivered + 1;
        state.pending.insert(entry_id, PendingEntry {
            entry: entry.clone(),
            stream,
            delivered,
            deadline: Instant::now() + self.config.ack_wait(),
        });

        tracing::debug!(
            target: TRACING_TARGET_TRANSPORT,
            stream = %stream,
            consumer_id = %consumer_id,
            entry_id = %entry_id,
            delivered = delivered,
            "Claimed entry"
        );

        Ok(Some(StreamEntry {
            entry_id,
            delivered,
            entry,
        }))
    }

    fn refresh(&self, job: &mut MemoryJob) {
        job.expires_at = Instant::now() + self.config.job_ttl();
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

#[async_trait]
impl JobTransport for MemoryTransport {
    async fn enqueue_job(&self, name: &str, input: &str) -> Result<JobId> {
        let job_name = JobName::parse(name)?;
        let mut state = self.state.lock().await;
        state.ready()?;

        let job_id = JobId::new();
        let created = created_now();
        let graph = (job_name == JobName::ProcessGraph).then(|| input.to_string());
        state.jobs.insert(job_id, MemoryJob {
            record: JobRecord {
                name: job_name.to_string(),
                input: input.to_string(),
                created: created.clone(),
            },
            status: JobStatus::Advertised,
            progress: 0.0,
            data: None,
            graph,
            expires_at: Instant::now() + self.config.job_ttl(),
        });

        let entry = JobEntry::new(job_id, job_name, created, input.to_string());
        let entry_id = state.push(job_name.stream(), entry);

        tracing::debug!(
            target: TRACING_TARGET_TRANSPORT,
            job_id = %job_id,
            job_name = %job_name,
            entry_id = %entry_id,
            "Job enqueued"
        );
        Ok(job_id)
    }

    async fn get_job_state(&self, job_id: JobId) -> Result<JobState> {
        let mut state = self.state.lock().await;
        state.ready()?;
        let job = state.live_job(job_id)?;
        Ok(JobState::new(job.status, job.progress))
    }

    async fn job_result(&self, job_id: JobId) -> Result<Option<Value>> {
        let mut state = self.state.lock().await;
        state.ready()?;
        Ok(state.live_job(job_id)?.data.clone())
    }

    async fn job_graph(&self, job_id: JobId) -> Result<Option<String>> {
        let mut state = self.state.lock().await;
        state.ready()?;
        Ok(state.live_job(job_id)?.graph.clone())
    }

    async fn ensure_control_group(&self) -> Result<()> {
        self.state.lock().await.ready()
    }

    async fn claim_control_entry(&self, consumer_id: &str) -> Result<Option<StreamEntry>> {
        self.claim_entry(StreamKind::Control, consumer_id).await
    }

    async fn acknowledge(&self, entry_id: EntryId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ready()?;
        state.pending.remove(&entry_id).map(drop).ok_or_else(|| {
            Error::consumer_error(
                &self.config.control_group,
                format!("entry {entry_id} is not in flight"),
            )
        })
    }

    async fn keep_alive(&self, entry_id: EntryId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ready()?;
        if let Some(pending) = state.pending.get_mut(&entry_id) {
            pending.deadline = Instant::now() + self.config.ack_wait();
        }
        Ok(())
    }

    async fn enqueue_worker_job(&self, job_id: JobId, graph: &str) -> Result<EntryId> {
        let mut state = self.state.lock().await;
        state.ready()?;
        if let Ok(job) = state.live_job(job_id) {
            job.graph = Some(graph.to_string());
        }

        let entry = JobEntry::new(job_id, JobName::ProcessGraph, created_now(), graph.to_string());
        Ok(state.push(StreamKind::Worker, entry))
    }

    async fn set_job_payload(&self, job_id: JobId, graph: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ready()?;
        let job = state.live_job(job_id)?;
        job.graph = Some(graph.to_string());
        self.refresh(job);
        Ok(())
    }

    async fn publish_status(&self, job_id: JobId, status: JobStatus) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ready()?;
        let Ok(job) = state.live_job(job_id) else {
            return Ok(());
        };

        if JobState::new(job.status, job.progress).accepts_status(status) {
            job.status = status;
            self.refresh(job);
        }
        Ok(())
    }

    async fn publish_progress(&self, job_id: JobId, progress: Progress) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ready()?;
        let Ok(job) = state.live_job(job_id) else {
            return Ok(());
        };

        let value = progress.value();
        if JobState::new(job.status, job.progress).accepts_progress(value) {
            job.progress = value;
            self.refresh(job);
        }
        Ok(())
    }

    async fn publish_data(&self, job_id: JobId, data: Value) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ready()?;
        if let Ok(job) = state.live_job(job_id) {
            job.data = Some(data);
            self.refresh(job);
        }
        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.torn_down {
            state.torn_down = true;
            tracing::debug!(target: TRACING_TARGET_TRANSPORT, "Memory transport torn down");
        }
        Ok(())
    }

    fn result_poll_interval(&self) -> Duration {
        self.config.result_poll_interval()
    }
}
