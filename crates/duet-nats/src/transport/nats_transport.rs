//! Job transport on NATS JetStream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{OnceCell, RwLock};

use super::{JobTransport, TransportConfig};
use crate::bus::{UpdateBus, UpdateChannel};
use crate::job::{
    EntryId, JobEntry, JobId, JobName, JobRecord, JobState, JobStatus, Progress, StreamEntry,
    created_now,
};
use crate::kv::JobStateStore;
use crate::stream::{ConsumerGroup, JobPublisher, StreamKind};
use crate::{Error, NatsClient, Result, TRACING_TARGET_TRANSPORT};

/// Job transport backed by JetStream streams, a KV bucket and core pub/sub.
///
/// Created with [`NatsTransport::connect`], which ensures the streams and the
/// bucket exist and starts the update persister. After
/// [`JobTransport::teardown`] every operation fails with
/// [`Error::Uninitialized`].
pub struct NatsTransport {
    client: NatsClient,
    config: TransportConfig,
    inner: RwLock<Option<Arc<Connected>>>,
}

struct Connected {
    store: JobStateStore,
    publisher: JobPublisher,
    bus: UpdateBus,
    control: OnceCell<ConsumerGroup>,
}

impl NatsTransport {
    /// Prepares streams, the job bucket and the update persister.
    #[tracing::instrument(skip(client, config), target = TRACING_TARGET_TRANSPORT)]
    pub async fn connect(client: NatsClient, config: TransportConfig) -> Result<Self> {
        config.validate().map_err(Error::invalid_config)?;

        let jetstream = client.jetstream();
        let store = JobStateStore::new(jetstream, config.job_ttl()).await?;
        let publisher = JobPublisher::new(jetstream, config.job_ttl(), config.enqueue_retry()).await?;
        let bus = UpdateBus::new(client.client().clone(), store.clone());
        bus.start().await?;

        tracing::info!(
            target: TRACING_TARGET_TRANSPORT,
            control_group = %config.control_group,
            job_ttl_secs = config.job_ttl_secs,
            "Job transport initialized"
        );

        Ok(Self {
            client,
            config,
            inner: RwLock::new(Some(Arc::new(Connected {
                store,
                publisher,
                bus,
                control: OnceCell::new(),
            }))),
        })
    }

    /// Returns the transport configuration.
    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Returns the underlying NATS client.
    #[must_use]
    pub fn client(&self) -> &NatsClient {
        &self.client
    }

    async fn connected(&self) -> Result<Arc<Connected>> {
        self.inner.read().await.clone().ok_or(Error::Uninitialized)
    }

    async fn control_group(&self) -> Result<Arc<Connected>> {
        let connected = self.connected().await?;
        connected
            .control
            .get_or_try_init(|| {
                ConsumerGroup::new(
                    self.client.jetstream(),
                    StreamKind::Control,
                    &self.config.control_group,
                    self.config.ack_wait(),
                )
            })
            .await?;
        Ok(connected)
    }

    async fn publish_update(&self, channel: UpdateChannel, job_id: JobId, value: Value) -> Result<()> {
        self.connected().await?.bus.publish(channel, job_id, value).await;
        Ok(())
    }
}

#[async_trait]
impl JobTransport for NatsTransport {
    #[tracing::instrument(skip(self, input), target = TRACING_TARGET_TRANSPORT)]
    async fn enqueue_job(&self, name: &str, input: &str) -> Result<JobId> {
        let job_name = JobName::parse(name)?;
        let connected = self.connected().await?;

        let job_id = JobId::new();
        let created = created_now();
        let record = JobRecord {
            name: job_name.to_string(),
            input: input.to_string(),
            created: created.clone(),
        };

        connected.store.create(job_id, &record).await?;
        if job_name == JobName::ProcessGraph {
            connected.store.put_graph(job_id, input).await?;
        }

        let entry = JobEntry::new(job_id, job_name, created, input.to_string());
        let entry_id = connected.publisher.publish(job_name.stream(), &entry).await?;

        tracing::info!(
            target: TRACING_TARGET_TRANSPORT,
            job_id = %job_id,
            job_name = %job_name,
            entry_id = %entry_id,
            "Job enqueued"
        );
        Ok(job_id)
    }

    async fn get_job_state(&self, job_id: JobId) -> Result<JobState> {
        self.connected().await?.store.state(job_id).await
    }

    async fn job_result(&self, job_id: JobId) -> Result<Option<Value>> {
        self.connected().await?.store.data(job_id).await
    }

    async fn job_graph(&self, job_id: JobId) -> Result<Option<String>> {
        self.connected().await?.store.graph(job_id).await
    }

    async fn ensure_control_group(&self) -> Result<()> {
        self.control_group().await.map(drop)
    }

    async fn claim_control_entry(&self, consumer_id: &str) -> Result<Option<StreamEntry>> {
        let connected = self.control_group().await?;
        match connected.control.get() {
            Some(group) => group.claim(consumer_id).await,
            None => Err(Error::Uninitialized),
        }
    }

    async fn acknowledge(&self, entry_id: EntryId) -> Result<()> {
        let connected = self.control_group().await?;
        match connected.control.get() {
            Some(group) => group.ack(entry_id).await,
            None => Err(Error::Uninitialized),
        }
    }

    async fn keep_alive(&self, entry_id: EntryId) -> Result<()> {
        let connected = self.control_group().await?;
        match connected.control.get() {
            Some(group) => group.keep_alive(entry_id).await,
            None => Err(Error::Uninitialized),
        }
    }

    #[tracing::instrument(skip(self, graph), target = TRACING_TARGET_TRANSPORT)]
    async fn enqueue_worker_job(&self, job_id: JobId, graph: &str) -> Result<EntryId> {
        let connected = self.connected().await?;
        connected.store.put_graph(job_id, graph).await?;

        let entry = JobEntry::new(job_id, JobName::ProcessGraph, created_now(), graph.to_string());
        let entry_id = connected.publisher.publish(StreamKind::Worker, &entry).await?;

        tracing::info!(
            target: TRACING_TARGET_TRANSPORT,
            job_id = %job_id,
            entry_id = %entry_id,
            "Job handed off to worker stream"
        );
        Ok(entry_id)
    }

    async fn set_job_payload(&self, job_id: JobId, graph: &str) -> Result<()> {
        self.connected().await?.store.put_graph(job_id, graph).await
    }

    async fn publish_status(&self, job_id: JobId, status: JobStatus) -> Result<()> {
        self.publish_update(UpdateChannel::Status, job_id, Value::from(status.as_ref()))
            .await
    }

    async fn publish_progress(&self, job_id: JobId, progress: Progress) -> Result<()> {
        self.publish_update(UpdateChannel::Progress, job_id, Value::from(progress.value()))
            .await
    }

    async fn publish_data(&self, job_id: JobId, data: Value) -> Result<()> {
        self.publish_update(UpdateChannel::Data, job_id, data).await
    }

    #[tracing::instrument(skip(self), target = TRACING_TARGET_TRANSPORT)]
    async fn teardown(&self) -> Result<()> {
        let Some(connected) = self.inner.write().await.take() else {
            return Ok(());
        };

        connected.bus.stop().await;
        if let Some(group) = connected.control.get() {
            let in_flight = group.in_flight().await;
            if in_flight > 0 {
                tracing::warn!(
                    target: TRACING_TARGET_TRANSPORT,
                    in_flight = in_flight,
                    "Tearing down with unacknowledged entries, they will be redelivered"
                );
            }
        }

        if let Err(err) = self.client.client().flush().await {
            tracing::debug!(
                target: TRACING_TARGET_TRANSPORT,
                error = %err,
                "Failed to flush pending updates"
            );
        }

        tracing::info!(target: TRACING_TARGET_TRANSPORT, "Job transport torn down");
        Ok(())
    }

    fn result_poll_interval(&self) -> Duration {
        self.config.result_poll_interval()
    }
}

impl std::fmt::Debug for NatsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
