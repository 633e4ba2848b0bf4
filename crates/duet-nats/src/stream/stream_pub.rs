//! Durable job publishing.

use std::time::Duration;

use async_nats::jetstream;
use tracing::{debug, instrument};

use super::StreamKind;
use crate::job::{EntryId, JobEntry};
use crate::retry::{RetryConfig, publish_failed};
use crate::{Error, Result, TRACING_TARGET_STREAM};

/// Appends job entries to the job streams.
///
/// Publishing waits for the JetStream acknowledgement, so a returned entry id
/// means the entry is stored. Transient failures are retried and then surfaced.
#[derive(Debug, Clone)]
pub struct JobPublisher {
    jetstream: jetstream::Context,
    retry: RetryConfig,
}

impl JobPublisher {
    /// Creates the publisher, ensuring every job stream exists.
    #[instrument(skip(jetstream, retry), target = TRACING_TARGET_STREAM)]
    pub async fn new(
        jetstream: &jetstream::Context,
        max_age: Duration,
        retry: RetryConfig,
    ) -> Result<Self> {
        for kind in [StreamKind::Control, StreamKind::Worker, StreamKind::Info] {
            Self::ensure_stream(jetstream, kind, max_age).await?;
        }

        Ok(Self {
            jetstream: jetstream.clone(),
            retry,
        })
    }

    async fn ensure_stream(
        jetstream: &jetstream::Context,
        kind: StreamKind,
        max_age: Duration,
    ) -> Result<()> {
        match jetstream.get_stream(kind.name()).await {
            Ok(_) => {
                debug!(
                    target: TRACING_TARGET_STREAM,
                    stream = %kind.name(),
                    "Using existing stream"
                );
            }
            Err(_) => {
                debug!(
                    target: TRACING_TARGET_STREAM,
                    stream = %kind.name(),
                    max_age_secs = max_age.as_secs(),
                    "Creating new stream"
                );
                jetstream
                    .create_stream(kind.config(max_age))
                    .await
                    .map_err(|e| Error::stream_error(kind.name(), e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Appends an entry to the stream and returns its sequence.
    #[instrument(skip(self, entry), target = TRACING_TARGET_STREAM)]
    pub async fn publish(&self, kind: StreamKind, entry: &JobEntry) -> Result<EntryId> {
        let subject = kind.subject();
        let payload = serde_json::to_vec(entry)?;
        let payload_size = payload.len();

        let ack = self
            .retry
            .retry(|| {
                let payload = payload.clone();
                async move {
                    self.jetstream
                        .publish(subject, payload.into())
                        .await
                        .map_err(|e| publish_failed(subject, e))?
                        .await
                        .map_err(|e| publish_failed(subject, e))
                }
            })
            .await?;

        debug!(
            target: TRACING_TARGET_STREAM,
            subject = %subject,
            sequence = ack.sequence,
            job_id = entry.job_id.as_deref().unwrap_or_default(),
            payload_size = payload_size,
            "Published job entry"
        );
        Ok(EntryId::from(ack.sequence))
    }
}
