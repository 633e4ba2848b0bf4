//! Consumer group over a job stream.

use std::collections::HashMap;
use std::time::Duration;

use async_nats::jetstream::{self, AckKind, consumer};
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::StreamKind;
use crate::job::{EntryId, JobEntry, StreamEntry};
use crate::{Error, Result, TRACING_TARGET_STREAM};

/// A named consumer group over one job stream.
///
/// The group is a durable pull consumer with explicit acknowledgement: every
/// entry is handed to one live consumer at a time and is redelivered once its
/// ack-wait elapses without an acknowledgement. Claimed messages stay in
/// flight here until [`ConsumerGroup::ack`] is called with their entry id.
pub struct ConsumerGroup {
    group: String,
    stream: StreamKind,
    consumer: consumer::PullConsumer,
    in_flight: Mutex<HashMap<EntryId, jetstream::Message>>,
}

impl ConsumerGroup {
    /// Gets or creates the durable consumer for the group.
    #[instrument(skip(jetstream), target = TRACING_TARGET_STREAM)]
    pub async fn new(
        jetstream: &jetstream::Context,
        stream: StreamKind,
        group: &str,
        ack_wait: Duration,
    ) -> Result<Self> {
        let consumer_config = consumer::pull::Config {
            durable_name: Some(group.to_string()),
            description: Some(format!("Consumer group for stream {}", stream.name())),
            ack_policy: consumer::AckPolicy::Explicit,
            ack_wait,
            ..Default::default()
        };

        let handle = jetstream.get_stream(stream.name()).await.map_err(|e| {
            Error::stream_error(stream.name(), format!("Failed to get stream: {}", e))
        })?;

        let consumer = handle
            .get_or_create_consumer(group, consumer_config)
            .await
            .map_err(|e| {
                Error::consumer_error(group, format!("Failed to create consumer: {}", e))
            })?;

        debug!(
            target: TRACING_TARGET_STREAM,
            stream = %stream.name(),
            group = %group,
            ack_wait_secs = ack_wait.as_secs(),
            "Consumer group ready"
        );

        Ok(Self {
            group: group.to_string(),
            stream,
            consumer,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the group name.
    #[inline]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Claims at most one pending entry without waiting for new ones.
    #[instrument(skip(self), target = TRACING_TARGET_STREAM)]
    pub async fn claim(&self, consumer_id: &str) -> Result<Option<StreamEntry>> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(1)
            .messages()
            .await
            .map_err(|e| Error::consumer_error(&self.group, e.to_string()))?;

        let Some(next) = messages.next().await else {
            return Ok(None);
        };
        let message = next.map_err(|e| Error::consumer_error(&self.group, e.to_string()))?;

        let (sequence, delivered) = {
            let info = message
                .info()
                .map_err(|e| Error::operation("message_info", e.to_string()))?;
            (info.stream_sequence, info.delivered.max(1) as u64)
        };

        let entry_id = EntryId::from(sequence);
        let entry = JobEntry::from_slice(&message.payload);

        if delivered > 1 {
            warn!(
                target: TRACING_TARGET_STREAM,
                stream = %self.stream.name(),
                entry_id = %entry_id,
                delivered = delivered,
                "Claimed redelivered entry"
            );
        }

        debug!(
            target: TRACING_TARGET_STREAM,
            group = %self.group,
            consumer_id = %consumer_id,
            entry_id = %entry_id,
            "Claimed entry"
        );

        self.in_flight.lock().await.insert(entry_id, message);
        Ok(Some(StreamEntry {
            entry_id,
            delivered,
            entry,
        }))
    }

    /// Acknowledges an in-flight entry, removing it from the stream.
    #[instrument(skip(self), target = TRACING_TARGET_STREAM)]
    pub async fn ack(&self, entry_id: EntryId) -> Result<()> {
        let message = self
            .in_flight
            .lock()
            .await
            .remove(&entry_id)
            .ok_or_else(|| {
                Error::consumer_error(&self.group, format!("entry {entry_id} is not in flight"))
            })?;

        message
            .ack()
            .await
            .map_err(|e| Error::operation("message_ack", e.to_string()))?;

        debug!(
            target: TRACING_TARGET_STREAM,
            group = %self.group,
            entry_id = %entry_id,
            "Acknowledged entry"
        );
        Ok(())
    }

    /// Resets the ack-wait of an entry still being processed.
    pub async fn keep_alive(&self, entry_id: EntryId) -> Result<()> {
        let in_flight = self.in_flight.lock().await;
        if let Some(message) = in_flight.get(&entry_id) {
            message
                .ack_with(AckKind::Progress)
                .await
                .map_err(|e| Error::operation("message_progress", e.to_string()))?;
        }
        Ok(())
    }

    /// Number of claimed but unacknowledged entries.
    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }
}

impl std::fmt::Debug for ConsumerGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerGroup")
            .field("group", &self.group)
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}
