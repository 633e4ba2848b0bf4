//! Update publishing and the background persister.

use async_nats::Client;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{UpdateChannel, UpdateMessage};
use crate::job::{JobId, JobStatus};
use crate::kv::JobStateStore;
use crate::{Error, Result, TRACING_TARGET_BUS};

/// Queue group shared by persisters so each update is stored once.
const PERSISTER_QUEUE_GROUP: &str = "duet-update-persisters";

/// Publishes per-job updates and persists them into the job state store.
///
/// Publishing is best-effort: a failed publish is logged and dropped, and the
/// client resumes publishing once it reconnects.
pub struct UpdateBus {
    client: Client,
    store: JobStateStore,
    cancel: CancellationToken,
    persister: Mutex<Option<JoinHandle<()>>>,
}

impl UpdateBus {
    /// Creates the bus without starting the persister.
    pub fn new(client: Client, store: JobStateStore) -> Self {
        Self {
            client,
            store,
            cancel: CancellationToken::new(),
            persister: Mutex::new(None),
        }
    }

    /// Subscribes to every update channel and spawns the persister task.
    ///
    /// Calling `start` on a running bus does nothing.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_BUS)]
    pub async fn start(&self) -> Result<()> {
        let mut persister = self.persister.lock().await;
        if persister.is_some() {
            return Ok(());
        }

        let mut subscriber = self
            .client
            .queue_subscribe(UpdateChannel::wildcard(), PERSISTER_QUEUE_GROUP.to_string())
            .await
            .map_err(Error::connection)?;

        let store = self.store.clone();
        let cancel = self.cancel.clone();
        *persister = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    message = subscriber.next() => {
                        let Some(message) = message else { break };
                        persist(&store, &message.subject, &message.payload).await;
                    }
                }
            }

            if let Err(err) = subscriber.unsubscribe().await {
                tracing::debug!(
                    target: TRACING_TARGET_BUS,
                    error = %err,
                    "Failed to unsubscribe update persister"
                );
            }
            tracing::debug!(target: TRACING_TARGET_BUS, "Update persister stopped");
        }));

        tracing::info!(
            target: TRACING_TARGET_BUS,
            subject = %UpdateChannel::wildcard(),
            "Update persister started"
        );
        Ok(())
    }

    /// Publishes an update, logging and dropping it on failure.
    pub async fn publish(&self, channel: UpdateChannel, job_id: JobId, value: Value) {
        let message = UpdateMessage::new(channel, job_id, value);
        let payload = match message.payload() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(
                    target: TRACING_TARGET_BUS,
                    job_id = %job_id,
                    channel = %channel,
                    error = %err,
                    "Dropping unencodable update"
                );
                return;
            }
        };

        let subject = channel.subject(job_id);
        if let Err(err) = self.client.publish(subject.clone(), payload.into()).await {
            tracing::warn!(
                target: TRACING_TARGET_BUS,
                subject = %subject,
                error = %err,
                "Dropping update, publish failed"
            );
        }
    }

    /// Stops the persister. Safe to call more than once.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.persister.lock().await.take()
            && let Err(err) = handle.await
        {
            tracing::warn!(
                target: TRACING_TARGET_BUS,
                error = %err,
                "Update persister task ended abnormally"
            );
        }
    }
}

/// Writes one received update into the store.
async fn persist(store: &JobStateStore, subject: &str, payload: &[u8]) {
    let message = match UpdateMessage::decode(subject, payload) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(
                target: TRACING_TARGET_BUS,
                subject = %subject,
                error = %err,
                "Ignoring malformed update"
            );
            return;
        }
    };

    let job_id = message.job_id;
    let result = match message.channel {
        UpdateChannel::Status => match message.value.as_str().map(str::parse::<JobStatus>) {
            Some(Ok(status)) => store.apply_status(job_id, status).await,
            _ => Ok(false),
        },
        UpdateChannel::Progress => match progress_value(&message.value) {
            Some(progress) => store.apply_progress(job_id, progress).await,
            None => Ok(false),
        },
        UpdateChannel::Data => store.put_data(job_id, &message.value).await.map(|_| true),
    };

    match result {
        Ok(true) => tracing::trace!(
            target: TRACING_TARGET_BUS,
            job_id = %job_id,
            channel = %message.channel,
            "Persisted update"
        ),
        Ok(false) => tracing::debug!(
            target: TRACING_TARGET_BUS,
            job_id = %job_id,
            channel = %message.channel,
            value = %message.value,
            "Dropped out-of-order or invalid update"
        ),
        Err(err) => tracing::warn!(
            target: TRACING_TARGET_BUS,
            job_id = %job_id,
            channel = %message.channel,
            error = %err,
            "Failed to persist update"
        ),
    }
}

/// Accepts numbers and numeric strings.
fn progress_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

impl std::fmt::Debug for UpdateBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateBus")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn progress_accepts_numeric_strings() {
        assert_eq!(progress_value(&json!(0.5)), Some(0.5));
        assert_eq!(progress_value(&json!("-1")), Some(-1.0));
        assert_eq!(progress_value(&json!(true)), None);
    }
}
