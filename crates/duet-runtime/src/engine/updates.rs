//! Progress and data reporting for one job pass.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use duet_nats::job::{JobId, Progress};
use duet_nats::transport::JobTransport;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::TRACING_TARGET_EXECUTOR;
use crate::graph::NodeId;
use crate::registry::UpdateSink;

#[derive(Debug, Default)]
struct Tally {
    baseline: f64,
    contributions: HashMap<NodeId, f64>,
    published: f64,
}

impl Tally {
    fn current(&self) -> Progress {
        Progress::running(self.baseline + self.contributions.values().sum::<f64>())
    }
}

/// Folds node contributions into job progress and publishes it.
///
/// Job progress is the weight of completed nodes plus the contributions of
/// running ones, clamped below completion. Updates are best-effort.
pub(crate) struct JobUpdates {
    transport: Arc<dyn JobTransport>,
    job_id: JobId,
    tally: Mutex<Tally>,
}

impl JobUpdates {
    pub(crate) fn new(transport: Arc<dyn JobTransport>, job_id: JobId, baseline: f64) -> Self {
        Self {
            transport,
            job_id,
            tally: Mutex::new(Tally {
                baseline,
                ..Tally::default()
            }),
        }
    }

    /// Moves the baseline to the completed weight after a wave and publishes
    /// it if it advanced.
    pub(crate) async fn rebase(&self, baseline: f64) {
        let progress = {
            let mut tally = self.tally.lock().await;
            tally.baseline = baseline;
            tally.contributions.clear();
            Self::advance(&mut tally)
        };
        if let Some(progress) = progress {
            self.publish(progress).await;
        }
    }

    fn advance(tally: &mut Tally) -> Option<Progress> {
        let progress = tally.current();
        (progress.value() > tally.published).then(|| {
            tally.published = progress.value();
            progress
        })
    }

    async fn publish(&self, progress: Progress) {
        if let Err(err) = self.transport.publish_progress(self.job_id, progress).await {
            tracing::warn!(
                target: TRACING_TARGET_EXECUTOR,
                job_id = %self.job_id,
                error = %err,
                "Dropped progress update"
            );
        }
    }
}

#[async_trait]
impl UpdateSink for JobUpdates {
    async fn progress(&self, node_id: &NodeId, contribution: f64) {
        let progress = {
            let mut tally = self.tally.lock().await;
            tally.contributions.insert(node_id.clone(), contribution);
            Self::advance(&mut tally)
        };
        if let Some(progress) = progress {
            self.publish(progress).await;
        }
    }

    async fn data(&self, node_id: &NodeId, data: Value) {
        if let Err(err) = self.transport.publish_data(self.job_id, data).await {
            tracing::warn!(
                target: TRACING_TARGET_EXECUTOR,
                job_id = %self.job_id,
                node_id = %node_id,
                error = %err,
                "Dropped data update"
            );
        }
    }
}
