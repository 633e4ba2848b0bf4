use std::sync::Arc;

use duet_nats::job::{JobStatus, Progress, StreamEntry};
use duet_nats::transport::JobTransport;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{ExecutorConfig, PassOutcome};
use crate::TRACING_TARGET_EXECUTOR;
use crate::error::ExecutorError;
use crate::registry::TaskRegistry;

struct Lifecycle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Polls the control stream and drives claimed graphs.
///
/// Each claimed entry runs as its own task, up to
/// [`ExecutorConfig::max_passes`] at a time, so a slow handler only holds up
/// its own job. Cloning is cheap; clones share the same lifecycle.
#[derive(Clone)]
pub struct Executor {
    pub(super) config: Arc<ExecutorConfig>,
    pub(super) transport: Arc<dyn JobTransport>,
    pub(super) registry: Arc<TaskRegistry>,
    lifecycle: Arc<Mutex<Option<Lifecycle>>>,
}

impl Executor {
    /// Creates a stopped executor.
    pub fn new(
        config: ExecutorConfig,
        transport: Arc<dyn JobTransport>,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            transport,
            registry,
            lifecycle: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns the executor configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Ensures the consumer group exists and starts the polling task.
    ///
    /// Calling `start` on a running executor does nothing.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_EXECUTOR)]
    pub async fn start(&self) -> Result<(), ExecutorError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Ok(());
        }

        self.transport
            .ensure_control_group()
            .await
            .map_err(ExecutorError::Transport)?;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.clone().run(cancel.clone()));
        *lifecycle = Some(Lifecycle { cancel, handle });

        tracing::info!(
            target: TRACING_TARGET_EXECUTOR,
            consumer_id = %self.config.consumer_id,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Executor started"
        );
        Ok(())
    }

    /// Cancels the polling task and waits for the passes in progress to end.
    ///
    /// Stopping an executor that was never started does nothing.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_EXECUTOR)]
    pub async fn stop(&self) {
        let Some(Lifecycle { cancel, handle }) = self.lifecycle.lock().await.take() else {
            return;
        };

        cancel.cancel();
        if let Err(err) = handle.await {
            tracing::error!(
                target: TRACING_TARGET_EXECUTOR,
                error = %err,
                "Executor task ended abnormally"
            );
        }
        tracing::info!(target: TRACING_TARGET_EXECUTOR, "Executor stopped");
    }

    /// Returns true while the polling task runs.
    pub async fn is_running(&self) -> bool {
        self.lifecycle.lock().await.is_some()
    }

    async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut passes = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,
                Some(joined) = passes.join_next() => {
                    Self::log_pass(joined);
                    continue;
                }
                _ = ticker.tick() => {}
            }

            if passes.len() >= self.config.max_passes {
                continue;
            }
            match self.claim().await {
                Ok(Some(claimed)) => {
                    let executor = self.clone();
                    passes.spawn(async move { executor.drive(claimed).await });
                }
                Ok(None) => {}
                Err(err) => Self::log_pass(Ok(Err(err))),
            }
        }

        while let Some(joined) = passes.join_next().await {
            Self::log_pass(joined);
        }
    }

    fn log_pass(joined: Result<Result<PassOutcome, ExecutorError>, JoinError>) {
        match joined {
            Ok(Ok(PassOutcome::Idle)) => {}
            Ok(Ok(outcome)) => {
                tracing::debug!(
                    target: TRACING_TARGET_EXECUTOR,
                    outcome = ?outcome,
                    "Pass finished"
                );
            }
            Ok(Err(err)) => {
                tracing::error!(
                    target: TRACING_TARGET_EXECUTOR,
                    entry_id = ?err.entry_id(),
                    job_id = ?err.job_id(),
                    error = %err,
                    "Pass failed"
                );
            }
            Err(err) => {
                tracing::error!(
                    target: TRACING_TARGET_EXECUTOR,
                    error = %err,
                    "Pass task ended abnormally"
                );
            }
        }
    }

    /// Claims at most one control-stream entry and processes it.
    ///
    /// Entry-level errors are recovered before being returned: the entry is
    /// acknowledged and, when its job is known, the job is marked failed.
    pub async fn tick(&self) -> Result<PassOutcome, ExecutorError> {
        match self.claim().await? {
            Some(claimed) => self.drive(claimed).await,
            None => Ok(PassOutcome::Idle),
        }
    }

    async fn claim(&self) -> Result<Option<StreamEntry>, ExecutorError> {
        self.transport
            .claim_control_entry(&self.config.consumer_id)
            .await
            .map_err(ExecutorError::Transport)
    }

    async fn drive(&self, claimed: StreamEntry) -> Result<PassOutcome, ExecutorError> {
        match self.process(claimed).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.recover(&err).await;
                Err(err)
            }
        }
    }

    async fn recover(&self, err: &ExecutorError) {
        if let Some(entry_id) = err.entry_id()
            && let Err(ack_err) = self.transport.acknowledge(entry_id).await
        {
            tracing::warn!(
                target: TRACING_TARGET_EXECUTOR,
                entry_id = %entry_id,
                error = %ack_err,
                "Failed to acknowledge entry"
            );
        }

        if let Some(job_id) = err.job_id() {
            let published = async {
                self.transport
                    .publish_progress(job_id, Progress::FAILED)
                    .await?;
                self.transport
                    .publish_status(job_id, JobStatus::Failed)
                    .await
            };
            if let Err(publish_err) = published.await {
                tracing::warn!(
                    target: TRACING_TARGET_EXECUTOR,
                    job_id = %job_id,
                    error = %publish_err,
                    "Failed to mark job failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use duet_nats::transport::MemoryTransport;
    use tokio::sync::Notify;
    use serde_json::json;

    use super::*;
    use crate::engine::ExecutorConfigBuilder;
    use crate::graph::{Node, Plane, WorkflowGraph};
    use crate::registry::handler_fn;

    fn executor(transport: &Arc<MemoryTransport>) -> Executor {
        let config = ExecutorConfigBuilder::default()
            .poll_interval(Duration::from_millis(10))
            .consumer_id("executor-test")
            .build()
            .unwrap();

        let mut registry = TaskRegistry::new();
        registry
            .register("echo", handler_fn(|_, input| async move { Ok(input) }))
            .unwrap();
        Executor::new(config, transport.clone(), Arc::new(registry))
    }

    #[tokio::test]
    async fn stop_before_start_is_a_noop() {
        let transport = Arc::new(MemoryTransport::default());
        let executor = executor(&transport);

        executor.stop().await;
        assert!(!executor.is_running().await);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let transport = Arc::new(MemoryTransport::default());
        let executor = executor(&transport);

        executor.start().await.unwrap();
        executor.start().await.unwrap();
        assert!(executor.is_running().await);

        executor.stop().await;
        assert!(!executor.is_running().await);
    }

    #[tokio::test]
    async fn polling_loop_drives_enqueued_jobs() {
        let transport = Arc::new(MemoryTransport::default());
        let executor = executor(&transport);
        executor.start().await.unwrap();

        let graph = WorkflowGraph::new(
            "wf",
            vec![Node::new("a", "echo", Plane::Control).with_input(json!({ "x": 1 }))],
            vec![],
        );
        let job_id = transport
            .enqueue_job("process_graph", &graph.to_json().unwrap())
            .await
            .unwrap();

        let result = transport
            .get_job_result(job_id, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result, json!({ "a": { "x": 1 } }));

        executor.stop().await;
    }

    #[tokio::test]
    async fn start_fails_on_a_closed_transport() {
        let transport = Arc::new(MemoryTransport::default());
        transport.teardown().await.unwrap();
        let executor = executor(&transport);

        assert!(matches!(
            executor.start().await,
            Err(ExecutorError::Transport(_))
        ));
        assert!(!executor.is_running().await);
    }

    #[tokio::test]
    async fn loop_survives_pass_errors() {
        let transport = Arc::new(MemoryTransport::default());
        let executor = executor(&transport);
        executor.start().await.unwrap();

        let bad = transport
            .enqueue_job("process_graph", "{\"nodes\": []}")
            .await
            .unwrap();
        let graph = WorkflowGraph::new(
            "wf",
            vec![Node::new("a", "echo", Plane::Control)],
            vec![],
        );
        let good = transport
            .enqueue_job("process_graph", &graph.to_json().unwrap())
            .await
            .unwrap();

        transport
            .get_job_result(good, Duration::from_secs(5))
            .await
            .unwrap();
        let state = transport.get_job_state(bad).await.unwrap();
        assert_eq!(state.status, JobStatus::Failed);

        executor.stop().await;
    }

    #[tokio::test]
    async fn stalled_pass_does_not_block_other_jobs() {
        let transport = Arc::new(MemoryTransport::default());
        let release = Arc::new(Notify::new());
        let config = ExecutorConfigBuilder::default()
            .poll_interval(Duration::from_millis(10))
            .consumer_id("executor-test")
            .build()
            .unwrap();

        let mut registry = TaskRegistry::new();
        registry
            .register("echo", handler_fn(|_, input| async move { Ok(input) }))
            .unwrap();
        let gate = release.clone();
        registry
            .register(
                "wait",
                handler_fn(move |_, input| {
                    let gate = gate.clone();
                    async move {
                        gate.notified().await;
                        Ok(input)
                    }
                }),
            )
            .unwrap();
        let executor = Executor::new(config, transport.clone(), Arc::new(registry));

        let submit = |task: &str| {
            let graph = WorkflowGraph::new(
                "wf",
                vec![Node::new("a", task, Plane::Control).with_input(json!({ "task": task }))],
                vec![],
            );
            let transport = transport.clone();
            async move {
                transport
                    .enqueue_job("process_graph", &graph.to_json().unwrap())
                    .await
                    .unwrap()
            }
        };
        let stalled = submit("wait").await;
        let quick = submit("echo").await;
        executor.start().await.unwrap();

        let result = transport
            .get_job_result(quick, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result, json!({ "a": { "task": "echo" } }));
        let state = transport.get_job_state(stalled).await.unwrap();
        assert_eq!(state.status, JobStatus::Running);

        release.notify_one();
        transport
            .get_job_result(stalled, Duration::from_secs(5))
            .await
            .unwrap();
        executor.stop().await;
    }
}
