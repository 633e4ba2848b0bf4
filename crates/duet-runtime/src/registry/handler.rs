//! The handler contract every control-plane task implements.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use duet_nats::job::JobId;
use serde_json::{Map, Value};

use crate::error::TaskError;
use crate::graph::NodeId;

/// A control-plane task implementation.
///
/// Handlers enforce their own timeouts; the executor waits for them
/// unconditionally.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Runs the task on the merged input of its node.
    async fn call(&self, ctx: TaskContext, input: Value) -> Result<Value, TaskError>;
}

/// Receives incremental updates while a node runs.
#[async_trait]
pub trait UpdateSink: Send + Sync + 'static {
    /// The node's cumulative progress contribution, in job progress units.
    async fn progress(&self, node_id: &NodeId, contribution: f64);

    /// A partial result the node wants published.
    async fn data(&self, node_id: &NodeId, data: Value);
}

struct DiscardUpdates;

#[async_trait]
impl UpdateSink for DiscardUpdates {
    async fn progress(&self, _node_id: &NodeId, _contribution: f64) {}

    async fn data(&self, _node_id: &NodeId, _data: Value) {}
}

/// Everything a handler learns about the node it runs for.
#[derive(Clone)]
pub struct TaskContext {
    job_id: JobId,
    node_id: NodeId,
    params: Map<String, Value>,
    progress_weight: f64,
    updates: Arc<dyn UpdateSink>,
}

impl TaskContext {
    /// Creates a context whose updates are discarded.
    pub fn new(
        job_id: JobId,
        node_id: NodeId,
        params: Map<String, Value>,
        progress_weight: f64,
    ) -> Self {
        Self {
            job_id,
            node_id,
            params,
            progress_weight,
            updates: Arc::new(DiscardUpdates),
        }
    }

    /// Routes progress and data updates to `updates`.
    #[must_use]
    pub fn with_updates(mut self, updates: Arc<dyn UpdateSink>) -> Self {
        self.updates = updates;
        self
    }

    /// Job the node belongs to.
    #[inline]
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Node being executed.
    #[inline]
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Node parameters.
    #[inline]
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// A single parameter.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name).filter(|value| !value.is_null())
    }

    /// Share of job progress the node accounts for.
    #[inline]
    pub fn progress_weight(&self) -> f64 {
        self.progress_weight
    }

    /// Reports the node's cumulative contribution to job progress.
    ///
    /// The value is clamped into `[0, progress_weight]`.
    pub async fn report_progress(&self, contribution: f64) {
        let contribution = if contribution.is_nan() {
            0.0
        } else {
            contribution.clamp(0.0, self.progress_weight.max(0.0))
        };
        self.updates.progress(&self.node_id, contribution).await;
    }

    /// Publishes a partial result.
    pub async fn emit_data(&self, data: Value) {
        self.updates.data(&self.node_id, data).await;
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("job_id", &self.job_id)
            .field("node_id", &self.node_id)
            .field("params", &self.params)
            .field("progress_weight", &self.progress_weight)
            .finish_non_exhaustive()
    }
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    async fn call(&self, ctx: TaskContext, input: Value) -> Result<Value, TaskError> {
        (self.0)(ctx, input).await
    }
}

/// Adapts an async closure into a [`TaskHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(TaskContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorded(Mutex<Vec<f64>>);

    #[async_trait]
    impl UpdateSink for Recorded {
        async fn progress(&self, _node_id: &NodeId, contribution: f64) {
            self.0.lock().await.push(contribution);
        }

        async fn data(&self, _node_id: &NodeId, _data: Value) {}
    }

    #[tokio::test]
    async fn closures_become_handlers() {
        let handler = handler_fn(|ctx: TaskContext, input: Value| async move {
            Ok(json!({ "node": ctx.node_id().to_string(), "input": input }))
        });
        let ctx = TaskContext::new(JobId::new(), NodeId::from("a"), Map::new(), 0.5);

        let output = handler.call(ctx, json!(1)).await.unwrap();
        assert_eq!(output, json!({ "node": "a", "input": 1 }));
    }

    #[tokio::test]
    async fn progress_is_clamped_to_weight() {
        let recorded = Arc::new(Recorded::default());
        let ctx = TaskContext::new(JobId::new(), NodeId::from("a"), Map::new(), 0.2)
            .with_updates(recorded.clone());

        ctx.report_progress(0.1).await;
        ctx.report_progress(0.7).await;
        ctx.report_progress(-1.0).await;

        assert_eq!(*recorded.0.lock().await, vec![0.1, 0.2, 0.0]);
    }
}
