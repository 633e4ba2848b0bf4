//! One executor pass over a claimed control-stream entry.

use std::sync::Arc;

use duet_nats::job::{EntryId, JobId, JobStatus, Progress, StreamEntry};
use futures::future::join_all;
use serde_json::{Map, Value};

use super::Executor;
use super::updates::JobUpdates;
use crate::TRACING_TARGET_EXECUTOR;
use crate::error::{ExecutorError, TaskError};
use crate::graph::{NodeStatus, Plane, WorkflowGraph};
use crate::registry::{TaskContext, UpdateSink};

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Every node completed or was skipped.
    Completed {
        /// The finished job.
        job_id: JobId,
    },
    /// At least one node failed.
    Failed {
        /// The failed job.
        job_id: JobId,
    },
    /// Control-plane work ran out; the graph went to the worker stream.
    HandedOff {
        /// The handed-off job.
        job_id: JobId,
    },
    /// No entry was pending.
    Idle,
}

/// Entry identity shared by every transport call of one pass.
#[derive(Clone, Copy)]
struct Claim {
    entry_id: EntryId,
    job_id: JobId,
}

impl Claim {
    fn transport_error(self) -> impl Fn(duet_nats::Error) -> ExecutorError {
        move |source| ExecutorError::Entry {
            entry_id: self.entry_id,
            job_id: self.job_id,
            source,
        }
    }

    fn graph_error(self) -> impl Fn(crate::error::WorkflowError) -> ExecutorError {
        move |source| ExecutorError::InvalidGraph {
            entry_id: self.entry_id,
            job_id: self.job_id,
            source,
        }
    }
}

impl Executor {
    /// Drives the control-plane nodes of a claimed entry and resolves it.
    #[tracing::instrument(
        skip(self, claimed),
        fields(entry_id = %claimed.entry_id, delivered = claimed.delivered),
        target = TRACING_TARGET_EXECUTOR
    )]
    pub(super) async fn process(&self, claimed: StreamEntry) -> Result<PassOutcome, ExecutorError> {
        let entry_id = claimed.entry_id;
        let job_id = claimed
            .entry
            .job_id()
            .ok_or_else(|| ExecutorError::MalformedEntry {
                entry_id,
                job_id: None,
                reason: "missing or malformed job id".to_owned(),
            })?;
        let payload = claimed
            .entry
            .input_text()
            .ok_or_else(|| ExecutorError::MalformedEntry {
                entry_id,
                job_id: Some(job_id),
                reason: "missing graph payload".to_owned(),
            })?;

        let claim = Claim { entry_id, job_id };
        let payload = match claimed.delivered {
            0 | 1 => payload,
            _ => self.snapshot(job_id).await.unwrap_or(payload),
        };
        let mut graph = WorkflowGraph::parse(&payload).map_err(claim.graph_error())?;

        tracing::info!(
            target: TRACING_TARGET_EXECUTOR,
            job_id = %job_id,
            workflow_id = %graph.workflow_id,
            nodes = graph.nodes.len(),
            "Processing job"
        );

        self.transport
            .publish_status(job_id, JobStatus::Running)
            .await
            .map_err(claim.transport_error())?;

        let updates = Arc::new(JobUpdates::new(
            self.transport.clone(),
            job_id,
            graph.completed_weight(),
        ));

        let mut dirty = false;
        loop {
            let skipped = graph.skip_unsatisfiable(Plane::Control);
            if !skipped.is_empty() {
                tracing::debug!(
                    target: TRACING_TARGET_EXECUTOR,
                    job_id = %job_id,
                    skipped = ?skipped,
                    "Skipped unsatisfiable nodes"
                );
                dirty = true;
            }

            let ready = graph.ready_nodes(Plane::Control);
            if ready.is_empty() {
                break;
            }

            self.run_wave(&mut graph, &ready, job_id, updates.clone())
                .await;

            self.persist(&graph, claim).await?;
            dirty = false;

            if let Err(err) = self.transport.keep_alive(entry_id).await {
                tracing::warn!(
                    target: TRACING_TARGET_EXECUTOR,
                    entry_id = %entry_id,
                    error = %err,
                    "Failed to extend entry deadline"
                );
            }
            updates.rebase(graph.completed_weight()).await;
        }

        if dirty {
            self.persist(&graph, claim).await?;
        }

        self.resolve(&graph, claim).await
    }

    /// Latest persisted graph of a redelivered job.
    ///
    /// A previous pass may have completed waves before losing its claim, so
    /// resuming from the snapshot keeps finished nodes from running twice.
    async fn snapshot(&self, job_id: JobId) -> Option<String> {
        match self.transport.job_graph(job_id).await {
            Ok(Some(text)) => {
                tracing::debug!(
                    target: TRACING_TARGET_EXECUTOR,
                    job_id = %job_id,
                    "Resuming redelivered job from its persisted graph"
                );
                Some(text)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(
                    target: TRACING_TARGET_EXECUTOR,
                    job_id = %job_id,
                    error = %err,
                    "Failed to read persisted graph, using the entry payload"
                );
                None
            }
        }
    }

    /// Runs every ready node concurrently and stores each result in its own
    /// node slot once all of them have returned.
    async fn run_wave(
        &self,
        graph: &mut WorkflowGraph,
        ready: &[usize],
        job_id: JobId,
        updates: Arc<JobUpdates>,
    ) {
        let calls = ready.iter().map(|&index| {
            let input = graph.merged_input(index);
            let node = &mut graph.nodes[index];
            node.status = NodeStatus::Running;

            let handler = self.registry.get(&node.task);
            let task = node.task.clone();
            let ctx = TaskContext::new(
                job_id,
                node.id.clone(),
                node.params.clone(),
                node.progress_weight,
            )
            .with_updates(updates.clone() as Arc<dyn UpdateSink>);

            async move {
                let result = match handler {
                    Some(handler) => handler.call(ctx, input).await,
                    None => Err(TaskError::new(format!("No handler for task {task}"))
                        .with_code("no_handler")),
                };
                (index, result)
            }
        });
        let calls: Vec<_> = calls.collect();

        tracing::debug!(
            target: TRACING_TARGET_EXECUTOR,
            job_id = %job_id,
            width = calls.len(),
            "Running wave"
        );

        for (index, result) in join_all(calls).await {
            let node = &mut graph.nodes[index];
            match result {
                Ok(output) => {
                    tracing::debug!(
                        target: TRACING_TARGET_EXECUTOR,
                        job_id = %job_id,
                        node_id = %node.id,
                        "Node completed"
                    );
                    node.complete(output);
                }
                Err(err) => {
                    tracing::warn!(
                        target: TRACING_TARGET_EXECUTOR,
                        job_id = %job_id,
                        node_id = %node.id,
                        task = %node.task,
                        error = %err,
                        "Node failed"
                    );
                    node.fail(err);
                }
            }
        }
    }

    async fn persist(&self, graph: &WorkflowGraph, claim: Claim) -> Result<(), ExecutorError> {
        let text = graph.to_json().map_err(claim.graph_error())?;
        self.transport
            .set_job_payload(claim.job_id, &text)
            .await
            .map_err(claim.transport_error())
    }

    async fn resolve(&self, graph: &WorkflowGraph, claim: Claim) -> Result<PassOutcome, ExecutorError> {
        let Claim { entry_id, job_id } = claim;
        let to_entry_error = claim.transport_error();

        if graph.has_failed() {
            let failed: Vec<_> = graph.failed_nodes().map(|node| node.id.to_string()).collect();
            self.transport
                .publish_progress(job_id, Progress::FAILED)
                .await
                .map_err(&to_entry_error)?;
            self.transport
                .publish_status(job_id, JobStatus::Failed)
                .await
                .map_err(&to_entry_error)?;
            self.transport
                .acknowledge(entry_id)
                .await
                .map_err(&to_entry_error)?;

            tracing::warn!(
                target: TRACING_TARGET_EXECUTOR,
                job_id = %job_id,
                failed_nodes = ?failed,
                "Job failed"
            );
            return Ok(PassOutcome::Failed { job_id });
        }

        if graph.is_complete() {
            self.transport
                .publish_data(job_id, job_result(graph))
                .await
                .map_err(&to_entry_error)?;
            self.transport
                .publish_status(job_id, JobStatus::Completed)
                .await
                .map_err(&to_entry_error)?;
            self.transport
                .publish_progress(job_id, Progress::DONE)
                .await
                .map_err(&to_entry_error)?;
            self.transport
                .acknowledge(entry_id)
                .await
                .map_err(&to_entry_error)?;

            tracing::info!(target: TRACING_TARGET_EXECUTOR, job_id = %job_id, "Job completed");
            return Ok(PassOutcome::Completed { job_id });
        }

        let text = graph.to_json().map_err(claim.graph_error())?;
        let worker_entry = self
            .transport
            .enqueue_worker_job(job_id, &text)
            .await
            .map_err(&to_entry_error)?;
        self.transport
            .acknowledge(entry_id)
            .await
            .map_err(&to_entry_error)?;

        tracing::info!(
            target: TRACING_TARGET_EXECUTOR,
            job_id = %job_id,
            worker_entry = %worker_entry,
            "Job handed off to the worker plane"
        );
        Ok(PassOutcome::HandedOff { job_id })
    }
}

/// Outputs of completed nodes keyed by node id.
fn job_result(graph: &WorkflowGraph) -> Value {
    let outputs: Map<String, Value> = graph
        .nodes
        .iter()
        .filter(|node| node.status == NodeStatus::Completed)
        .map(|node| {
            (
                node.id.to_string(),
                node.output.clone().unwrap_or(Value::Null),
            )
        })
        .collect();
    Value::Object(outputs)
}

#[cfg(test)]
mod tests {
    use duet_nats::job::JobEntry;
    use duet_nats::stream::StreamKind;
    use std::time::Duration;

    use duet_nats::transport::{JobTransport, MemoryTransport, TransportConfig};
    use serde_json::json;

    use super::*;
    use crate::engine::ExecutorConfig;
    use crate::graph::{Edge, EdgeKind, Node};
    use crate::registry::{TaskRegistry, handler_fn};

    fn registry() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry
            .register(
                "echo",
                handler_fn(|ctx, input| async move {
                    ctx.report_progress(ctx.progress_weight()).await;
                    Ok(json!({ (ctx.node_id().to_string()): input }))
                }),
            )
            .unwrap();
        registry
            .register(
                "boom",
                handler_fn(|_, _| async { Err(TaskError::new("boom").with_code("exploded")) }),
            )
            .unwrap();
        registry
    }

    fn executor(transport: &Arc<MemoryTransport>) -> Executor {
        Executor::new(
            ExecutorConfig::default(),
            transport.clone(),
            Arc::new(registry()),
        )
    }

    async fn submit(transport: &MemoryTransport, graph: &WorkflowGraph) -> JobId {
        transport
            .enqueue_job("process_graph", &graph.to_json().unwrap())
            .await
            .unwrap()
    }

    async fn persisted(transport: &MemoryTransport, job_id: JobId) -> WorkflowGraph {
        let text = transport.job_graph(job_id).await.unwrap().unwrap();
        WorkflowGraph::parse(&text).unwrap()
    }

    #[tokio::test]
    async fn single_control_node_completes() {
        let transport = Arc::new(MemoryTransport::default());
        let graph = WorkflowGraph::new(
            "wf",
            vec![Node::new("a", "echo", Plane::Control).with_input(json!({ "x": 1 }))],
            vec![],
        );
        let job_id = submit(&transport, &graph).await;

        let outcome = executor(&transport).tick().await.unwrap();
        assert_eq!(outcome, PassOutcome::Completed { job_id });

        let state = transport.get_job_state(job_id).await.unwrap();
        assert_eq!(state.status, JobStatus::Completed);
        assert_eq!(state.progress, Progress::DONE);

        let graph = persisted(&transport, job_id).await;
        assert_eq!(graph.nodes[0].status, NodeStatus::Completed);
        assert_eq!(graph.nodes[0].output, Some(json!({ "a": { "x": 1 } })));

        let result = transport.job_result(job_id).await.unwrap().unwrap();
        assert_eq!(result, json!({ "a": { "a": { "x": 1 } } }));
        assert_eq!(transport.pending_count().await, 0);
    }

    #[tokio::test]
    async fn worker_nodes_are_handed_off() {
        let transport = Arc::new(MemoryTransport::default());
        let graph = WorkflowGraph::new(
            "wf",
            vec![
                Node::new("a", "echo", Plane::Control).with_weight(0.2),
                Node::new("b", "render_video", Plane::Worker).with_weight(0.8),
            ],
            vec![Edge::new("a", "b")],
        );
        let job_id = submit(&transport, &graph).await;
        let executor = executor(&transport);

        let outcome = executor.tick().await.unwrap();
        assert_eq!(outcome, PassOutcome::HandedOff { job_id });

        assert_eq!(transport.pending_count().await, 0);
        assert_eq!(executor.tick().await.unwrap(), PassOutcome::Idle);

        let handed = transport.stream_entries(StreamKind::Worker).await;
        assert_eq!(handed.len(), 1);
        assert_eq!(handed[0].job_id(), Some(job_id));
        let handed = WorkflowGraph::parse(&handed[0].input_text().unwrap()).unwrap();
        assert_eq!(handed.nodes[0].status, NodeStatus::Completed);
        assert_eq!(handed.nodes[1].status, NodeStatus::Pending);

        let state = transport.get_job_state(job_id).await.unwrap();
        assert_eq!(state.status, JobStatus::Running);
        assert!((state.progress.value() - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn handler_failure_fails_the_job() {
        let transport = Arc::new(MemoryTransport::default());
        let graph = WorkflowGraph::new(
            "wf",
            vec![
                Node::new("a", "boom", Plane::Control),
                Node::new("b", "echo", Plane::Control),
            ],
            vec![Edge::new("a", "b")],
        );
        let job_id = submit(&transport, &graph).await;

        let outcome = executor(&transport).tick().await.unwrap();
        assert_eq!(outcome, PassOutcome::Failed { job_id });

        let state = transport.get_job_state(job_id).await.unwrap();
        assert_eq!(state.status, JobStatus::Failed);
        assert!(state.progress.is_failed());

        let graph = persisted(&transport, job_id).await;
        let failed = &graph.nodes[0];
        assert_eq!(failed.status, NodeStatus::Failed);
        let error = failed.error.as_ref().unwrap();
        assert_eq!(error.message, "boom");
        assert_eq!(error.code.as_deref(), Some("exploded"));
        assert_eq!(graph.nodes[1].status, NodeStatus::Skipped);
        assert_eq!(transport.pending_count().await, 0);
    }

    #[tokio::test]
    async fn siblings_in_a_wave_are_both_persisted() {
        let transport = Arc::new(MemoryTransport::default());
        let graph = WorkflowGraph::new(
            "wf",
            vec![
                Node::new("root", "echo", Plane::Control),
                Node::new("left", "echo", Plane::Control),
                Node::new("right", "echo", Plane::Control),
            ],
            vec![Edge::new("root", "left"), Edge::new("root", "right")],
        );
        let job_id = submit(&transport, &graph).await;

        let outcome = executor(&transport).tick().await.unwrap();
        assert_eq!(outcome, PassOutcome::Completed { job_id });

        let graph = persisted(&transport, job_id).await;
        let left = graph.node("left").unwrap();
        let right = graph.node("right").unwrap();
        assert_eq!(left.status, NodeStatus::Completed);
        assert_eq!(right.status, NodeStatus::Completed);
        assert!(left.output.as_ref().unwrap().get("left").is_some());
        assert!(right.output.as_ref().unwrap().get("right").is_some());
    }

    #[tokio::test]
    async fn failing_sibling_lets_the_other_finish() {
        let transport = Arc::new(MemoryTransport::default());
        let graph = WorkflowGraph::new(
            "wf",
            vec![
                Node::new("ok", "echo", Plane::Control),
                Node::new("bad", "boom", Plane::Control),
            ],
            vec![],
        );
        let job_id = submit(&transport, &graph).await;

        let outcome = executor(&transport).tick().await.unwrap();
        assert_eq!(outcome, PassOutcome::Failed { job_id });

        let graph = persisted(&transport, job_id).await;
        assert_eq!(graph.node("ok").unwrap().status, NodeStatus::Completed);
        assert_eq!(graph.node("bad").unwrap().status, NodeStatus::Failed);
    }

    #[tokio::test]
    async fn missing_handler_fails_the_node() {
        let transport = Arc::new(MemoryTransport::default());
        let graph = WorkflowGraph::new(
            "wf",
            vec![Node::new("a", "script.unknown", Plane::Control)],
            vec![],
        );
        let job_id = submit(&transport, &graph).await;

        let outcome = executor(&transport).tick().await.unwrap();
        assert_eq!(outcome, PassOutcome::Failed { job_id });

        let graph = persisted(&transport, job_id).await;
        let error = graph.nodes[0].error.as_ref().unwrap();
        assert_eq!(error.message, "No handler for task script.unknown");
        assert_eq!(error.code.as_deref(), Some("no_handler"));
    }

    #[tokio::test]
    async fn failure_edges_route_around_errors() {
        let transport = Arc::new(MemoryTransport::default());
        let graph = WorkflowGraph::new(
            "wf",
            vec![
                Node::new("a", "echo", Plane::Control),
                Node::new("on_ok", "echo", Plane::Control),
                Node::new("on_err", "echo", Plane::Control),
            ],
            vec![
                Edge::new("a", "on_ok").with_kind(EdgeKind::OnSuccess),
                Edge::new("a", "on_err").with_kind(EdgeKind::OnFailure),
            ],
        );
        let job_id = submit(&transport, &graph).await;

        let outcome = executor(&transport).tick().await.unwrap();
        assert_eq!(outcome, PassOutcome::Completed { job_id });

        let graph = persisted(&transport, job_id).await;
        assert_eq!(graph.node("on_ok").unwrap().status, NodeStatus::Completed);
        assert_eq!(graph.node("on_err").unwrap().status, NodeStatus::Skipped);
    }

    #[tokio::test]
    async fn invalid_graph_is_acknowledged_and_failed() {
        let transport = Arc::new(MemoryTransport::default());
        let mut graph = WorkflowGraph::new(
            "wf",
            vec![
                Node::new("a", "echo", Plane::Control),
                Node::new("b", "echo", Plane::Control),
            ],
            vec![Edge::new("a", "b")],
        );
        graph.edges.push(Edge::new("b", "a"));
        let job_id = submit(&transport, &graph).await;
        let executor = executor(&transport);

        let err = executor.tick().await.unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidGraph { .. }));
        assert_eq!(err.job_id(), Some(job_id));

        let state = transport.get_job_state(job_id).await.unwrap();
        assert_eq!(state.status, JobStatus::Failed);
        assert_eq!(transport.pending_count().await, 0);
        assert_eq!(executor.tick().await.unwrap(), PassOutcome::Idle);
    }

    #[tokio::test]
    async fn entry_without_job_id_is_acknowledged() {
        let transport = Arc::new(MemoryTransport::default());
        transport
            .push_entry(StreamKind::Control, JobEntry::default())
            .await
            .unwrap();
        let executor = executor(&transport);

        let err = executor.tick().await.unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::MalformedEntry { job_id: None, .. }
        ));
        assert_eq!(transport.pending_count().await, 0);
        assert_eq!(executor.tick().await.unwrap(), PassOutcome::Idle);
    }

    #[tokio::test]
    async fn resumes_from_a_partially_completed_graph() {
        let transport = Arc::new(MemoryTransport::default());
        let mut graph = WorkflowGraph::new(
            "wf",
            vec![
                Node::new("a", "boom", Plane::Control).with_weight(0.5),
                Node::new("b", "echo", Plane::Control).with_weight(0.5),
            ],
            vec![Edge::new("a", "b")],
        );
        graph.nodes[0].complete(json!({ "seed": 7 }));
        let job_id = submit(&transport, &graph).await;

        let outcome = executor(&transport).tick().await.unwrap();
        assert_eq!(outcome, PassOutcome::Completed { job_id });

        let graph = persisted(&transport, job_id).await;
        assert_eq!(
            graph.nodes[1].output,
            Some(json!({ "b": { "seed": 7 } }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn redelivered_entries_resume_from_the_persisted_graph() {
        let transport = Arc::new(MemoryTransport::new(
            TransportConfig::default().with_ack_wait_secs(30),
        ));
        let graph = WorkflowGraph::new(
            "wf",
            vec![
                Node::new("a", "boom", Plane::Control),
                Node::new("b", "echo", Plane::Control),
            ],
            vec![Edge::new("a", "b")],
        );
        let job_id = submit(&transport, &graph).await;

        // A pass that persisted its first wave and then lost the entry.
        let first = transport.claim_control_entry("executor-a").await.unwrap().unwrap();
        assert_eq!(first.delivered, 1);
        let mut snapshot = graph.clone();
        snapshot.nodes[0].complete(json!({ "frame": 1 }));
        transport
            .set_job_payload(job_id, &snapshot.to_json().unwrap())
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;

        let outcome = executor(&transport).tick().await.unwrap();
        assert_eq!(outcome, PassOutcome::Completed { job_id });

        let graph = persisted(&transport, job_id).await;
        assert_eq!(graph.nodes[0].output, Some(json!({ "frame": 1 })));
        assert_eq!(graph.nodes[1].status, NodeStatus::Completed);
        assert_eq!(transport.pending_count().await, 0);
    }
}
