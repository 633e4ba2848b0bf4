use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::graph::{Edge, Node};

/// Input of [`Planner::get_job_graph`](super::Planner::get_job_graph).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobGraphRequest {
    /// Workflow id; a random one is assigned when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    /// Caller context copied into the graph unchanged.
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Caller metadata, merged over the planner identity.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// The client request dispatched on its `mode`.
    #[serde(default)]
    pub request: Value,
}

impl JobGraphRequest {
    /// Wraps a client request.
    pub fn new(request: Value) -> Self {
        Self {
            request,
            ..Self::default()
        }
    }

    /// Sets the workflow id.
    #[must_use]
    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    /// Sets the caller metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the caller context.
    #[must_use]
    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }
}

/// Nodes and edges built from a request, before stamping.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphTemplate {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    /// Request fields the build did not consume, plus template identity.
    pub pipeline: Map<String, Value>,
}

/// Caller-supplied graph in `process` mode.
#[derive(Debug, Deserialize)]
pub(super) struct RawGraph {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}
