//! The workflow graph document.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

use super::{Edge, GRAPH_SCHEMA_VERSION, Node, NodeId, NodeStatus, Plane, check_wire_schema};
use crate::error::{WorkflowError, WorkflowResult};

/// A workflow graph as exchanged between planes.
///
/// Nodes and edges are flat lists keyed by [`NodeId`]; adjacency is
/// recomputed from the edge list whenever it is needed. Executors mutate
/// node slots in place and persist the whole document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    /// Wire format version, [`GRAPH_SCHEMA_VERSION`].
    pub schema: String,
    /// Caller-assigned workflow id.
    pub workflow_id: String,
    /// Caller context carried along unchanged.
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Planner identity, pipeline metadata and caller metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[validate(length(min = 1), nested)]
    #[schemars(length(min = 1))]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl WorkflowGraph {
    /// Creates a graph stamped with the current schema version.
    pub fn new(workflow_id: impl Into<String>, nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self {
            schema: GRAPH_SCHEMA_VERSION.to_owned(),
            workflow_id: workflow_id.into(),
            context: Map::new(),
            metadata: Map::new(),
            nodes,
            edges,
        }
    }

    /// Parses and fully validates a serialized graph.
    pub fn parse(text: &str) -> WorkflowResult<Self> {
        let document: Value = serde_json::from_str(text)?;
        Self::from_document(document)
    }

    /// Validates a raw document against the wire schema, decodes it and runs
    /// the structural checks.
    pub fn from_document(document: Value) -> WorkflowResult<Self> {
        check_wire_schema(&document)?;
        let graph: Self = serde_json::from_value(document)?;
        graph.check()?;
        Ok(graph)
    }

    /// Checks the schema version, field ranges and DAG structure.
    pub fn check(&self) -> WorkflowResult<()> {
        if self.schema != GRAPH_SCHEMA_VERSION {
            return Err(WorkflowError::schema(format!(
                "unsupported schema '{}', expected '{GRAPH_SCHEMA_VERSION}'",
                self.schema
            )));
        }

        Validate::validate(self).map_err(|e| WorkflowError::schema(e.to_string()))?;
        super::validate_dag(&self.nodes, &self.edges)
    }

    /// Serializes the graph.
    pub fn to_json(&self) -> WorkflowResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns the position of a node in [`WorkflowGraph::nodes`].
    pub fn position(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|node| node.id.as_str() == id)
    }

    /// Returns a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id.as_str() == id)
    }

    /// Returns the edges pointing at a node.
    pub fn incoming<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |edge| &edge.to == id)
    }

    fn predecessors_satisfied(&self, node: &Node) -> Option<bool> {
        let mut satisfied = Some(true);
        for edge in self.incoming(&node.id) {
            let source = self.node(edge.from.as_str())?;
            match edge.kind.satisfied_by(source.status) {
                Some(true) => {}
                Some(false) => return Some(false),
                None => satisfied = None,
            }
        }
        satisfied
    }

    /// Positions of the nodes of `plane` that may run now.
    ///
    /// A node is ready when it is neither terminal nor running and every
    /// incoming edge is satisfied by its source.
    pub fn ready_nodes(&self, plane: Plane) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| {
                node.plane == plane
                    && !node.status.is_terminal()
                    && node.status != NodeStatus::Running
                    && self.predecessors_satisfied(node) == Some(true)
            })
            .map(|(index, _)| index)
            .collect()
    }

    /// Marks nodes of `plane` whose incoming edges can never be satisfied as
    /// skipped, cascading through their successors.
    ///
    /// Returns the skipped node ids.
    pub fn skip_unsatisfiable(&mut self, plane: Plane) -> Vec<NodeId> {
        let mut skipped = Vec::new();
        loop {
            let blocked: Vec<usize> = self
                .nodes
                .iter()
                .enumerate()
                .filter(|(_, node)| {
                    node.plane == plane
                        && !node.status.is_terminal()
                        && node.status != NodeStatus::Running
                        && self.predecessors_satisfied(node) == Some(false)
                })
                .map(|(index, _)| index)
                .collect();

            if blocked.is_empty() {
                return skipped;
            }

            for index in blocked {
                let node = &mut self.nodes[index];
                node.status = NodeStatus::Skipped;
                skipped.push(node.id.clone());
            }
        }
    }

    /// Builds the input handed to the node at `index`.
    ///
    /// Predecessor outputs are merged in edge order: object outputs key by
    /// key, other values under the predecessor's id. Failed predecessors
    /// contribute `{"error": ..}` under their id. The node's own static
    /// input is applied last and wins on conflicts.
    pub fn merged_input(&self, index: usize) -> Value {
        let node = &self.nodes[index];
        let mut merged = Map::new();

        for edge in self.incoming(&node.id) {
            let Some(source) = self.node(edge.from.as_str()) else {
                continue;
            };
            match (&source.output, &source.error) {
                (Some(Value::Object(output)), _) => {
                    merged.extend(output.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                (Some(Value::Null) | None, Some(error)) => {
                    let error = serde_json::to_value(error).unwrap_or(Value::Null);
                    let mut entry = Map::new();
                    entry.insert("error".to_owned(), error);
                    merged.insert(source.id.to_string(), Value::Object(entry));
                }
                (Some(Value::Null) | None, None) => {}
                (Some(output), _) => {
                    merged.insert(source.id.to_string(), output.clone());
                }
            }
        }

        match &node.input {
            Some(Value::Object(input)) => {
                merged.extend(input.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Some(Value::Null) | None => {}
            Some(other) => {
                merged.insert("input".to_owned(), other.clone());
            }
        }

        Value::Object(merged)
    }

    /// Summed progress weight of completed nodes.
    pub fn completed_weight(&self) -> f64 {
        self.nodes
            .iter()
            .filter(|node| node.status == NodeStatus::Completed)
            .map(|node| node.progress_weight)
            .sum()
    }

    /// Every node is completed or skipped.
    pub fn is_complete(&self) -> bool {
        self.nodes.iter().all(|node| node.status.is_done())
    }

    /// Nodes that failed.
    pub fn failed_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(|node| node.status == NodeStatus::Failed)
    }

    /// At least one node failed.
    pub fn has_failed(&self) -> bool {
        self.failed_nodes().next().is_some()
    }

    /// Returns every node to `pending` and clears execution results.
    pub fn reset_nodes(&mut self) {
        self.nodes.iter_mut().for_each(Node::reset);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::graph::EdgeKind;

    fn node(id: &str, plane: Plane) -> Node {
        Node::new(id, "core.passthrough", plane)
    }

    fn chain() -> WorkflowGraph {
        WorkflowGraph::new(
            "wf",
            vec![
                node("a", Plane::Control),
                node("b", Plane::Control),
                node("c", Plane::Worker),
            ],
            vec![Edge::new("a", "b"), Edge::new("b", "c")],
        )
    }

    #[test]
    fn serialization_preserves_structure() {
        let mut graph = chain();
        graph.nodes[0].params.insert("tone".into(), json!("casual"));
        graph.edges[1].kind = EdgeKind::OnSuccess;

        let parsed = WorkflowGraph::parse(&graph.to_json().unwrap()).unwrap();
        assert_eq!(parsed, graph);
    }

    #[test]
    fn rejects_unknown_schema_version() {
        let mut graph = chain();
        graph.schema = "workflow.v0".into();
        let text = graph.to_json().unwrap();
        assert!(matches!(
            WorkflowGraph::parse(&text),
            Err(WorkflowError::Schema { .. })
        ));
    }

    #[test]
    fn rejects_structurally_invalid_document() {
        let mut graph = chain();
        graph.edges.push(Edge::new("c", "a"));
        let text = graph.to_json().unwrap();
        assert!(matches!(
            WorkflowGraph::parse(&text),
            Err(WorkflowError::Cycle { .. })
        ));
    }

    #[test]
    fn readiness_follows_predecessors() {
        let mut graph = chain();
        assert_eq!(graph.ready_nodes(Plane::Control), vec![0]);

        graph.nodes[0].complete(json!({}));
        assert_eq!(graph.ready_nodes(Plane::Control), vec![1]);

        graph.nodes[1].complete(json!({}));
        assert!(graph.ready_nodes(Plane::Control).is_empty());
        assert_eq!(graph.ready_nodes(Plane::Worker), vec![2]);
    }

    #[test]
    fn failure_branch_runs_only_on_failure() {
        let mut graph = WorkflowGraph::new(
            "wf",
            vec![
                node("a", Plane::Control),
                node("ok", Plane::Control),
                node("cleanup", Plane::Control),
                node("after", Plane::Control),
            ],
            vec![
                Edge::new("a", "ok").with_kind(EdgeKind::OnSuccess),
                Edge::new("a", "cleanup").with_kind(EdgeKind::OnFailure),
                Edge::new("cleanup", "after"),
            ],
        );

        graph.nodes[0].complete(json!({}));
        assert_eq!(graph.ready_nodes(Plane::Control), vec![1]);

        let skipped = graph.skip_unsatisfiable(Plane::Control);
        assert_eq!(skipped, vec![NodeId::from("cleanup"), NodeId::from("after")]);
        assert!(graph.nodes[3].status.is_done());
    }

    #[test]
    fn merges_predecessor_outputs() {
        let mut graph = WorkflowGraph::new(
            "wf",
            vec![
                node("a", Plane::Control),
                node("b", Plane::Control),
                node("c", Plane::Control).with_input(json!({ "prompt": "hi" })),
            ],
            vec![Edge::new("a", "c"), Edge::new("b", "c")],
        );
        graph.nodes[0].complete(json!({ "stagePrompt": "stage" }));
        graph.nodes[1].complete(json!(42));

        assert_eq!(
            graph.merged_input(2),
            json!({ "stagePrompt": "stage", "b": 42, "prompt": "hi" })
        );
    }

    #[test]
    fn completed_weight_sums_completed_nodes() {
        let mut graph = chain();
        graph.nodes[0].progress_weight = 0.25;
        graph.nodes[1].progress_weight = 0.5;
        graph.nodes[0].complete(json!({}));
        assert_eq!(graph.completed_weight(), 0.25);
        assert!(!graph.is_complete());
    }
}
