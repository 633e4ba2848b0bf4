//! Workflow nodes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};
use validator::Validate;

use super::NodeId;
use crate::TaskError;

/// The plane whose executor owns a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[derive(AsRefStr, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Plane {
    /// Runs in this process.
    Control,
    /// Runs on the remote worker plane.
    Worker,
}

/// Lifecycle state of a node.
///
/// `ready` exists for wire compatibility; readiness is always computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[derive(AsRefStr, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeStatus {
    /// Completed, failed and skipped nodes never change again.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Skipped
        )
    }

    /// Completed and skipped nodes count as done for job completion.
    #[inline]
    pub fn is_done(self) -> bool {
        matches!(self, NodeStatus::Completed | NodeStatus::Skipped)
    }
}

/// Error stored on a failed node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl NodeError {
    /// Creates an error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            details: None,
        }
    }
}

impl From<TaskError> for NodeError {
    fn from(error: TaskError) -> Self {
        Self {
            message: error.message,
            code: error.code,
            details: error.details,
        }
    }
}

/// Retry bookkeeping. Carried on the wire, not acted on by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Retries {
    #[serde(default)]
    pub attempt: u32,
    #[validate(range(min = 1))]
    #[schemars(range(min = 1))]
    pub max_attempts: u32,
}

/// One unit of work in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique id within the graph.
    pub id: NodeId,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Task id resolved through the task registry.
    pub task: String,
    /// Owning plane.
    pub plane: Plane,
    /// Lifecycle state.
    #[serde(default)]
    pub status: NodeStatus,
    /// Handler parameters.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
    /// Static input, merged with predecessor outputs at execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Handler output once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Handler error once failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
    /// Share of job progress this node accounts for.
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0))]
    #[schemars(range(min = 0.0, max = 1.0))]
    pub progress_weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub retries: Option<Retries>,
}

impl Node {
    /// Creates a pending node.
    pub fn new(id: impl Into<NodeId>, task: impl Into<String>, plane: Plane) -> Self {
        Self {
            id: id.into(),
            name: None,
            task: task.into(),
            plane,
            status: NodeStatus::Pending,
            params: Map::new(),
            input: None,
            output: None,
            error: None,
            progress_weight: 0.0,
            retries: None,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the progress weight.
    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.progress_weight = weight;
        self
    }

    /// Sets the handler parameters.
    #[must_use]
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// Sets the static input.
    #[must_use]
    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    /// Clears execution results and returns the node to `pending`.
    pub fn reset(&mut self) {
        self.status = NodeStatus::Pending;
        self.output = None;
        self.error = None;
        if let Some(retries) = self.retries.as_mut() {
            retries.attempt = 0;
        }
    }

    /// Records a successful execution.
    pub fn complete(&mut self, output: Value) {
        self.status = NodeStatus::Completed;
        self.output = Some(output);
        self.error = None;
    }

    /// Records a failed execution.
    pub fn fail(&mut self, error: impl Into<NodeError>) {
        self.status = NodeStatus::Failed;
        self.error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use validator::Validate;

    use super::*;

    #[test]
    fn decodes_minimal_node() {
        let node: Node = serde_json::from_value(json!({
            "id": "script",
            "task": "script.generate_script",
            "plane": "control",
        }))
        .unwrap();

        assert_eq!(node.status, NodeStatus::Pending);
        assert_eq!(node.progress_weight, 0.0);
        assert!(node.params.is_empty());
    }

    #[test]
    fn weight_outside_unit_range_is_invalid() {
        let node = Node::new("a", "core.passthrough", Plane::Control).with_weight(1.5);
        assert!(node.validate().is_err());
    }

    #[test]
    fn zero_max_attempts_is_invalid() {
        let mut node = Node::new("a", "core.passthrough", Plane::Control);
        node.retries = Some(Retries {
            attempt: 0,
            max_attempts: 0,
        });
        assert!(node.validate().is_err());
    }

    #[test]
    fn reset_clears_results() {
        let mut node = Node::new("a", "core.passthrough", Plane::Control);
        node.fail(NodeError::new("boom"));
        node.reset();
        assert_eq!(node.status, NodeStatus::Pending);
        assert!(node.error.is_none());
    }
}
