//! Edges and their activation kinds.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};

use super::{NodeId, NodeStatus};

/// Terminal state of the source node an edge waits for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[derive(AsRefStr, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EdgeKind {
    /// The source must complete.
    #[default]
    Normal,
    /// The source must complete. Same as `normal`, spelled out.
    OnSuccess,
    /// The source must fail.
    OnFailure,
}

impl EdgeKind {
    /// Checks an edge against the current status of its source node.
    ///
    /// Returns `Some(true)` once satisfied, `Some(false)` once the source is
    /// terminal in the wrong way, and `None` while the source is unfinished.
    pub fn satisfied_by(self, source: NodeStatus) -> Option<bool> {
        if !source.is_terminal() {
            return None;
        }

        Some(match self {
            EdgeKind::Normal | EdgeKind::OnSuccess => source == NodeStatus::Completed,
            EdgeKind::OnFailure => source == NodeStatus::Failed,
        })
    }
}

/// A dependency between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Source node.
    pub from: NodeId,
    /// Target node, eligible once the source reaches the state `kind` requires.
    pub to: NodeId,
    /// Activation kind.
    #[serde(default)]
    pub kind: EdgeKind,
    /// Free-form annotations.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Edge {
    /// Creates a `normal` edge.
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: EdgeKind::Normal,
            metadata: Map::new(),
        }
    }

    /// Sets the activation kind.
    #[must_use]
    pub fn with_kind(mut self, kind: EdgeKind) -> Self {
        self.kind = kind;
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn kind_defaults_to_normal() {
        let edge: Edge = serde_json::from_value(json!({ "from": "a", "to": "b" })).unwrap();
        assert_eq!(edge.kind, EdgeKind::Normal);
    }

    #[test]
    fn satisfaction_follows_source_outcome() {
        assert_eq!(EdgeKind::Normal.satisfied_by(NodeStatus::Running), None);
        assert_eq!(EdgeKind::Normal.satisfied_by(NodeStatus::Completed), Some(true));
        assert_eq!(EdgeKind::OnSuccess.satisfied_by(NodeStatus::Failed), Some(false));
        assert_eq!(EdgeKind::OnFailure.satisfied_by(NodeStatus::Failed), Some(true));
        assert_eq!(EdgeKind::OnFailure.satisfied_by(NodeStatus::Completed), Some(false));
        assert_eq!(EdgeKind::Normal.satisfied_by(NodeStatus::Skipped), Some(false));
    }
}
