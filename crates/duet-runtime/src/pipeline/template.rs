use semver::Version;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::error::WorkflowResult;
use crate::graph::{Edge, Node, NodeId, validate_dag};

/// Request modes that expand a registered template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(AsRefStr, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PipelineMode {
    /// Train models, then generate.
    TrainGenerate,
    /// Generate with already trained models.
    Generate,
}

/// Role of a worker node within a template layout.
///
/// Requests address stage nodes by position: `trainInput[i]` and
/// `genInput[i]` target the i-th training and generation node, `renderInput`
/// targets the render node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    /// Runs in parallel after the script node.
    Train,
    /// Runs in a chain after training.
    Generate,
    /// Joins everything before it.
    Render,
}

/// A named, versioned graph skeleton.
///
/// Templates are never mutated; [`PipelineTemplate::instantiate`] returns a
/// fresh copy with every node reset to `pending`.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineTemplate {
    /// Variant name, e.g. `svd_wav2lip`.
    pub variant: String,
    /// Mode this form of the variant serves.
    pub mode: PipelineMode,
    /// Human-readable label.
    pub label: String,
    /// Template version.
    pub version: Version,
    /// Default nodes.
    pub nodes: Vec<Node>,
    /// Default edges.
    pub edges: Vec<Edge>,
    /// Stage of each staged node, in insertion order.
    pub stages: Vec<(NodeId, PipelineStage)>,
}

impl PipelineTemplate {
    /// Creates an empty template.
    pub fn new(
        variant: impl Into<String>,
        mode: PipelineMode,
        label: impl Into<String>,
        version: Version,
    ) -> Self {
        Self {
            variant: variant.into(),
            mode,
            label: label.into(),
            version,
            nodes: Vec::new(),
            edges: Vec::new(),
            stages: Vec::new(),
        }
    }

    /// Appends a node.
    #[must_use]
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Appends a node playing `stage` in the layout.
    #[must_use]
    pub fn with_stage_node(mut self, stage: PipelineStage, node: Node) -> Self {
        self.stages.push((node.id.clone(), stage));
        self.with_node(node)
    }

    /// Ids of the nodes of `stage`, in layout order.
    pub fn stage_nodes(&self, stage: PipelineStage) -> impl Iterator<Item = &NodeId> {
        self.stages
            .iter()
            .filter(move |(_, s)| *s == stage)
            .map(|(id, _)| id)
    }

    /// Appends an edge.
    #[must_use]
    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Checks the skeleton is a valid DAG.
    pub fn check(&self) -> WorkflowResult<()> {
        validate_dag(&self.nodes, &self.edges)
    }

    /// Deep-copies the skeleton with every node reset to `pending`.
    pub fn instantiate(&self) -> (Vec<Node>, Vec<Edge>) {
        let mut nodes = self.nodes.clone();
        nodes.iter_mut().for_each(Node::reset);
        (nodes, self.edges.clone())
    }
}
