//! Runtime error types.

use duet_nats::job::{EntryId, JobId};
use serde_json::Value;
use thiserror::Error;

use crate::graph::NodeId;

/// Result type for graph operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Structural and schema errors of a workflow graph.
///
/// Each variant names the offending node or edge. A graph failing any of
/// these checks never runs.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Two nodes share an id.
    #[error("duplicate node id '{node}'")]
    DuplicateNode {
        /// The repeated id.
        node: NodeId,
    },

    /// An edge endpoint names a node that does not exist.
    #[error("edge {from} -> {to} references unknown node '{missing}'")]
    DanglingEdge {
        /// Edge source.
        from: NodeId,
        /// Edge target.
        to: NodeId,
        /// The endpoint that does not exist.
        missing: NodeId,
    },

    /// The edge closes a cycle.
    #[error("cycle detected: edge {from} -> {to} closes a cycle")]
    Cycle {
        /// Edge source.
        from: NodeId,
        /// Edge target, already on the current path.
        to: NodeId,
    },

    /// Every node has at least one incoming edge.
    #[error("graph has no entry node")]
    NoEntryNode,

    /// The node cannot be reached from any entry node.
    #[error("node '{node}' is unreachable from every entry node")]
    Unreachable {
        /// The unreachable node.
        node: NodeId,
    },

    /// The document does not match the wire schema.
    #[error("graph violates the wire schema: {}", details.join("; "))]
    Schema {
        /// One message per violation, prefixed with its location.
        details: Vec<String>,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WorkflowError {
    /// Creates a schema error with a single violation.
    pub fn schema(detail: impl Into<String>) -> Self {
        Self::Schema {
            details: vec![detail.into()],
        }
    }
}

/// Request-shape errors raised while planning.
///
/// Planner errors are fatal for the request and never retried.
#[derive(Debug, Error)]
pub enum PlannerError {
    /// The request is null or an empty object.
    #[error("empty request input")]
    EmptyRequest,

    /// The request is not a JSON object or a field has the wrong type.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The request has no `mode`.
    #[error("malformed request input, mode is missing")]
    MissingMode,

    /// The mode is not one of the supported modes.
    #[error("unknown input mode '{mode}'")]
    UnknownMode {
        /// Requested mode.
        mode: String,
    },

    /// A field the mode requires is absent.
    #[error("mode '{mode}' requires field '{field}'")]
    MissingField {
        /// Requested mode.
        mode: String,
        /// Missing field path.
        field: &'static str,
    },

    /// No template is registered for the variant and mode.
    #[error("unknown variant '{variant}' for mode '{mode}'")]
    UnknownVariant {
        /// Requested mode.
        mode: String,
        /// Requested variant.
        variant: String,
    },

    /// A parameter override names a node the template does not have.
    #[error("parameter override for unknown node '{node}'")]
    UnknownNode {
        /// The unknown node id.
        node: String,
    },

    /// The built graph is structurally invalid.
    #[error("invalid graph: {0}")]
    InvalidGraph(#[from] WorkflowError),

    /// The assembled document failed the wire schema.
    ///
    /// This is a planner defect rather than a request error.
    #[error("planner produced invalid graph: {0}")]
    Assembly(#[source] WorkflowError),
}

/// A node-level handler failure.
///
/// Stored on the failed node; never aborts the executor.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct TaskError {
    /// Human-readable message.
    pub message: String,
    /// Optional machine-readable code.
    pub code: Option<String>,
    /// Optional structured details.
    pub details: Option<Value>,
}

impl TaskError {
    /// Creates an error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            details: None,
        }
    }

    /// Attaches a machine-readable code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attaches structured details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Errors building the task registry from a capability manifest.
///
/// These are configuration-time errors and abort startup.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A control-plane capability names a binding with no known handler.
    #[error("task '{task}' is bound to unknown handler '{binding}'")]
    UnboundHandler {
        /// Task id.
        task: String,
        /// `module.method` binding.
        binding: String,
    },

    /// Two capabilities share an id.
    #[error("duplicate task id '{task}'")]
    DuplicateTask {
        /// Task id.
        task: String,
    },

    /// A capability entry is incomplete.
    #[error("invalid capability '{task}': {reason}")]
    InvalidCapability {
        /// Task id.
        task: String,
        /// What is wrong.
        reason: String,
    },

    /// The manifest is not valid JSON for the manifest format.
    #[error("invalid capability manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    /// The manifest file could not be read.
    #[error("failed to read capability manifest '{path}': {source}")]
    Io {
        /// Manifest path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Loop-level executor errors.
///
/// Unlike node failures these concern the entry as a whole. When an error
/// carries an entry id the entry is acknowledged; when it also carries a job
/// id the job is marked failed.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// A transport operation failed outside any claimed entry.
    #[error("transport error: {0}")]
    Transport(#[source] duet_nats::Error),

    /// The entry lacks a job id or payload.
    #[error("entry {entry_id} is malformed: {reason}")]
    MalformedEntry {
        /// Claimed entry.
        entry_id: EntryId,
        /// Job id when it could be read.
        job_id: Option<JobId>,
        /// What is missing.
        reason: String,
    },

    /// The embedded graph failed schema or structural validation.
    #[error("entry {entry_id} of job {job_id} carries an invalid graph: {source}")]
    InvalidGraph {
        /// Claimed entry.
        entry_id: EntryId,
        /// Job the entry belongs to.
        job_id: JobId,
        /// Validation error.
        #[source]
        source: WorkflowError,
    },

    /// A transport operation failed while the entry was processed.
    #[error("transport error while processing entry {entry_id} of job {job_id}: {source}")]
    Entry {
        /// Claimed entry.
        entry_id: EntryId,
        /// Job the entry belongs to.
        job_id: JobId,
        /// Transport error.
        #[source]
        source: duet_nats::Error,
    },
}

impl ExecutorError {
    /// Entry the error concerns, if any.
    pub fn entry_id(&self) -> Option<EntryId> {
        match self {
            ExecutorError::Transport(_) => None,
            ExecutorError::MalformedEntry { entry_id, .. }
            | ExecutorError::InvalidGraph { entry_id, .. }
            | ExecutorError::Entry { entry_id, .. } => Some(*entry_id),
        }
    }

    /// Job the error concerns, if known.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            ExecutorError::Transport(_) => None,
            ExecutorError::MalformedEntry { job_id, .. } => *job_id,
            ExecutorError::InvalidGraph { job_id, .. } | ExecutorError::Entry { job_id, .. } => {
                Some(*job_id)
            }
        }
    }
}
