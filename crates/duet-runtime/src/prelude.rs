//! Prelude module for convenient imports.
//!
//! Re-exports the types needed to plan graphs, register tasks and run the executor.

pub use crate::engine::{Executor, ExecutorConfig, ExecutorConfigBuilder, PassOutcome};
pub use crate::error::{
    ExecutorError, PlannerError, RegistryError, TaskError, WorkflowError, WorkflowResult,
};
pub use crate::graph::{
    Edge, EdgeKind, GRAPH_SCHEMA_VERSION, Node, NodeError, NodeId, NodeStatus, Plane,
    WorkflowGraph, check_wire_schema, validate_dag, wire_schema,
};
pub use crate::pipeline::{PipelineMode, PipelineRegistry, PipelineTemplate};
pub use crate::planner::{JobGraphRequest, Planner, PlannerConfig};
pub use crate::registry::{
    CapabilityManifest, HandlerCatalog, TaskContext, TaskHandler, TaskRegistry, handler_fn,
};
