//! Workflow graph model and validation.
//!
//! - [`WorkflowGraph`]: the wire document exchanged between planes
//! - [`Node`] and [`Edge`]: flat node and edge lists keyed by [`NodeId`]
//! - [`validate_dag`]: structural checks run before any node executes
//! - [`wire_schema`]: the declarative schema generated from these types

mod dag;
mod edge;
mod node;
mod node_id;
mod schema;
mod workflow;

pub use dag::validate_dag;
pub use edge::{Edge, EdgeKind};
pub use node::{Node, NodeError, NodeStatus, Plane, Retries};
pub use node_id::NodeId;
pub use schema::{GRAPH_SCHEMA_VERSION, check_wire_schema, wire_schema};
pub use workflow::WorkflowGraph;
