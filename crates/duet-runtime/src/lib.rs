#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod engine;
mod error;
pub mod graph;
pub mod pipeline;
pub mod planner;
pub mod registry;
pub mod task;

#[doc(hidden)]
pub mod prelude;

pub use error::{
    ExecutorError, PlannerError, RegistryError, TaskError, WorkflowError, WorkflowResult,
};

/// Tracing target for runtime operations.
pub const TRACING_TARGET: &str = "duet_runtime";

/// Tracing target for planning.
pub const TRACING_TARGET_PLANNER: &str = "duet_runtime::planner";

/// Tracing target for the task registry and built-in tasks.
pub const TRACING_TARGET_REGISTRY: &str = "duet_runtime::registry";

/// Tracing target for the executor loop and graph passes.
pub const TRACING_TARGET_EXECUTOR: &str = "duet_runtime::executor";
