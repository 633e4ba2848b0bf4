//! Task id resolution.
//!
//! A [`TaskRegistry`] is built once from a [`CapabilityManifest`], binding
//! each control-plane capability to a handler from a [`HandlerCatalog`].

mod catalog;
mod handler;
mod manifest;
mod task_registry;

pub use catalog::HandlerCatalog;
pub use handler::{TaskContext, TaskHandler, UpdateSink, handler_fn};
pub use manifest::{
    Capability, CapabilityIo, CapabilityManifest, CapabilityParameter, CapabilityRuntime,
    HandlerBinding, ManifestSource, ManifestSources, MergedManifest, RuntimeKind,
};
pub use task_registry::TaskRegistry;
