use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{HandlerBinding, TaskHandler};
use crate::task::{PassthroughTask, ScriptTask};

/// Statically known handlers keyed by `module.method`.
#[derive(Clone, Default)]
pub struct HandlerCatalog {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog holding the built-in handlers.
    pub fn builtin(http: reqwest::Client) -> Self {
        Self::new()
            .with(
                HandlerBinding::new("script", "generate_script"),
                Arc::new(ScriptTask::new(http)),
            )
            .with(
                HandlerBinding::new("core", "passthrough"),
                Arc::new(PassthroughTask),
            )
    }

    /// Adds a handler under a binding.
    #[must_use]
    pub fn with(mut self, binding: HandlerBinding, handler: Arc<dyn TaskHandler>) -> Self {
        self.bind(binding, handler);
        self
    }

    /// Adds a handler under a binding, replacing any previous one.
    pub fn bind(&mut self, binding: HandlerBinding, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(binding.key(), handler);
    }

    /// Resolves a binding.
    pub fn resolve(&self, binding: &HandlerBinding) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&binding.key()).cloned()
    }
}

impl fmt::Debug for HandlerCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bindings: Vec<_> = self.handlers.keys().collect();
        bindings.sort();
        f.debug_struct("HandlerCatalog")
            .field("bindings", &bindings)
            .finish()
    }
}
