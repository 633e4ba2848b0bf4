use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;

use super::{CapabilityManifest, HandlerCatalog, MergedManifest, TaskHandler};
use crate::TRACING_TARGET_REGISTRY;
use crate::error::RegistryError;
use crate::graph::Plane;

/// Maps task ids to handlers.
///
/// Built once at startup from a [`CapabilityManifest`]. Unknown static
/// bindings are rejected here; ids missing at execution time only fail the
/// node that references them.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    manifest: CapabilityManifest,
}

impl TaskRegistry {
    /// Creates an empty registry with an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds every control-plane capability of `manifest` through `catalog`.
    ///
    /// Worker-plane capabilities are catalogued but not bound.
    pub fn from_manifest(
        manifest: CapabilityManifest,
        catalog: &HandlerCatalog,
    ) -> Result<Self, RegistryError> {
        let mut handlers = HashMap::new();
        let mut seen = std::collections::HashSet::new();

        for capability in &manifest.capabilities {
            if !seen.insert(capability.id.as_str()) {
                return Err(RegistryError::DuplicateTask {
                    task: capability.id.clone(),
                });
            }
            if capability.plane != Plane::Control {
                continue;
            }

            let binding =
                capability
                    .handler
                    .as_ref()
                    .ok_or_else(|| RegistryError::InvalidCapability {
                        task: capability.id.clone(),
                        reason: "control-plane capability has no handler binding".to_owned(),
                    })?;
            let handler = catalog
                .resolve(binding)
                .ok_or_else(|| RegistryError::UnboundHandler {
                    task: capability.id.clone(),
                    binding: binding.key(),
                })?;
            handlers.insert(capability.id.clone(), handler);
        }

        tracing::info!(
            target: TRACING_TARGET_REGISTRY,
            capabilities = manifest.capabilities.len(),
            bound = handlers.len(),
            "Task registry built"
        );

        Ok(Self { handlers, manifest })
    }

    /// Adds a dynamically provided handler.
    ///
    /// Fails when the id is already bound.
    pub fn register(
        &mut self,
        task: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), RegistryError> {
        match self.handlers.entry(task.into()) {
            Entry::Occupied(entry) => Err(RegistryError::DuplicateTask {
                task: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                tracing::debug!(
                    target: TRACING_TARGET_REGISTRY,
                    task = %entry.key(),
                    "Registered dynamic task handler"
                );
                entry.insert(handler);
                Ok(())
            }
        }
    }

    /// Resolves a task id.
    pub fn get(&self, task: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task).cloned()
    }

    /// Returns true if a handler is bound to the id.
    pub fn contains(&self, task: &str) -> bool {
        self.handlers.contains_key(task)
    }

    /// The manifest the registry was built from; the payload of a
    /// capabilities job.
    pub fn capabilities(&self) -> &CapabilityManifest {
        &self.manifest
    }

    /// Merges the bound control-plane capabilities with a worker report.
    pub fn merged_capabilities(
        &self,
        worker: &CapabilityManifest,
    ) -> Result<MergedManifest, RegistryError> {
        self.manifest.merge(worker)
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tasks: Vec<_> = self.handlers.keys().collect();
        tasks.sort();
        f.debug_struct("TaskRegistry")
            .field("tasks", &tasks)
            .field("capabilities", &self.manifest.capabilities.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::registry::{HandlerBinding, handler_fn};

    fn catalog() -> HandlerCatalog {
        HandlerCatalog::builtin(reqwest::Client::new())
    }

    #[test]
    fn merged_capabilities_list_bound_tasks_first() {
        let registry =
            TaskRegistry::from_manifest(CapabilityManifest::builtin().unwrap(), &catalog())
                .unwrap();
        let worker = CapabilityManifest::from_json(
            r#"{"capabilities":[{"id":"render_video","plane":"worker"}]}"#,
        )
        .unwrap();

        let merged = registry.merged_capabilities(&worker).unwrap();
        let bound = merged.sources.control.count;
        assert!(merged.capabilities[..bound].iter().all(|c| registry.contains(&c.id)));
        assert_eq!(merged.capabilities[bound].id, "render_video");
    }

    #[test]
    fn builds_from_builtin_manifest() {
        let registry =
            TaskRegistry::from_manifest(CapabilityManifest::builtin().unwrap(), &catalog())
                .unwrap();

        assert!(registry.contains("script.generate_script"));
        assert!(registry.contains("core.passthrough"));
        assert!(!registry.contains("render_video"));
        assert!(registry.capabilities().get("render_video").is_some());
    }

    #[test]
    fn unknown_binding_fails_at_configuration_time() {
        let manifest = CapabilityManifest::from_json(
            &json!({
                "capabilities": [{
                    "id": "media.mux",
                    "plane": "control",
                    "handler": { "module": "media", "method": "mux" },
                }]
            })
            .to_string(),
        )
        .unwrap();

        assert!(matches!(
            TaskRegistry::from_manifest(manifest, &catalog()),
            Err(RegistryError::UnboundHandler { binding, .. }) if binding == "media.mux"
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let manifest = CapabilityManifest::from_json(
            &json!({
                "capabilities": [
                    { "id": "x", "plane": "worker" },
                    { "id": "x", "plane": "worker" },
                ]
            })
            .to_string(),
        )
        .unwrap();

        assert!(matches!(
            TaskRegistry::from_manifest(manifest, &catalog()),
            Err(RegistryError::DuplicateTask { .. })
        ));
    }

    #[test]
    fn custom_catalog_bindings_resolve() {
        let catalog = HandlerCatalog::new().with(
            HandlerBinding::new("media", "mux"),
            handler_fn(|_, input| async move { Ok(input) }),
        );
        let manifest = CapabilityManifest::from_json(
            r#"{"capabilities":[{"id":"media.mux","plane":"control","handler":{"module":"media","method":"mux"}}]}"#,
        )
        .unwrap();

        let registry = TaskRegistry::from_manifest(manifest, &catalog).unwrap();
        assert!(registry.get("media.mux").is_some());
    }

    #[test]
    fn dynamic_registration_is_a_runtime_fallback() {
        let mut registry = TaskRegistry::new();
        let handler = handler_fn(|_, input| async move { Ok(input) });

        registry.register("plugin.echo", handler.clone()).unwrap();
        assert!(registry.get("plugin.echo").is_some());
        assert!(registry.register("plugin.echo", handler).is_err());
        assert!(registry.get("plugin.missing").is_none());
    }
}
