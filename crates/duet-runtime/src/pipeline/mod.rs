//! Named, versioned graph skeletons the planner expands into workflows.

mod builtin;
mod template;

use std::collections::HashMap;
use std::sync::Arc;

pub use builtin::{SCRIPT_NODE_ID, SCRIPT_TASK};
pub(crate) use builtin::script_input as builtin_script_input;
pub use template::{PipelineMode, PipelineStage, PipelineTemplate};

use crate::error::WorkflowResult;

/// Immutable templates keyed by mode and variant.
#[derive(Debug, Clone, Default)]
pub struct PipelineRegistry {
    templates: HashMap<(PipelineMode, String), Arc<PipelineTemplate>>,
}

impl PipelineRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in variants.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for template in builtin::templates() {
            registry.templates.insert(
                (template.mode, template.variant.clone()),
                Arc::new(template),
            );
        }
        registry
    }

    /// Registers a template after checking its structure.
    ///
    /// Replaces any template previously registered for the same mode and
    /// variant.
    pub fn register(&mut self, template: PipelineTemplate) -> WorkflowResult<()> {
        template.check()?;
        self.templates.insert(
            (template.mode, template.variant.clone()),
            Arc::new(template),
        );
        Ok(())
    }

    /// Looks up the template for a variant in a mode.
    pub fn get(&self, mode: PipelineMode, variant: &str) -> Option<Arc<PipelineTemplate>> {
        self.templates
            .get(&(mode, variant.to_owned()))
            .cloned()
    }

    /// Variants registered for a mode, sorted.
    pub fn variants(&self, mode: PipelineMode) -> Vec<&str> {
        let mut variants: Vec<_> = self
            .templates
            .keys()
            .filter(|(m, _)| *m == mode)
            .map(|(_, variant)| variant.as_str())
            .collect();
        variants.sort_unstable();
        variants
    }
}
