//! Capability manifest format.

use std::collections::HashSet;
use std::path::Path;

use jiff::Timestamp;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display};

use crate::error::RegistryError;
use crate::graph::Plane;

const BUILTIN_MANIFEST: &str = include_str!("capabilities.json");

/// Declarative description of every task the planes can run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityManifest {
    pub capabilities: Vec<Capability>,
}

impl CapabilityManifest {
    /// Parses a manifest document.
    pub fn from_json(text: &str) -> Result<Self, RegistryError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads a manifest file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// The manifest of the built-in tasks and the worker tasks the built-in
    /// pipelines reference.
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::from_json(BUILTIN_MANIFEST)
    }

    /// Looks up a capability by id.
    pub fn get(&self, id: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|capability| capability.id == id)
    }

    /// Combines the control-plane capabilities of this manifest with the
    /// manifest a worker plane reported.
    ///
    /// Worker entries must be worker-plane tasks, and no task id may appear
    /// twice across both planes.
    pub fn merge(&self, worker: &CapabilityManifest) -> Result<MergedManifest, RegistryError> {
        let control: Vec<_> = self
            .capabilities
            .iter()
            .filter(|capability| capability.plane == Plane::Control)
            .cloned()
            .collect();

        let mut seen: HashSet<&str> = control.iter().map(|c| c.id.as_str()).collect();
        for capability in &worker.capabilities {
            if capability.plane != Plane::Worker {
                return Err(RegistryError::InvalidCapability {
                    task: capability.id.clone(),
                    reason: format!("reported by the worker plane as {}", capability.plane),
                });
            }
            if !seen.insert(capability.id.as_str()) {
                return Err(RegistryError::DuplicateTask {
                    task: capability.id.clone(),
                });
            }
        }

        let sources = ManifestSources {
            control: ManifestSource {
                plane: Plane::Control,
                count: control.len(),
            },
            worker: ManifestSource {
                plane: Plane::Worker,
                count: worker.capabilities.len(),
            },
        };

        let mut capabilities = control;
        capabilities.extend(worker.capabilities.iter().cloned());

        Ok(MergedManifest {
            generated_at: Timestamp::now(),
            capabilities,
            sources,
        })
    }
}

/// Capabilities of both planes, as answered to a capabilities request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedManifest {
    /// When the manifest was assembled.
    pub generated_at: Timestamp,
    /// Control-plane capabilities followed by worker-plane ones.
    pub capabilities: Vec<Capability>,
    pub sources: ManifestSources,
}

/// Where the capabilities of a [`MergedManifest`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSources {
    pub control: ManifestSource,
    pub worker: ManifestSource,
}

/// One plane's contribution to a [`MergedManifest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSource {
    pub plane: Plane,
    /// Number of capabilities the plane contributed.
    pub count: usize,
}

/// One task a plane can run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    /// Task id referenced by graph nodes.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    /// Plane that runs the task.
    pub plane: Plane,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<CapabilityRuntime>,
    /// Handler binding; required for control-plane tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<HandlerBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io: Option<CapabilityIo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<CapabilityParameter>,
}

/// Hardware class a task needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RuntimeKind {
    Cpu,
    Gpu,
}

/// Execution limits of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRuntime {
    pub kind: RuntimeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
}

/// Symbolic binding of a task to a statically known handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandlerBinding {
    pub module: String,
    pub method: String,
}

impl HandlerBinding {
    /// Creates a binding.
    pub fn new(module: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            method: method.into(),
        }
    }

    /// The `module.method` key handlers are catalogued under.
    pub fn key(&self) -> String {
        format!("{}.{}", self.module, self.method)
    }
}

/// JSON schemas of a task's input and output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityIo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

/// A declared task parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}
