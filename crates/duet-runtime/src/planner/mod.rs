//! Turns client requests into validated workflow graphs.
//!
//! The planner is a pure transform: it dispatches on the request `mode`,
//! either passing a caller-supplied graph through (`process`) or expanding a
//! registered [`PipelineTemplate`](crate::pipeline::PipelineTemplate), then
//! validates, stamps and re-checks the result against the wire schema.

mod config;
mod request;

use std::str::FromStr;
use std::sync::Arc;

pub use config::PlannerConfig;
pub use request::{GraphTemplate, JobGraphRequest};
use request::RawGraph;
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::Validate;

use crate::error::{PlannerError, WorkflowError};
use crate::graph::{GRAPH_SCHEMA_VERSION, Node, WorkflowGraph, check_wire_schema, validate_dag};
use crate::pipeline::{
    PipelineMode, PipelineRegistry, PipelineStage, PipelineTemplate, SCRIPT_NODE_ID,
    builtin_script_input,
};
use crate::TRACING_TARGET_PLANNER;

const PROCESS_MODE: &str = "process";
const PLANNER_IDENTITY: &str = "control-plane";

// Request fields consumed by the build and left out of the pipeline metadata.
const GRAPH_FIELD: &str = "graph";
const SCRIPT_INPUT_FIELD: &str = "scriptInput";
const PARAMS_FIELD: &str = "params";
const TRAIN_INPUT_FIELD: &str = "trainInput";
const GEN_INPUT_FIELD: &str = "genInput";
const RENDER_INPUT_FIELD: &str = "renderInput";

/// Builds workflow graphs from client requests.
#[derive(Debug, Clone)]
pub struct Planner {
    config: PlannerConfig,
    pipelines: Arc<PipelineRegistry>,
}

impl Planner {
    /// Creates a planner over a set of pipeline templates.
    pub fn new(config: PlannerConfig, pipelines: Arc<PipelineRegistry>) -> Self {
        Self { config, pipelines }
    }

    /// Returns the planner configuration.
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Builds the nodes and edges a request describes.
    ///
    /// Fails when the request is empty, its mode is missing or unknown, a
    /// mode-specific field is absent, or the variant is not registered.
    pub fn build_graph(&self, request: &Value) -> Result<GraphTemplate, PlannerError> {
        let fields = match request {
            Value::Null => return Err(PlannerError::EmptyRequest),
            Value::Object(fields) if fields.is_empty() => return Err(PlannerError::EmptyRequest),
            Value::Object(fields) => fields,
            _ => {
                return Err(PlannerError::MalformedRequest(
                    "request must be a JSON object".to_owned(),
                ));
            }
        };

        let mode = match fields.get("mode") {
            None | Some(Value::Null) => return Err(PlannerError::MissingMode),
            Some(Value::String(mode)) if mode.is_empty() => return Err(PlannerError::MissingMode),
            Some(Value::String(mode)) => mode.as_str(),
            Some(_) => {
                return Err(PlannerError::MalformedRequest(
                    "mode must be a string".to_owned(),
                ));
            }
        };

        if mode == PROCESS_MODE {
            return Self::process_graph(fields);
        }

        let pipeline_mode = PipelineMode::from_str(mode).map_err(|_| PlannerError::UnknownMode {
            mode: mode.to_owned(),
        })?;
        self.template_graph(pipeline_mode, fields)
    }

    fn process_graph(fields: &Map<String, Value>) -> Result<GraphTemplate, PlannerError> {
        let raw = match fields.get(GRAPH_FIELD) {
            None | Some(Value::Null) => {
                return Err(PlannerError::MissingField {
                    mode: PROCESS_MODE.to_owned(),
                    field: GRAPH_FIELD,
                });
            }
            Some(Value::String(text)) => serde_json::from_str::<RawGraph>(text),
            Some(document) => serde_json::from_value::<RawGraph>(document.clone()),
        }
        .map_err(|e| PlannerError::MalformedRequest(format!("graph: {e}")))?;

        Ok(GraphTemplate {
            nodes: raw.nodes,
            edges: raw.edges,
            pipeline: pipeline_fields(fields),
        })
    }

    fn template_graph(
        &self,
        mode: PipelineMode,
        fields: &Map<String, Value>,
    ) -> Result<GraphTemplate, PlannerError> {
        let missing = |field| PlannerError::MissingField {
            mode: mode.to_string(),
            field,
        };

        let variant = fields
            .get("variant")
            .and_then(Value::as_str)
            .filter(|variant| !variant.is_empty())
            .ok_or_else(|| missing("variant"))?;

        let script_input = fields.get(SCRIPT_INPUT_FIELD).and_then(Value::as_object);
        let prompt = script_input
            .and_then(|input| input.get("prompt"))
            .and_then(Value::as_str)
            .filter(|prompt| !prompt.trim().is_empty())
            .ok_or_else(|| missing("scriptInput.prompt"))?;

        let template =
            self.pipelines
                .get(mode, variant)
                .ok_or_else(|| PlannerError::UnknownVariant {
                    mode: mode.to_string(),
                    variant: variant.to_owned(),
                })?;

        let (mut nodes, edges) = template.instantiate();

        if let Some(script) = nodes.iter_mut().find(|n| n.id.as_str() == SCRIPT_NODE_ID) {
            let mut params = self.config.script_params();
            params.extend(script.params.clone());
            if let Some(input) = script_input {
                params.extend(
                    input
                        .iter()
                        .filter(|(key, _)| key.as_str() != "prompt")
                        .map(|(k, v)| (k.clone(), v.clone())),
                );
            }
            script.params = params;
            script.input = Some(builtin_script_input(prompt));
        }

        apply_stage_inputs(&mut nodes, &template, fields)?;
        if let Some(overrides) = fields.get(PARAMS_FIELD) {
            apply_overrides(&mut nodes, overrides)?;
        }

        let mut pipeline = pipeline_fields(fields);
        pipeline.insert("label".to_owned(), Value::String(template.label.clone()));
        pipeline.insert(
            "version".to_owned(),
            Value::String(template.version.to_string()),
        );

        Ok(GraphTemplate {
            nodes,
            edges,
            pipeline,
        })
    }

    /// Builds, validates and stamps the graph for a request.
    #[tracing::instrument(skip(self, request), target = TRACING_TARGET_PLANNER)]
    pub fn plan(&self, request: JobGraphRequest) -> Result<WorkflowGraph, PlannerError> {
        let template = self.build_graph(&request.request)?;
        validate_dag(&template.nodes, &template.edges)?;
        for node in &template.nodes {
            node.validate()
                .map_err(|e| WorkflowError::schema(format!("node '{}': {e}", node.id)))?;
        }

        let mut metadata = Map::new();
        metadata.insert(
            "planner".to_owned(),
            Value::String(PLANNER_IDENTITY.to_owned()),
        );
        metadata.insert(
            "version".to_owned(),
            Value::String(self.config.planner_version.clone()),
        );
        metadata.extend(request.metadata);
        metadata.insert("pipeline".to_owned(), Value::Object(template.pipeline));

        let graph = WorkflowGraph {
            schema: GRAPH_SCHEMA_VERSION.to_owned(),
            workflow_id: request
                .workflow_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            context: request.context,
            metadata,
            nodes: template.nodes,
            edges: template.edges,
        };

        let document = serde_json::to_value(&graph)
            .map_err(|e| PlannerError::Assembly(WorkflowError::from(e)))?;
        check_wire_schema(&document).map_err(PlannerError::Assembly)?;
        graph.check().map_err(PlannerError::Assembly)?;

        tracing::debug!(
            target: TRACING_TARGET_PLANNER,
            workflow_id = %graph.workflow_id,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "Planned workflow graph"
        );

        Ok(graph)
    }

    /// Plans a request and returns the serialized graph.
    pub fn get_job_graph(&self, request: JobGraphRequest) -> Result<String, PlannerError> {
        let graph = self.plan(request)?;
        graph.to_json().map_err(PlannerError::Assembly)
    }
}

/// Request fields that are not consumed by the build.
fn pipeline_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .filter(|(key, _)| {
            !matches!(
                key.as_str(),
                GRAPH_FIELD
                    | SCRIPT_INPUT_FIELD
                    | PARAMS_FIELD
                    | TRAIN_INPUT_FIELD
                    | GEN_INPUT_FIELD
                    | RENDER_INPUT_FIELD
            )
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Merges the positional `trainInput`/`genInput` arrays and the
/// `renderInput` object into the params of the template's stage nodes.
///
/// Entries past the end of a stage and `null` entries are ignored.
fn apply_stage_inputs(
    nodes: &mut [Node],
    template: &PipelineTemplate,
    fields: &Map<String, Value>,
) -> Result<(), PlannerError> {
    let stages = [
        (TRAIN_INPUT_FIELD, PipelineStage::Train),
        (GEN_INPUT_FIELD, PipelineStage::Generate),
        (RENDER_INPUT_FIELD, PipelineStage::Render),
    ];

    for (field, stage) in stages {
        let inputs = match (stage, fields.get(field)) {
            (_, None | Some(Value::Null)) => continue,
            (PipelineStage::Render, Some(input @ Value::Object(_))) => vec![input],
            (PipelineStage::Render, Some(_)) => {
                return Err(PlannerError::MalformedRequest(format!(
                    "{field} must be an object"
                )));
            }
            (_, Some(Value::Array(inputs))) => inputs.iter().collect(),
            (_, Some(_)) => {
                return Err(PlannerError::MalformedRequest(format!(
                    "{field} must be an array"
                )));
            }
        };

        for (index, (node_id, input)) in template.stage_nodes(stage).zip(inputs).enumerate() {
            let params = match input {
                Value::Null => continue,
                Value::Object(params) => params,
                _ => {
                    return Err(PlannerError::MalformedRequest(format!(
                        "{field}[{index}] must be an object"
                    )));
                }
            };
            if let Some(node) = nodes.iter_mut().find(|node| &node.id == node_id) {
                node.params
                    .extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
    }
    Ok(())
}

/// Merges `params.<nodeId>` objects into the matching nodes.
fn apply_overrides(nodes: &mut [Node], overrides: &Value) -> Result<(), PlannerError> {
    let overrides = match overrides {
        Value::Null => return Ok(()),
        Value::Object(overrides) => overrides,
        _ => {
            return Err(PlannerError::MalformedRequest(
                "params must be an object keyed by node id".to_owned(),
            ));
        }
    };

    for (node_id, params) in overrides {
        let node = nodes
            .iter_mut()
            .find(|node| node.id.as_str() == node_id)
            .ok_or_else(|| PlannerError::UnknownNode {
                node: node_id.clone(),
            })?;
        let Value::Object(params) = params else {
            return Err(PlannerError::MalformedRequest(format!(
                "params.{node_id} must be an object"
            )));
        };
        node.params
            .extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::graph::{EdgeKind, NodeStatus};

    fn planner() -> Planner {
        Planner::new(
            PlannerConfig::default().with_version("1.2.3"),
            Arc::new(PipelineRegistry::builtin()),
        )
    }

    fn train_request() -> Value {
        json!({
            "mode": "train_generate",
            "variant": "svd_wav2lip",
            "scriptInput": { "prompt": "A lighthouse keeper", "tone": "dramatic" },
            "userId": "u-1",
        })
    }

    #[test]
    fn rejects_empty_request() {
        assert!(matches!(
            planner().build_graph(&Value::Null),
            Err(PlannerError::EmptyRequest)
        ));
        assert!(matches!(
            planner().build_graph(&json!({})),
            Err(PlannerError::EmptyRequest)
        ));
    }

    #[test]
    fn rejects_missing_or_unknown_mode() {
        assert!(matches!(
            planner().build_graph(&json!({ "variant": "sadtalker" })),
            Err(PlannerError::MissingMode)
        ));
        assert!(matches!(
            planner().build_graph(&json!({ "mode": "teleport" })),
            Err(PlannerError::UnknownMode { mode }) if mode == "teleport"
        ));
    }

    #[test]
    fn rejects_unknown_variant() {
        let request = json!({
            "mode": "train_generate",
            "variant": "f5tts_infinitetalk",
            "scriptInput": { "prompt": "hi" },
        });
        assert!(matches!(
            planner().build_graph(&request),
            Err(PlannerError::UnknownVariant { .. })
        ));
    }

    #[test]
    fn template_modes_require_prompt() {
        let request = json!({ "mode": "generate", "variant": "sadtalker", "scriptInput": {} });
        assert!(matches!(
            planner().build_graph(&request),
            Err(PlannerError::MissingField { field: "scriptInput.prompt", .. })
        ));
    }

    #[test]
    fn process_mode_requires_graph() {
        assert!(matches!(
            planner().build_graph(&json!({ "mode": "process" })),
            Err(PlannerError::MissingField { field: "graph", .. })
        ));
    }

    #[test]
    fn process_mode_passes_graph_through() {
        let graph = json!({
            "nodes": [
                { "id": "a", "task": "core.passthrough", "plane": "control" },
                { "id": "b", "task": "render_video", "plane": "worker" },
            ],
            "edges": [{ "from": "a", "to": "b" }],
        });
        let request = json!({ "mode": "process", "graph": graph.to_string(), "tag": "x" });

        let built = planner().build_graph(&request).unwrap();
        assert_eq!(built.nodes.len(), 2);
        assert_eq!(built.edges[0].kind, EdgeKind::Normal);
        assert_eq!(built.pipeline, json!({ "mode": "process", "tag": "x" }).as_object().cloned().unwrap());
    }

    #[test]
    fn cyclic_process_graph_is_rejected() {
        let request = json!({
            "mode": "process",
            "graph": {
                "nodes": [
                    { "id": "a", "task": "core.passthrough", "plane": "control" },
                    { "id": "b", "task": "core.passthrough", "plane": "control" },
                    { "id": "c", "task": "core.passthrough", "plane": "control" },
                ],
                "edges": [
                    { "from": "a", "to": "b" },
                    { "from": "b", "to": "c" },
                    { "from": "c", "to": "b" },
                ],
            },
        });
        assert!(matches!(
            planner().plan(JobGraphRequest::new(request)),
            Err(PlannerError::InvalidGraph(WorkflowError::Cycle { .. }))
        ));
    }

    #[test]
    fn template_fills_script_node() {
        let built = planner().build_graph(&train_request()).unwrap();
        let script = &built.nodes[0];

        assert_eq!(script.id.as_str(), SCRIPT_NODE_ID);
        assert_eq!(script.input, Some(json!({ "prompt": "A lighthouse keeper" })));
        assert_eq!(script.params["tone"], "dramatic");
        assert_eq!(script.params["model"], "llama3");
        assert!(!script.params.contains_key("prompt"));
        assert!(built.nodes.iter().all(|n| n.status == NodeStatus::Pending));
    }

    #[test]
    fn overrides_merge_into_named_nodes() {
        let mut request = train_request();
        request["params"] = json!({ "train_lora": { "steps": 500 } });

        let built = planner().build_graph(&request).unwrap();
        let train = built.nodes.iter().find(|n| n.id.as_str() == "train_lora").unwrap();
        assert_eq!(train.params["steps"], 500);
        assert_eq!(train.params["preset"], "svd_wav2lip");
    }

    #[test]
    fn stage_inputs_merge_by_position() {
        let request = json!({
            "mode": "generate",
            "variant": "f5tts_infinitetalk",
            "scriptInput": { "prompt": "A weather report" },
            "genInput": [{ "audioPath": "/data/ref.wav" }, null, { "ignored": true }],
            "renderInput": { "imagePath": "/data/face.png" },
            "params": { "render_video_infinitetalk": { "imagePath": "/data/override.png" } },
            "userId": "u-2",
        });

        let graph = planner().plan(JobGraphRequest::new(request)).unwrap();
        let node = |id: &str| graph.nodes.iter().find(|n| n.id.as_str() == id).unwrap();

        assert_eq!(node("f5_to_tts").params["audioPath"], "/data/ref.wav");
        assert_eq!(node("f5_to_tts").params["preset"], "f5tts_infinitetalk");
        assert!(!node("infinite_talk").params.contains_key("ignored"));
        assert_eq!(
            node("render_video_infinitetalk").params["imagePath"],
            "/data/override.png"
        );

        let pipeline = graph.metadata["pipeline"].as_object().unwrap();
        assert_eq!(pipeline["userId"], "u-2");
        for field in ["scriptInput", "genInput", "renderInput", "trainInput", "params"] {
            assert!(!pipeline.contains_key(field), "{field} leaked into metadata");
        }
    }

    #[test]
    fn train_inputs_follow_the_training_nodes() {
        let mut request = train_request();
        request["trainInput"] = json!([{ "datasetPath": "/data/lora" }, { "voicePath": "/data/voice" }]);
        request["renderInput"] = json!({ "imagePath": "/data/face.png" });

        let built = planner().build_graph(&request).unwrap();
        let node = |id: &str| built.nodes.iter().find(|n| n.id.as_str() == id).unwrap();

        assert_eq!(node("train_lora").params["datasetPath"], "/data/lora");
        assert_eq!(node("train_voice").params["voicePath"], "/data/voice");
        assert_eq!(node("render_video").params["imagePath"], "/data/face.png");
    }

    #[test]
    fn malformed_stage_inputs_are_rejected() {
        let mut request = train_request();
        request["renderInput"] = json!([{ "imagePath": "/data/face.png" }]);
        assert!(matches!(
            planner().build_graph(&request),
            Err(PlannerError::MalformedRequest(message)) if message.contains("renderInput")
        ));

        let mut request = train_request();
        request["trainInput"] = json!({ "datasetPath": "/data/lora" });
        assert!(matches!(
            planner().build_graph(&request),
            Err(PlannerError::MalformedRequest(message)) if message.contains("trainInput")
        ));
    }

    #[test]
    fn overrides_for_unknown_nodes_are_rejected() {
        let mut request = train_request();
        request["params"] = json!({ "ghost": { "steps": 1 } });
        assert!(matches!(
            planner().build_graph(&request),
            Err(PlannerError::UnknownNode { node }) if node == "ghost"
        ));
    }

    #[test]
    fn stamps_identity_and_pipeline_metadata() {
        let mut caller = Map::new();
        caller.insert("version".into(), json!("caller"));
        caller.insert("pipeline".into(), json!("overwritten?"));

        let graph = planner()
            .plan(
                JobGraphRequest::new(train_request())
                    .with_workflow_id("wf-1")
                    .with_metadata(caller),
            )
            .unwrap();

        assert_eq!(graph.schema, GRAPH_SCHEMA_VERSION);
        assert_eq!(graph.workflow_id, "wf-1");
        assert_eq!(graph.metadata["planner"], "control-plane");
        assert_eq!(graph.metadata["version"], "caller");
        assert_eq!(graph.metadata["pipeline"]["variant"], "svd_wav2lip");
        assert_eq!(graph.metadata["pipeline"]["userId"], "u-1");
        assert_eq!(graph.metadata["pipeline"]["label"], "SVD + Wav2Lip");
        assert!(graph.metadata["pipeline"].get("scriptInput").is_none());
    }

    #[test]
    fn serialized_graph_round_trips() {
        let planner = planner();
        let request = JobGraphRequest::new(train_request()).with_workflow_id("wf-2");

        let graph = planner.plan(request.clone()).unwrap();
        let text = planner.get_job_graph(request).unwrap();
        assert_eq!(WorkflowGraph::parse(&text).unwrap(), graph);
    }
}
