//! Declarative wire schema of the workflow graph.
//!
//! The schema is generated from the Rust types, so the document checked here
//! and the one deserialized afterwards cannot drift apart.

use std::sync::LazyLock;

use jsonschema::Validator;
use schemars::generate::SchemaSettings;
use serde_json::Value;

use super::WorkflowGraph;
use crate::error::{WorkflowError, WorkflowResult};

/// Value of the `schema` field of every graph this crate produces.
pub const GRAPH_SCHEMA_VERSION: &str = "workflow.v1";

static VALIDATOR: LazyLock<Result<Validator, String>> = LazyLock::new(|| {
    let schema = wire_schema().map_err(|e| e.to_string())?;
    Validator::new(&schema).map_err(|e| e.to_string())
});

/// Returns the draft-07 JSON schema of [`WorkflowGraph`].
pub fn wire_schema() -> WorkflowResult<Value> {
    let mut generator = SchemaSettings::draft07().into_generator();
    let schema = generator.root_schema_for::<WorkflowGraph>();
    Ok(serde_json::to_value(&schema)?)
}

/// Checks a raw document against the wire schema.
///
/// Collects every violation rather than stopping at the first one.
pub fn check_wire_schema(document: &Value) -> WorkflowResult<()> {
    let validator = VALIDATOR
        .as_ref()
        .map_err(|e| WorkflowError::schema(format!("wire schema unavailable: {e}")))?;

    let details: Vec<String> = validator
        .iter_errors(document)
        .map(|error| format!("{}: {}", error.instance_path, error))
        .collect();

    if details.is_empty() {
        Ok(())
    } else {
        Err(WorkflowError::Schema { details })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn schema_is_draft07() {
        let schema = wire_schema().unwrap();
        assert_eq!(
            schema["$schema"],
            json!("http://json-schema.org/draft-07/schema#")
        );
    }

    #[test]
    fn accepts_well_formed_document() {
        let document = json!({
            "schema": GRAPH_SCHEMA_VERSION,
            "workflowId": "wf-1",
            "nodes": [{ "id": "a", "task": "core.passthrough", "plane": "control" }],
            "edges": [],
        });
        assert!(check_wire_schema(&document).is_ok());
    }

    #[test]
    fn reports_every_violation() {
        let document = json!({
            "schema": GRAPH_SCHEMA_VERSION,
            "workflowId": "wf-1",
            "nodes": [{ "id": "a", "task": "core.passthrough", "plane": "moon" }],
            "edges": [{ "from": "a", "to": "b", "kind": "sometimes" }],
        });
        let Err(WorkflowError::Schema { details }) = check_wire_schema(&document) else {
            panic!("expected a schema error");
        };
        assert!(details.len() >= 2);
    }

    #[test]
    fn rejects_empty_node_list() {
        let document = json!({
            "schema": GRAPH_SCHEMA_VERSION,
            "workflowId": "wf-1",
            "nodes": [],
        });
        assert!(check_wire_schema(&document).is_err());
    }
}
