//! Operator commands against the planner and the job transport.

mod plan;
mod status;
mod submit;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use duet_nats::NatsClient;
use duet_nats::transport::NatsTransport;
use duet_runtime::pipeline::PipelineRegistry;
use duet_runtime::planner::{JobGraphRequest, Planner, PlannerConfig};
pub use plan::plan;
use serde_json::Value;
pub use status::status;
pub use submit::submit;

use crate::config::TransportArgs;

/// Reads a request file.
///
/// The file holds either a bare request or a full planning envelope with the
/// request under `request`.
async fn read_request(path: &Path) -> anyhow::Result<JobGraphRequest> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read request file '{}'", path.display()))?;
    parse_request(&text).with_context(|| format!("invalid request file '{}'", path.display()))
}

fn parse_request(text: &str) -> anyhow::Result<JobGraphRequest> {
    let document: Value = serde_json::from_str(text)?;
    if document.get("request").is_some() {
        Ok(serde_json::from_value(document)?)
    } else {
        Ok(JobGraphRequest::new(document))
    }
}

fn planner(config: &PlannerConfig) -> Planner {
    Planner::new(config.clone(), Arc::new(PipelineRegistry::builtin()))
}

async fn connect(args: &TransportArgs) -> anyhow::Result<NatsTransport> {
    let client = NatsClient::connect(args.nats.clone())
        .await
        .context("failed to connect to NATS")?;
    NatsTransport::connect(client, args.transport.clone())
        .await
        .context("failed to initialize the job transport")
}
