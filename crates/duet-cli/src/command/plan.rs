use anyhow::Context;

use super::{planner, read_request};
use crate::config::PlanArgs;

/// Prints the graph planned for a request.
pub async fn plan(args: PlanArgs) -> anyhow::Result<()> {
    let request = read_request(&args.request).await?;
    let graph = planner(&args.planner)
        .plan(request)
        .context("failed to plan the request")?;
    let text = serde_json::to_string_pretty(&graph)?;
    println!("{text}");
    Ok(())
}
