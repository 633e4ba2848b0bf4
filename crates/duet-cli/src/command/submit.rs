use std::time::Duration;

use anyhow::Context;
use duet_nats::job::JobName;
use duet_nats::transport::JobTransport;

use super::{connect, planner, read_request};
use crate::TRACING_TARGET_COMMAND;
use crate::config::SubmitArgs;

/// Plans a request, enqueues it and optionally waits for the result.
pub async fn submit(args: SubmitArgs) -> anyhow::Result<()> {
    let request = read_request(&args.request).await?;
    let graph = planner(&args.planner)
        .get_job_graph(request)
        .context("failed to plan the request")?;

    let transport = connect(&args.connection).await?;
    let job_id = transport
        .enqueue_job(JobName::ProcessGraph.as_ref(), &graph)
        .await
        .context("failed to enqueue the job")?;

    tracing::info!(target: TRACING_TARGET_COMMAND, job_id = %job_id, "Job submitted");
    println!("{job_id}");

    let outcome = match args.wait {
        Some(secs) => transport
            .get_job_result(job_id, Duration::from_secs(secs))
            .await
            .with_context(|| format!("job {job_id} did not complete"))
            .and_then(|result| {
                println!("{}", serde_json::to_string_pretty(&result)?);
                Ok(())
            }),
        None => Ok(()),
    };

    transport.teardown().await?;
    outcome
}
