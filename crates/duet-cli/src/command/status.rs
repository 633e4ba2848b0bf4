use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use duet_nats::transport::JobTransport;
use duet_nats::watch_job;
use futures::StreamExt;

use super::connect;
use crate::config::StatusArgs;

/// Prints a job's status and progress, or follows it to completion.
pub async fn status(args: StatusArgs) -> anyhow::Result<()> {
    let transport = Arc::new(connect(&args.connection).await?);

    let outcome = if args.follow {
        follow(&transport, &args).await
    } else {
        transport
            .get_job_state(args.job_id)
            .await
            .with_context(|| format!("failed to read job {}", args.job_id))
            .and_then(|state| {
                println!("{}", serde_json::to_string(&state)?);
                Ok(())
            })
    };

    transport.teardown().await?;
    outcome
}

async fn follow<T>(transport: &Arc<T>, args: &StatusArgs) -> anyhow::Result<()>
where
    T: JobTransport + 'static,
{
    let interval = Duration::from_millis(args.follow_interval_ms);
    let updates = watch_job(transport.clone(), args.job_id, interval);
    futures::pin_mut!(updates);

    while let Some(update) = updates.next().await {
        let update = update.with_context(|| format!("failed to read job {}", args.job_id))?;
        println!("{}", serde_json::to_string(&update)?);
    }
    Ok(())
}
