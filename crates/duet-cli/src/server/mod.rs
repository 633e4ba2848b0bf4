//! Executor bring-up and shutdown.

mod shutdown;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use duet_nats::NatsClient;
use duet_nats::transport::{JobTransport, NatsTransport};
use duet_runtime::engine::Executor;
use duet_runtime::registry::{CapabilityManifest, HandlerCatalog, TaskRegistry};
use shutdown::shutdown_signal;

use crate::config::RunArgs;
use crate::{TRACING_TARGET_SHUTDOWN, TRACING_TARGET_STARTUP};

/// Connects the transport, starts the executor and runs it until a
/// shutdown signal arrives.
pub async fn serve(args: RunArgs) -> anyhow::Result<()> {
    let executor_config = args.executor.to_config()?;
    let registry = Arc::new(build_registry(&args)?);

    let client = NatsClient::connect(args.connection.nats.clone())
        .await
        .context("failed to connect to NATS")?;
    let transport: Arc<dyn JobTransport> = Arc::new(
        NatsTransport::connect(client, args.connection.transport.clone())
            .await
            .context("failed to initialize the job transport")?,
    );

    let executor = Executor::new(executor_config, transport.clone(), registry);
    executor
        .start()
        .await
        .context("failed to start the executor")?;

    tracing::info!(
        target: TRACING_TARGET_STARTUP,
        consumer_id = %executor.config().consumer_id,
        "Control plane ready"
    );

    shutdown_signal().await;

    let timeout = Duration::from_secs(args.shutdown_timeout_secs);
    if tokio::time::timeout(timeout, executor.stop()).await.is_err() {
        tracing::warn!(
            target: TRACING_TARGET_SHUTDOWN,
            timeout_secs = timeout.as_secs(),
            "Executor did not stop in time"
        );
    }

    transport
        .teardown()
        .await
        .context("failed to tear down the job transport")?;
    Ok(())
}

fn build_registry(args: &RunArgs) -> anyhow::Result<TaskRegistry> {
    let manifest = match &args.manifest {
        Some(path) => CapabilityManifest::from_path(path)?,
        None => CapabilityManifest::builtin()?,
    };
    let catalog = HandlerCatalog::builtin(reqwest::Client::new());
    TaskRegistry::from_manifest(manifest, &catalog).context("failed to build the task registry")
}
