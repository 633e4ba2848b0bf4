//! Tracing initialization and configuration.

use std::io;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::LogFormat;

/// Initializes the tracing subscriber for structured logging.
///
/// Events go to stderr so command output on stdout stays machine-readable.
/// The log level can be configured via the `RUST_LOG` environment variable.
/// If not set, defaults to `info` level.
///
/// ```bash
/// RUST_LOG=debug duet run
/// RUST_LOG=duet_runtime::executor=trace,async_nats=warn duet run
/// ```
pub(super) fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let env_filter = create_env_filter()?;

    tracing_subscriber::registry()
        .with(create_fmt_layer(format))
        .with(env_filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))
}

/// Creates an environment filter for tracing.
fn create_env_filter() -> anyhow::Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {e}"))
}

/// Creates the formatting layer for the selected format.
fn create_fmt_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true);

    match format {
        LogFormat::Text => layer.with_ansi(true).boxed(),
        LogFormat::Json => layer.json().with_current_span(true).boxed(),
    }
}
