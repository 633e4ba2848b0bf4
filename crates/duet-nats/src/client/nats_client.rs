//! NATS client wrapper and connection management.
//!
//! The underlying `async-nats` client multiplexes every operation over a single
//! TCP connection, so [`NatsClient`] clones share it cheaply. The transport,
//! the update bus persister and the job watchers all hold clones of one client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_nats::{Client, ConnectOptions, jetstream};
use tokio::time::timeout;

use super::nats_config::NatsConfig;
use crate::{Error, Result, TRACING_TARGET_CLIENT, TRACING_TARGET_CONNECTION};

/// Upper bound on the delay between reconnection attempts.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// NATS client wrapper with connection management.
///
/// This wrapper is cheaply cloneable and thread-safe.
#[derive(Debug, Clone)]
pub struct NatsClient {
    inner: Arc<NatsClientInner>,
}

#[derive(Debug)]
struct NatsClientInner {
    client: Client,
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl NatsClient {
    /// Create a new NATS client and connect.
    #[tracing::instrument(skip(config), target = TRACING_TARGET_CONNECTION)]
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        config.validate().map_err(Error::invalid_config)?;

        tracing::info!(
            target: TRACING_TARGET_CONNECTION,
            servers = %config.nats_url,
            client_name = config.name(),
            "Connecting to NATS"
        );

        let mut connect_opts = ConnectOptions::new()
            .name(config.name())
            .ping_interval(config.ping_interval())
            .connection_timeout(config.connect_timeout());

        if let Some(token) = config.nats_token.clone() {
            connect_opts = connect_opts.token(token);
        }

        if let Some(max_reconnects) = config.max_reconnects_option() {
            connect_opts = connect_opts.max_reconnects(max_reconnects);
        }

        let base_delay = config.reconnect_delay();
        connect_opts = connect_opts.reconnect_delay_callback(move |attempts| {
            base_delay
                .saturating_mul(2_u32.saturating_pow(attempts.min(16) as u32))
                .min(MAX_RECONNECT_DELAY)
        });

        connect_opts = connect_opts.event_callback(|event| async move {
            tracing::warn!(
                target: TRACING_TARGET_CONNECTION,
                event = %event,
                "NATS connection event"
            );
        });

        let connect_timeout = config.connect_timeout();
        let client = timeout(
            connect_timeout,
            async_nats::connect_with_options(&config.nats_url, connect_opts),
        )
        .await
        .map_err(|_| Error::timeout(connect_timeout))?
        .map_err(Error::connection)?;

        let jetstream = jetstream::new(client.clone());

        let server_info = client.server_info();
        tracing::info!(
            target: TRACING_TARGET_CONNECTION,
            server_host = %server_info.host,
            server_version = %server_info.version,
            server_id = %server_info.server_id,
            max_payload = server_info.max_payload,
            "Successfully connected to NATS"
        );

        Ok(Self {
            inner: Arc::new(NatsClientInner {
                client,
                jetstream,
                config,
            }),
        })
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &NatsConfig {
        &self.inner.config
    }

    /// Get the core NATS client for pub/sub.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    /// Get the JetStream context for streams and key-value buckets.
    #[must_use]
    pub fn jetstream(&self) -> &jetstream::Context {
        &self.inner.jetstream
    }

    /// Test connectivity with a round trip to the server.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_CONNECTION)]
    pub async fn ping(&self) -> Result<Duration> {
        let start = Instant::now();
        let deadline = Duration::from_secs(10);

        timeout(deadline, self.inner.client.flush())
            .await
            .map_err(|_| Error::timeout(deadline))?
            .map_err(Error::connection)?;

        let elapsed = start.elapsed();
        tracing::debug!(
            target: TRACING_TARGET_CLIENT,
            duration_ms = elapsed.as_millis(),
            "NATS ping successful"
        );
        Ok(elapsed)
    }

    /// Check if the client is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(
            self.inner.client.connection_state(),
            async_nats::connection::State::Connected
        )
    }
}
