#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

/// Tracing target for NATS client operations.
///
/// Use this target for logging client initialization, configuration, and client-level errors.
pub const TRACING_TARGET_CLIENT: &str = "duet_nats::client";

/// Tracing target for NATS connection operations.
///
/// Use this target for logging connection establishment, reconnection, and connection errors.
pub const TRACING_TARGET_CONNECTION: &str = "duet_nats::connection";

/// Tracing target for job state store operations.
pub const TRACING_TARGET_KV: &str = "duet_nats::kv";

/// Tracing target for job stream operations.
///
/// Use this target for logging stream setup, consumer groups, claims and acknowledgements.
pub const TRACING_TARGET_STREAM: &str = "duet_nats::stream";

/// Tracing target for the update bus.
pub const TRACING_TARGET_BUS: &str = "duet_nats::bus";

/// Tracing target for job transport operations.
pub const TRACING_TARGET_TRANSPORT: &str = "duet_nats::transport";

mod client;
mod error;
pub mod bus;
pub mod job;
pub mod kv;
pub mod prelude;
mod retry;
pub mod stream;
pub mod transport;
mod watch;

// Re-export async_nats types needed by consumers
pub use async_nats::jetstream;
pub use client::{NatsClient, NatsConfig};
pub use error::{Error, Result};
pub use retry::RetryConfig;
pub use watch::{JobUpdate, watch_job};
