//! Job stream configuration for NATS JetStream.

use std::time::Duration;

use async_nats::jetstream::stream;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

/// One of the job streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StreamKind {
    /// Jobs driven by the control plane.
    Control,
    /// Jobs handed off to the worker plane.
    Worker,
    /// Capability collection requests.
    Info,
}

impl StreamKind {
    /// Stream name used in NATS JetStream.
    pub const fn name(self) -> &'static str {
        match self {
            StreamKind::Control => "DUET_CONTROL",
            StreamKind::Worker => "DUET_WORKER",
            StreamKind::Info => "DUET_INFO",
        }
    }

    /// Subject entries are published to.
    pub const fn subject(self) -> &'static str {
        match self {
            StreamKind::Control => "duet.jobs.control",
            StreamKind::Worker => "duet.jobs.worker",
            StreamKind::Info => "duet.jobs.info",
        }
    }

    /// Human-readable description for the stream.
    pub const fn description(self) -> &'static str {
        match self {
            StreamKind::Control => "Workflow graphs awaiting the control plane",
            StreamKind::Worker => "Workflow graphs handed off to the worker plane",
            StreamKind::Info => "Capability collection requests",
        }
    }

    /// Builds the work-queue stream configuration.
    ///
    /// Entries are removed once acknowledged and expire after `max_age`.
    pub fn config(self, max_age: Duration) -> stream::Config {
        stream::Config {
            name: self.name().to_string(),
            description: Some(self.description().to_string()),
            subjects: vec![self.subject().to_string()],
            retention: stream::RetentionPolicy::WorkQueue,
            max_age,
            ..Default::default()
        }
    }
}
