use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};

use crate::stream::StreamKind;
use crate::{Error, Result};

/// Task names a job can be enqueued under.
///
/// Each name routes to exactly one stream; names outside this set are
/// rejected at enqueue time.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    IntoStaticStr
)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobName {
    /// Drive a workflow graph on the control plane.
    ProcessGraph,
    /// Collect capability manifests.
    GetCapabilities,
}

impl JobName {
    /// Parses a task name, failing with [`Error::UnknownJob`].
    pub fn parse(name: &str) -> Result<Self> {
        name.parse().map_err(|_| Error::unknown_job(name))
    }

    /// Returns the stream jobs with this name are appended to.
    #[must_use]
    pub fn stream(self) -> StreamKind {
        match self {
            JobName::ProcessGraph => StreamKind::Control,
            JobName::GetCapabilities => StreamKind::Info,
        }
    }
}
