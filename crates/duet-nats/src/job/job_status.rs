use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Lifecycle status of a job.
///
/// Status only moves forward: `advertised -> queued -> running -> completed | failed`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr
)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    /// Created on enqueue, not yet picked up.
    #[default]
    Advertised,
    /// Waiting on a stream for a consumer.
    Queued,
    /// Being driven by one of the planes.
    Running,
    /// Every node completed.
    Completed,
    /// At least one node failed, or the job could not be processed.
    Failed,
}

impl JobStatus {
    /// Returns true for `completed` and `failed`.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            JobStatus::Advertised => 0,
            JobStatus::Queued => 1,
            JobStatus::Running => 2,
            JobStatus::Completed | JobStatus::Failed => 3,
        }
    }

    /// Returns true if moving from `self` to `next` keeps status monotonic.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        self == next || (!self.is_terminal() && next.rank() > self.rank())
    }
}
