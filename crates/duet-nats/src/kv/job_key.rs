//! Keys of the job state bucket.

use std::fmt;
use std::str::FromStr;

use crate::job::JobId;

/// One of the per-job keys.
///
/// NATS keys cannot contain `:`, so the `job:<id>:status` layout becomes
/// `<id>.status` inside a dedicated bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKey {
    /// Job record: name, input and creation time.
    Record(JobId),
    /// Lifecycle status.
    Status(JobId),
    /// Progress as a decimal string.
    Progress(JobId),
    /// Result emitted by the job's handlers.
    Data(JobId),
    /// Latest graph snapshot.
    Graph(JobId),
}

impl JobKey {
    /// Returns the job this key belongs to.
    pub fn job_id(&self) -> JobId {
        match *self {
            JobKey::Record(id)
            | JobKey::Status(id)
            | JobKey::Progress(id)
            | JobKey::Data(id)
            | JobKey::Graph(id) => id,
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKey::Record(id) => write!(f, "{id}"),
            JobKey::Status(id) => write!(f, "{id}.status"),
            JobKey::Progress(id) => write!(f, "{id}.progress"),
            JobKey::Data(id) => write!(f, "{id}.data"),
            JobKey::Graph(id) => write!(f, "{id}.graph"),
        }
    }
}

impl FromStr for JobKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, suffix) = match s.split_once('.') {
            Some((id, suffix)) => (id, Some(suffix)),
            None => (s, None),
        };
        let id: JobId = id.parse().map_err(|_| format!("invalid job id in key '{s}'"))?;

        match suffix {
            None => Ok(JobKey::Record(id)),
            Some("status") => Ok(JobKey::Status(id)),
            Some("progress") => Ok(JobKey::Progress(id)),
            Some("data") => Ok(JobKey::Data(id)),
            Some("graph") => Ok(JobKey::Graph(id)),
            Some(other) => Err(format!("unknown job key suffix '{other}'")),
        }
    }
}
