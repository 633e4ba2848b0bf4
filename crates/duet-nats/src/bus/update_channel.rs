//! Update channel addressing and payloads.

use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};

use crate::job::JobId;
use crate::{Error, Result};

/// Subject prefix shared by all update channels.
pub const UPDATE_SUBJECT_PREFIX: &str = "duet.updates";

/// One of the logical per-job update channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum UpdateChannel {
    /// Status changes.
    Status,
    /// Progress changes.
    Progress,
    /// Results emitted by handlers.
    Data,
}

impl UpdateChannel {
    /// Subject for this channel and job: `duet.updates.<channel>.<job-id>`.
    pub fn subject(self, job_id: JobId) -> String {
        format!("{UPDATE_SUBJECT_PREFIX}.{self}.{job_id}")
    }

    /// Wildcard subject matching every channel of every job.
    pub fn wildcard() -> String {
        format!("{UPDATE_SUBJECT_PREFIX}.>")
    }

    /// Extracts the channel and job id from a subject.
    pub fn parse_subject(subject: &str) -> Option<(Self, JobId)> {
        let rest = subject.strip_prefix(UPDATE_SUBJECT_PREFIX)?.strip_prefix('.')?;
        let (channel, job_id) = rest.split_once('.')?;
        Some((channel.parse().ok()?, job_id.parse().ok()?))
    }
}

/// A decoded update: `{ "<channel>": value }` received on a job's channel.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateMessage {
    /// Channel the update arrived on.
    pub channel: UpdateChannel,
    /// Job the update belongs to.
    pub job_id: JobId,
    /// The reported value.
    pub value: Value,
}

impl UpdateMessage {
    /// Creates an update.
    pub fn new(channel: UpdateChannel, job_id: JobId, value: Value) -> Self {
        Self {
            channel,
            job_id,
            value,
        }
    }

    /// Encodes the payload as `{ "<channel>": value }`.
    pub fn payload(&self) -> Result<Vec<u8>> {
        let mut body = Map::new();
        body.insert(self.channel.to_string(), self.value.clone());
        Ok(serde_json::to_vec(&Value::Object(body))?)
    }

    /// Decodes an update from its subject and payload.
    pub fn decode(subject: &str, payload: &[u8]) -> Result<Self> {
        let (channel, job_id) = UpdateChannel::parse_subject(subject)
            .ok_or_else(|| Error::operation("update_decode", format!("bad subject '{subject}'")))?;

        let mut body: Map<String, Value> = serde_json::from_slice(payload)?;
        let value = body.remove(channel.as_ref()).ok_or_else(|| {
            Error::operation("update_decode", format!("payload lacks field '{channel}'"))
        })?;

        Ok(Self::new(channel, job_id, value))
    }
}
