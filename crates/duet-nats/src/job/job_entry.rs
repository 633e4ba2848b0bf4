use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{JobId, JobName};

/// Identifier of one log entry, unique within its stream.
///
/// For JetStream this is the stream sequence number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From, Into
)]
#[serde(transparent)]
pub struct EntryId(u64);

/// Fields of one job log entry as they appear on the wire.
///
/// Every field is optional on the read side: a malformed entry still decodes,
/// so the consumer can acknowledge it instead of redelivering it forever.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEntry {
    /// Job the entry belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Task name the job was enqueued under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Creation time, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    /// Serialized job input. Older producers write it under `graph`.
    #[serde(default, alias = "graph", skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

impl JobEntry {
    /// Builds an entry for a newly enqueued job.
    pub fn new(job_id: JobId, name: JobName, created: String, input: String) -> Self {
        Self {
            job_id: Some(job_id.to_string()),
            name: Some(name.to_string()),
            created: Some(created),
            input: Some(Value::String(input)),
        }
    }

    /// Decodes an entry, falling back to an empty one for unparsable bodies.
    pub fn from_slice(bytes: &[u8]) -> Self {
        serde_json::from_slice(bytes).unwrap_or_default()
    }

    /// Returns the job id if present and well formed.
    pub fn job_id(&self) -> Option<JobId> {
        self.job_id.as_deref().and_then(|id| id.parse().ok())
    }

    /// Returns the serialized input.
    ///
    /// Inputs embedded as JSON documents rather than strings are re-serialized.
    pub fn input_text(&self) -> Option<String> {
        match self.input.as_ref()? {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// A job log entry claimed through a consumer group.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    /// Entry identifier used to acknowledge it.
    pub entry_id: EntryId,
    /// Number of times this entry has been delivered, starting at 1.
    pub delivered: u64,
    /// Decoded entry fields.
    pub entry: JobEntry,
}

/// Per-job record written once on enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Task name.
    pub name: String,
    /// Serialized input.
    pub input: String,
    /// Creation time, epoch milliseconds.
    pub created: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn accepts_legacy_graph_field() {
        let job_id = JobId::new();
        let body = json!({
            "jobId": job_id.to_string(),
            "name": "process_graph",
            "created": "1700000000000",
            "graph": "{\"nodes\":[]}",
        });
        let entry = JobEntry::from_slice(body.to_string().as_bytes());
        assert_eq!(entry.job_id(), Some(job_id));
        assert_eq!(entry.input_text().as_deref(), Some("{\"nodes\":[]}"));
    }

    #[test]
    fn embedded_documents_are_reserialized() {
        let entry = JobEntry {
            input: Some(json!({ "nodes": [] })),
            ..JobEntry::default()
        };
        assert_eq!(entry.input_text().as_deref(), Some("{\"nodes\":[]}"));
    }

    #[test]
    fn malformed_bodies_decode_empty() {
        let entry = JobEntry::from_slice(b"not json");
        assert_eq!(entry, JobEntry::default());
        assert_eq!(entry.job_id(), None);
    }
}
