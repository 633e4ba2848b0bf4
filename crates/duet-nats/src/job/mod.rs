//! Job identity, status, progress and log entry types.
//!
//! These types are shared by every transport implementation and by both
//! planes: the control plane writes them, the worker plane reads them back.

mod job_entry;
mod job_id;
mod job_name;
mod job_state;
mod job_status;

pub use job_entry::{EntryId, JobEntry, JobRecord, StreamEntry};
pub use job_id::JobId;
pub use job_name::JobName;
pub use job_state::{JobState, Progress};
pub use job_status::JobStatus;

/// Current time as an epoch-millisecond string, the `created` wire format.
pub(crate) fn created_now() -> String {
    jiff::Timestamp::now().as_millisecond().to_string()
}
