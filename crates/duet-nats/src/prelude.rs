//! Convenient re-exports for common job transport types.

pub use crate::job::{EntryId, JobId, JobName, JobRecord, JobState, JobStatus, Progress, StreamEntry};
pub use crate::transport::{JobTransport, MemoryTransport, NatsTransport, TransportConfig};
pub use crate::{Error, JobUpdate, NatsClient, NatsConfig, Result, watch_job};
