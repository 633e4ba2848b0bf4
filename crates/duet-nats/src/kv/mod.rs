//! Per-job state stored in a JetStream key-value bucket.

mod job_key;
mod job_store;
mod kv_bucket;

pub use job_key::JobKey;
pub use job_store::JobStateStore;
pub use kv_bucket::{JobsBucket, KvBucket};
