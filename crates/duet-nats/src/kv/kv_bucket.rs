//! Key-value bucket configuration traits.

use std::time::Duration;

/// Marker trait for KV bucket configuration.
pub trait KvBucket: Clone + Send + Sync + 'static {
    /// Bucket name used in NATS KV.
    const NAME: &'static str;

    /// Human-readable description for the bucket.
    const DESCRIPTION: &'static str;

    /// Default TTL for entries in this bucket.
    const TTL: Duration;
}

/// Bucket holding job records, status, progress, results and graph snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct JobsBucket;

impl KvBucket for JobsBucket {
    const NAME: &'static str = "duet_jobs";
    const DESCRIPTION: &'static str = "Job state shared by the control and worker planes";
    const TTL: Duration = Duration::from_secs(24 * 60 * 60); // 24 hours
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_bucket() {
        assert_eq!(JobsBucket::NAME, "duet_jobs");
        assert_eq!(JobsBucket::TTL, Duration::from_secs(86_400));
    }
}
