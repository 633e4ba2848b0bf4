use derive_more::Display;
use serde::{Deserialize, Serialize};

use super::JobStatus;

/// Job progress: a fraction in `[0, 1]`, or the `-1` failure sentinel.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize, Display)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(transparent)]
pub struct Progress(f64);

impl Progress {
    /// Marks a failed job or a contradiction between status and progress.
    pub const FAILED: Progress = Progress(-1.0);
    /// Nothing done yet.
    pub const ZERO: Progress = Progress(0.0);
    /// Every node completed.
    pub const DONE: Progress = Progress(1.0);
    /// Highest value a job that is not completed may report.
    pub const RUNNING_MAX: f64 = 0.99;

    /// Wraps a raw value without normalization.
    #[inline]
    pub const fn raw(value: f64) -> Self {
        Self(value)
    }

    /// Clamps a running job's progress into `[0, RUNNING_MAX]`.
    pub fn running(value: f64) -> Self {
        if value.is_nan() {
            return Self::ZERO;
        }
        Self(value.clamp(0.0, Self::RUNNING_MAX))
    }

    /// Reconciles a progress value with the job status it is reported with.
    ///
    /// Failed jobs, values outside `[0, 1]` and jobs claiming `1` without
    /// being completed all read back as [`Progress::FAILED`].
    pub fn normalize(status: JobStatus, value: f64) -> Self {
        if status == JobStatus::Failed || value.is_nan() || !(0.0..=1.0).contains(&value) {
            return Self::FAILED;
        }
        if status != JobStatus::Completed && value >= 1.0 {
            return Self::FAILED;
        }
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    pub fn value(self) -> f64 {
        self.0
    }

    /// Returns true for the failure sentinel.
    #[inline]
    pub fn is_failed(self) -> bool {
        self.0 < 0.0
    }

    /// Parses the decimal string stored in the job state store.
    pub fn parse(text: &str) -> Option<Self> {
        text.trim().parse::<f64>().ok().map(Self)
    }
}

/// Snapshot of a job's status and progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct JobState {
    /// Lifecycle status.
    pub status: JobStatus,
    /// Normalized progress.
    pub progress: Progress,
}

impl JobState {
    /// Builds a state, normalizing progress against the status.
    pub fn new(status: JobStatus, progress: f64) -> Self {
        Self {
            status,
            progress: Progress::normalize(status, progress),
        }
    }

    /// Initial state written on enqueue.
    pub fn advertised() -> Self {
        Self::new(JobStatus::Advertised, 0.0)
    }

    /// Returns true if an incoming status update keeps status monotonic.
    pub fn accepts_status(&self, next: JobStatus) -> bool {
        self.status.can_transition_to(next)
    }

    /// Returns true if an incoming progress value may replace the stored one.
    ///
    /// The failure sentinel is always accepted. Otherwise values must lie in
    /// `[0, 1]` and must not move backwards; terminal jobs only accept the
    /// value matching their outcome.
    pub fn accepts_progress(&self, next: f64) -> bool {
        if next == Progress::FAILED.value() {
            return true;
        }
        if next.is_nan() || !(0.0..=1.0).contains(&next) {
            return false;
        }
        match self.status {
            JobStatus::Failed => false,
            JobStatus::Completed => next >= 1.0,
            _ => self.progress.is_failed() || next >= self.progress.value(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_keeps_valid_progress() {
        assert_eq!(Progress::normalize(JobStatus::Running, 0.4).value(), 0.4);
        assert_eq!(Progress::normalize(JobStatus::Advertised, 0.0).value(), 0.0);
        assert_eq!(Progress::normalize(JobStatus::Completed, 1.0).value(), 1.0);
    }

    #[test]
    fn normalize_flags_contradictions() {
        assert!(Progress::normalize(JobStatus::Running, 1.0).is_failed());
        assert!(Progress::normalize(JobStatus::Queued, 1.5).is_failed());
        assert!(Progress::normalize(JobStatus::Running, f64::NAN).is_failed());
        assert!(Progress::normalize(JobStatus::Completed, -0.2).is_failed());
        assert!(Progress::normalize(JobStatus::Failed, 0.7).is_failed());
        assert_eq!(Progress::normalize(JobStatus::Failed, 0.7), Progress::FAILED);
    }

    #[test]
    fn running_progress_stays_below_one() {
        assert_eq!(Progress::running(1.4).value(), Progress::RUNNING_MAX);
        assert_eq!(Progress::running(-3.0).value(), 0.0);
        assert_eq!(Progress::running(0.25).value(), 0.25);
    }

    #[test]
    fn progress_moves_forward_only() {
        let state = JobState::new(JobStatus::Running, 0.4);
        assert!(state.accepts_progress(0.6));
        assert!(state.accepts_progress(1.0));
        assert!(state.accepts_progress(-1.0));
        assert!(!state.accepts_progress(0.2));
        assert!(!state.accepts_progress(1.2));

        let completed = JobState::new(JobStatus::Completed, 0.9);
        assert!(completed.accepts_progress(1.0));
        assert!(!completed.accepts_progress(0.95));

        let failed = JobState::new(JobStatus::Failed, -1.0);
        assert!(!failed.accepts_progress(0.5));
        assert!(!failed.accepts_status(JobStatus::Completed));
    }

    #[test]
    fn state_serializes_flat() {
        let state = JobState::new(JobStatus::Running, 0.5);
        let json = serde_json::to_value(state).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "running", "progress": 0.5 }));
    }
}
