use std::fmt::Display;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ffmpeg::progress::ProgressSnapshot;
use crate::quality::QualityProfile;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    pub fn next() -> Self {
        JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JobState {
    #[default]
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }

    /// `Queued -> Running -> {Completed, Failed, Cancelled}`. A queued job may
    /// also be cancelled before it ever starts.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Running)
                | (JobState::Queued, JobState::Cancelled)
                | (JobState::Running, JobState::Completed)
                | (JobState::Running, JobState::Failed)
                | (JobState::Running, JobState::Cancelled)
        )
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Debug)]
pub struct ConversionJob {
    pub id: JobId,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub profile: QualityProfile,
    /// Seconds, from the probe. Drives the percentage.
    pub total_duration: Option<f64>,
    state: JobState,
    pub last_progress: Option<ProgressSnapshot>,
    pub error: Option<String>,
}

impl ConversionJob {
    pub fn new(source: PathBuf, destination: PathBuf, profile: QualityProfile) -> Self {
        ConversionJob {
            id: JobId::next(),
            source,
            destination,
            profile,
            total_duration: None,
            state: JobState::Queued,
            last_progress: None,
            error: None,
        }
    }

    pub fn total_duration(mut self, total_duration: Option<f64>) -> Self {
        self.total_duration = total_duration;
        self
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Applies a transition, refusing anything the state machine does not allow.
    pub fn transition(&mut self, next: JobState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }

    /// A fresh queued job for the same file. Terminal jobs are never resurrected.
    pub fn requeue(&self) -> Option<ConversionJob> {
        match self.state {
            JobState::Failed | JobState::Cancelled => Some(
                ConversionJob::new(self.source.clone(), self.destination.clone(), self.profile)
                    .total_duration(self.total_duration),
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> ConversionJob {
        ConversionJob::new(PathBuf::from("a.mp4"), PathBuf::from("out/a.mov"), QualityProfile::Fast)
    }

    #[test]
    fn test_ids_are_unique() {
        let a = job();
        let b = job();
        assert_ne!(a.id, b.id);
        assert_eq!(a.state(), JobState::Queued);
    }

    #[test]
    fn test_transitions() {
        let mut j = job();
        assert!(!j.transition(JobState::Completed));
        assert!(j.transition(JobState::Running));
        assert!(!j.transition(JobState::Queued));
        assert!(j.transition(JobState::Failed));
        assert!(j.state().is_terminal());
        assert!(!j.transition(JobState::Running));
        assert!(!j.transition(JobState::Completed));
        assert_eq!(j.state(), JobState::Failed);
    }

    #[test]
    fn test_cancel_before_start() {
        let mut j = job();
        assert!(j.transition(JobState::Cancelled));
        assert!(!j.transition(JobState::Running));
    }

    #[test]
    fn test_requeue() {
        let mut j = job().total_duration(Some(12.0));
        assert!(j.requeue().is_none());
        j.transition(JobState::Running);
        assert!(j.requeue().is_none());
        j.transition(JobState::Cancelled);
        let again = j.requeue().unwrap();
        assert_ne!(again.id, j.id);
        assert_eq!(again.state(), JobState::Queued);
        assert_eq!(again.total_duration, Some(12.0));
        assert_eq!(again.source, j.source);
        assert_eq!(j.state(), JobState::Cancelled);

        let mut done = job();
        done.transition(JobState::Running);
        done.transition(JobState::Completed);
        assert!(done.requeue().is_none());
    }
}
