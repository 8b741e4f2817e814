use std::collections::VecDeque;
use std::fs;
use std::iter;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use crate::ffmpeg::process::{Launcher, SystemLauncher};
use crate::ffmpeg::progress::ProgressSnapshot;
use crate::job::{ConversionJob, JobId, JobState};
use crate::transcoder::{JobRunner, RunnerContext};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub bytes_written: u64,
}

impl BatchSummary {
    fn record(&mut self, job: &ConversionJob) {
        match job.state() {
            JobState::Completed => {
                self.completed += 1;
                self.bytes_written += fs::metadata(&job.destination).map(|m| m.len()).unwrap_or(0);
            },
            JobState::Failed => self.failed += 1,
            JobState::Cancelled => self.cancelled += 1,
            JobState::Queued | JobState::Running => {
                warn!(job = %job.id, state = %job.state(), "job left the runner in a non-terminal state");
            },
        }
    }
}

#[derive(Clone, Debug)]
pub enum QueueProcessorMessage {
    BatchStart(usize),
    JobStart(ConversionJob),
    Progress(JobId, ProgressSnapshot),
    /// Final state plus the user-facing error, if the job failed.
    JobEnd(JobId, JobState, Option<String>),
    BatchEnd(BatchSummary),
}

/// Single background worker that drains a shared queue through the job runner.
pub struct QueueProcessor<L: Launcher = SystemLauncher> {
    queue: Arc<Mutex<VecDeque<ConversionJob>>>,
    runner: JobRunner<L>,
    subscribers: Vec<Sender<QueueProcessorMessage>>,
}

pub struct QueueHandle {
    context: Arc<RunnerContext>,
    worker: JoinHandle<BatchSummary>,
}

impl QueueHandle {
    pub fn cancel(&self) {
        self.context.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    pub fn join(self) -> BatchSummary {
        self.worker.join().unwrap_or_default()
    }
}

impl<L: Launcher + 'static> QueueProcessor<L> {
    pub fn new(runner: JobRunner<L>) -> Self {
        QueueProcessor {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            runner,
            subscribers: vec![],
        }
    }

    /// Shared handle so jobs can be added while the worker runs.
    pub fn queue(&self) -> Arc<Mutex<VecDeque<ConversionJob>>> {
        Arc::clone(&self.queue)
    }

    pub fn enqueue(&mut self, job: ConversionJob) {
        let mut q = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        q.push_back(job);
    }

    pub fn context(&self) -> Arc<RunnerContext> {
        self.runner.context()
    }

    pub fn subscribe(&mut self) -> Receiver<QueueProcessorMessage> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    fn publish(&self, msg: QueueProcessorMessage) {
        for tx in &self.subscribers {
            let _ = tx.send(msg.clone());
        }
    }

    fn next_item(&self) -> Option<ConversionJob> {
        let mut q = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        q.pop_front()
    }

    /// Moves the processor onto its worker thread. The worker stops once the
    /// queue is empty.
    pub fn start(self) -> QueueHandle {
        let context = self.runner.context();
        let worker = thread::spawn(move || self.process());
        QueueHandle { context, worker }
    }

    /// Runs every queued job in order on the calling thread.
    pub fn process(&self) -> BatchSummary {
        let queued = self.queue.lock().unwrap_or_else(|e| e.into_inner()).len();
        info!(queued, "batch started");
        self.publish(QueueProcessorMessage::BatchStart(queued));

        let jobs = iter::from_fn(|| self.next_item());
        let finished = self.runner.run_batch_with_start(
            jobs,
            |job| self.publish(QueueProcessorMessage::JobStart(job.clone())),
            |id, snapshot| self.publish(QueueProcessorMessage::Progress(id, snapshot.clone())),
            |id, state, err| self.publish(QueueProcessorMessage::JobEnd(id, state, err.map(|e| e.user_message()))),
        );

        let mut summary = BatchSummary::default();
        for job in &finished {
            summary.record(job);
        }
        info!(
            completed = summary.completed,
            failed = summary.failed,
            cancelled = summary.cancelled,
            bytes = summary.bytes_written,
            "batch finished");
        self.publish(QueueProcessorMessage::BatchEnd(summary));
        summary
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::quality::QualityProfile;
    use crate::transcoder::RunnerOptions;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    fn fake_ffmpeg(dir: &Path) -> PathBuf {
        let path = dir.join("fake-ffmpeg");
        fs::write(&path, concat!(
            "#!/bin/sh\n",
            "for last; do :; done\n",
            "case \"$*\" in *bad.mp4*) echo 'Invalid data found when processing input' >&2; exit 1;; esac\n",
            "case \"$*\" in *slow.mp4*) printf 'out_time=00:00:01.000000\\nprogress=continue\\n'; exec sleep 30;; esac\n",
            "printf 'out_time=00:00:04.000000\\nprogress=continue\\n'\n",
            "printf 'moov-data' > \"$last\"\n",
            "printf 'progress=end\\n'\n",
        )).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn processor(dir: &Path) -> QueueProcessor {
        let runner = JobRunner::new(fake_ffmpeg(dir)).options(RunnerOptions {
            watchdog: Duration::from_secs(10),
            grace: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
        });
        QueueProcessor::new(runner)
    }

    fn job(dir: &Path, name: &str) -> ConversionJob {
        ConversionJob::new(dir.join(format!("{}.mp4", name)), dir.join("out").join(format!("{}.mov", name)), QualityProfile::Fast)
            .total_duration(Some(8.0))
    }

    #[test]
    fn test_processes_queue_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut qp = processor(dir.path());
        let rx = qp.subscribe();
        for name in ["one", "bad", "three"] {
            qp.enqueue(job(dir.path(), name));
        }

        let summary = qp.start().join();
        assert_eq!(summary, BatchSummary { completed: 2, failed: 1, cancelled: 0, bytes_written: 18 });

        let messages: Vec<QueueProcessorMessage> = rx.try_iter().collect();
        assert!(matches!(messages.first(), Some(QueueProcessorMessage::BatchStart(3))));
        assert!(matches!(messages.last(), Some(QueueProcessorMessage::BatchEnd(_))));
        let ends: Vec<(JobState, Option<String>)> = messages.iter()
            .filter_map(|m| match m {
                QueueProcessorMessage::JobEnd(_, state, err) => Some((*state, err.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(ends[0], (JobState::Completed, None));
        assert_eq!(ends[1], (JobState::Failed, Some(String::from("Invalid or corrupted video file."))));
        assert_eq!(ends[2], (JobState::Completed, None));
        assert!(messages.iter().any(|m| matches!(m, QueueProcessorMessage::Progress(_, s) if s.percent == Some(50.0))));
    }

    #[test]
    fn test_cancel_from_handle() {
        let dir = tempfile::tempdir().unwrap();
        let mut qp = processor(dir.path());
        let rx = qp.subscribe();
        qp.enqueue(job(dir.path(), "slow"));
        qp.enqueue(job(dir.path(), "after"));

        let handle = qp.start();
        // wait until the encoder reports progress, then cancel
        loop {
            match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
                QueueProcessorMessage::Progress(..) => break,
                _ => continue,
            }
        }
        handle.cancel();
        let summary = handle.join();
        assert_eq!(summary.cancelled, 2);
        assert_eq!(summary.completed, 0);
        assert!(!dir.path().join("out").join("slow.mov").exists());
        assert!(!dir.path().join("out").join("after.mov").exists());
    }

    #[test]
    fn test_cancelled_jobs_never_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut qp = processor(dir.path());
        let rx = qp.subscribe();
        qp.enqueue(job(dir.path(), "one"));
        qp.enqueue(job(dir.path(), "two"));
        qp.context().cancel();

        let summary = qp.start().join();
        assert_eq!(summary.cancelled, 2);

        let messages: Vec<QueueProcessorMessage> = rx.try_iter().collect();
        assert!(!messages.iter().any(|m| matches!(m, QueueProcessorMessage::JobStart(_))));
        let ends = messages.iter()
            .filter(|m| matches!(m, QueueProcessorMessage::JobEnd(_, JobState::Cancelled, None)))
            .count();
        assert_eq!(ends, 2);
    }

    #[test]
    fn test_job_start_reports_running_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut qp = processor(dir.path());
        let rx = qp.subscribe();
        qp.enqueue(job(dir.path(), "one"));
        qp.start().join();

        let started: Vec<JobState> = rx.try_iter()
            .filter_map(|m| match m {
                QueueProcessorMessage::JobStart(job) => Some(job.state()),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec![JobState::Running]);
    }
}
