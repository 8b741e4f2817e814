use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::encoders::HwAccel;
use crate::error::ConversionError;
use crate::ffmpeg::command::{build_command, progress_arguments};
use crate::ffmpeg::process::{EncoderProcess, ExitOutcome, Launcher, SystemLauncher};
use crate::ffmpeg::progress::{LineBuffer, ProgressAccumulator, ProgressSnapshot, parse_progress_line};
use crate::job::{ConversionJob, JobId, JobState};

const STDERR_TAIL_LINES: usize = 20;

#[derive(Clone, Copy, Debug)]
pub struct RunnerOptions {
    /// Longest the encoder may stay silent on stdout before it is treated as hung.
    pub watchdog: Duration,
    /// Time between a graceful termination request and a forced kill.
    pub grace: Duration,
    pub poll_interval: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        RunnerOptions {
            watchdog: Duration::from_secs(60),
            grace: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// State shared between the worker and whoever drives it: the cancellation
/// switch and the job currently running.
#[derive(Debug, Default)]
pub struct RunnerContext {
    cancel: Arc<AtomicBool>,
    current: Mutex<Option<JobId>>,
    slot: Mutex<()>,
}

impl RunnerContext {
    /// Stops the running job and every job after it in the batch.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Clears a previous cancellation so a new batch can run.
    pub fn reset(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    /// The raw flag, for signal handlers.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn current_job(&self) -> Option<JobId> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_current(&self, id: Option<JobId>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = id;
    }
}

enum StreamEnd {
    Closed,
    Cancelled,
    Silent,
}

enum ExitWait {
    Exited(ExitOutcome),
    Cancelled,
    TimedOut,
}

pub struct JobRunner<L: Launcher = SystemLauncher> {
    launcher: L,
    ffmpeg: PathBuf,
    hw_accel: HwAccel,
    options: RunnerOptions,
    context: Arc<RunnerContext>,
}

impl JobRunner<SystemLauncher> {
    pub fn new(ffmpeg: PathBuf) -> Self {
        JobRunner::with_launcher(SystemLauncher, ffmpeg)
    }
}

impl<L: Launcher> JobRunner<L> {
    pub fn with_launcher(launcher: L, ffmpeg: PathBuf) -> Self {
        JobRunner {
            launcher,
            ffmpeg,
            hw_accel: HwAccel::None,
            options: RunnerOptions::default(),
            context: Arc::new(RunnerContext::default()),
        }
    }

    pub fn hw_accel(mut self, hw_accel: HwAccel) -> Self {
        self.hw_accel = hw_accel;
        self
    }

    pub fn options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn context(&self) -> Arc<RunnerContext> {
        Arc::clone(&self.context)
    }

    /// Runs jobs one after another in order. A failed job never stops the batch;
    /// a cancellation marks every job that has not started yet as cancelled.
    pub fn run_batch<I, P, D>(&self, jobs: I, on_progress: P, on_job_done: D) -> Vec<ConversionJob>
    where
        I: IntoIterator<Item = ConversionJob>,
        P: FnMut(JobId, &ProgressSnapshot),
        D: FnMut(JobId, JobState, Option<&ConversionError>),
    {
        self.run_batch_with_start(jobs, |_| (), on_progress, on_job_done)
    }

    /// Same as [`JobRunner::run_batch`], calling `on_start` once a job has
    /// moved to `Running`. Jobs that were not queued are passed through
    /// untouched and never reported to `on_job_done`.
    pub fn run_batch_with_start<I, S, P, D>(&self, jobs: I, mut on_start: S, mut on_progress: P, mut on_job_done: D) -> Vec<ConversionJob>
    where
        I: IntoIterator<Item = ConversionJob>,
        S: FnMut(&ConversionJob),
        P: FnMut(JobId, &ProgressSnapshot),
        D: FnMut(JobId, JobState, Option<&ConversionError>),
    {
        let mut finished = vec![];
        for mut job in jobs {
            let queued = job.state() == JobState::Queued;
            let result = self.drive(&mut job, &mut on_start, &mut on_progress);
            if queued && job.state().is_terminal() {
                on_job_done(job.id, job.state(), result.as_ref().err());
            }
            finished.push(job);
        }
        finished
    }

    /// Drives a single queued job to a terminal state. `Err` means the job failed;
    /// a cancelled job returns `Ok` with its state set to `Cancelled`.
    pub fn run_job<P>(&self, job: &mut ConversionJob, on_progress: &mut P) -> Result<(), ConversionError>
    where
        P: FnMut(JobId, &ProgressSnapshot),
    {
        self.drive(job, &mut |_: &ConversionJob| (), on_progress)
    }

    fn drive<S, P>(&self, job: &mut ConversionJob, on_start: &mut S, on_progress: &mut P) -> Result<(), ConversionError>
    where
        S: FnMut(&ConversionJob),
        P: FnMut(JobId, &ProgressSnapshot),
    {
        if job.state() != JobState::Queued {
            warn!(job = %job.id, state = %job.state(), "job is not queued; skipping");
            return Ok(());
        }
        if self.context.is_cancelled() {
            job.transition(JobState::Cancelled);
            info!(job = %job.id, "cancelled before start");
            return Ok(());
        }

        let _slot = self.context.slot.lock().unwrap_or_else(|e| e.into_inner());
        self.context.set_current(Some(job.id));
        job.transition(JobState::Running);
        info!(job = %job.id, source = ?job.source, destination = ?job.destination, profile = %job.profile, "job started");
        on_start(job);

        let result = self.execute(job, on_progress);
        self.context.set_current(None);

        match result {
            Ok(state) => {
                job.transition(state);
                info!(job = %job.id, state = %state, "job finished");
                Ok(())
            },
            Err(err) => {
                job.transition(JobState::Failed);
                job.error = Some(err.user_message());
                error!(job = %job.id, error = %err, "job failed");
                Err(err)
            },
        }
    }

    fn execute<P>(&self, job: &mut ConversionJob, on_progress: &mut P) -> Result<JobState, ConversionError>
    where
        P: FnMut(JobId, &ProgressSnapshot),
    {
        if let Some(parent) = job.destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut args = progress_arguments();
        args.extend(build_command(&job.source, &job.destination, job.profile, self.hw_accel));
        debug!(job = %job.id, command = %command_line(&self.ffmpeg, &args), "launching");

        let mut process = self.launcher.launch(&self.ffmpeg, &args).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => ConversionError::ToolMissing { program: self.ffmpeg.clone() },
            _ => ConversionError::Spawn(err),
        })?;

        let (tx, rx) = mpsc::channel();
        match process.take_stdout() {
            Some(stdout) => { spawn_line_reader(stdout, tx); },
            None => drop(tx),
        }
        let stderr_handle = process.take_stderr().map(|stderr| spawn_stderr_tail(job.id, stderr));

        let mut acc = ProgressAccumulator::new(job.total_duration);
        let mut last_output = Instant::now();
        let end = loop {
            if self.context.is_cancelled() {
                break StreamEnd::Cancelled;
            }
            match rx.recv_timeout(self.options.poll_interval) {
                Ok(line) => {
                    last_output = Instant::now();
                    if let Some(snapshot) = parse_progress_line(&line, &mut acc) {
                        on_progress(job.id, &snapshot);
                        job.last_progress = Some(snapshot);
                    }
                },
                Err(RecvTimeoutError::Timeout) => {
                    if last_output.elapsed() >= self.options.watchdog {
                        break StreamEnd::Silent;
                    }
                },
                Err(RecvTimeoutError::Disconnected) => break StreamEnd::Closed,
            }
        };

        match end {
            StreamEnd::Cancelled => {
                info!(job = %job.id, pid = process.id(), "cancelling");
                self.stop_process(&mut process);
                remove_partial(&job.destination);
                Ok(JobState::Cancelled)
            },
            StreamEnd::Silent => {
                warn!(job = %job.id, pid = process.id(), watchdog = ?self.options.watchdog, "encoder went silent; killing");
                let _ = process.kill();
                self.wait_for_exit(&mut process, self.options.grace);
                remove_partial(&job.destination);
                Err(ConversionError::Watchdog { silence: self.options.watchdog })
            },
            StreamEnd::Closed => {
                let remaining = self.options.watchdog.saturating_sub(last_output.elapsed());
                let outcome = match self.wait_for_exit_or_cancel(&mut process, remaining) {
                    ExitWait::Exited(outcome) => outcome,
                    ExitWait::Cancelled => {
                        info!(job = %job.id, pid = process.id(), "cancelling after stdout closed");
                        self.stop_process(&mut process);
                        remove_partial(&job.destination);
                        return Ok(JobState::Cancelled);
                    },
                    ExitWait::TimedOut => {
                        warn!(job = %job.id, pid = process.id(), "encoder closed stdout but never exited; killing");
                        let _ = process.kill();
                        self.wait_for_exit(&mut process, self.options.grace);
                        remove_partial(&job.destination);
                        return Err(ConversionError::Watchdog { silence: self.options.watchdog });
                    },
                };
                if !outcome.success && self.context.is_cancelled() {
                    // the encoder saw the interrupt before we did
                    remove_partial(&job.destination);
                    return Ok(JobState::Cancelled);
                }
                let stderr_tail = stderr_handle.and_then(|h| h.join().ok()).unwrap_or_default();
                self.finish(job, outcome, stderr_tail, &args)
            },
        }
    }

    fn finish(&self, job: &ConversionJob, outcome: ExitOutcome, stderr_tail: Vec<String>, args: &[OsString]) -> Result<JobState, ConversionError> {
        if !outcome.success {
            error!(
                job = %job.id,
                command = %command_line(&self.ffmpeg, args),
                code = ?outcome.code,
                stderr = %stderr_tail.join("\n"),
                "encoder exited with failure");
            remove_partial(&job.destination);
            return Err(ConversionError::ExitStatus { code: outcome.code, stderr_tail });
        }

        match fs::metadata(&job.destination) {
            Ok(meta) if meta.len() > 0 => {
                debug!(job = %job.id, bytes = meta.len(), "destination written");
                Ok(JobState::Completed)
            },
            Ok(_) => {
                remove_partial(&job.destination);
                Err(ConversionError::EmptyOutput { path: job.destination.clone() })
            },
            Err(_) => Err(ConversionError::MissingOutput { path: job.destination.clone() }),
        }
    }

    /// Graceful termination, then a kill once the grace period runs out.
    fn stop_process(&self, process: &mut Box<dyn EncoderProcess>) {
        if let Err(err) = process.terminate() {
            warn!(pid = process.id(), error = %err, "terminate failed");
        }
        if self.wait_for_exit(process, self.options.grace).is_some() {
            return;
        }
        warn!(pid = process.id(), grace = ?self.options.grace, "encoder ignored terminate; killing");
        if let Err(err) = process.kill() {
            warn!(pid = process.id(), error = %err, "kill failed");
        }
        self.wait_for_exit(process, self.options.grace);
    }

    /// Like `wait_for_exit`, but gives up as soon as a cancel is requested.
    fn wait_for_exit_or_cancel(&self, process: &mut Box<dyn EncoderProcess>, limit: Duration) -> ExitWait {
        let deadline = Instant::now() + limit;
        loop {
            match process.try_wait() {
                Ok(Some(outcome)) => return ExitWait::Exited(outcome),
                Ok(None) if self.context.is_cancelled() => return ExitWait::Cancelled,
                Ok(None) if Instant::now() >= deadline => return ExitWait::TimedOut,
                Ok(None) => thread::sleep(self.options.poll_interval),
                Err(err) => {
                    warn!(pid = process.id(), error = %err, "unable to poll encoder");
                    return ExitWait::TimedOut;
                },
            }
        }
    }

    fn wait_for_exit(&self, process: &mut Box<dyn EncoderProcess>, limit: Duration) -> Option<ExitOutcome> {
        let deadline = Instant::now() + limit;
        loop {
            match process.try_wait() {
                Ok(Some(outcome)) => return Some(outcome),
                Ok(None) if Instant::now() >= deadline => return None,
                Ok(None) => thread::sleep(self.options.poll_interval),
                Err(err) => {
                    warn!(pid = process.id(), error = %err, "unable to poll encoder");
                    return None;
                },
            }
        }
    }
}

fn spawn_line_reader(mut reader: Box<dyn Read + Send>, tx: Sender<String>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buffer = LineBuffer::new();
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    for line in buffer.push(&chunk[..n]) {
                        if tx.send(line).is_err() {
                            return;
                        }
                    }
                },
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(error = %err, "stdout read failed");
                    break;
                },
            }
        }
        if let Some(line) = buffer.finish() {
            let _ = tx.send(line);
        }
    })
}

fn spawn_stderr_tail(id: JobId, stderr: Box<dyn Read + Send>) -> JoinHandle<Vec<String>> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stderr);
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut raw = vec![];
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&raw).trim_end().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    debug!(job = %id, "ffmpeg: {}", line);
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                },
            }
        }
        tail.into_iter().collect()
    })
}

fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = ?path, "removed partial output"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => (),
        Err(err) => warn!(path = ?path, error = %err, "unable to remove partial output"),
    }
}

fn command_line(program: &Path, args: &[OsString]) -> String {
    let mut parts = vec![program.to_string_lossy().into_owned()];
    parts.extend(args.iter().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}
