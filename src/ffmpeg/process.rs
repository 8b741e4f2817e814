use std::ffi::OsString;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};

use tracing::debug;

/// How an external process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExitOutcome {
    pub success: bool,
    /// `None` when the process was ended by a signal.
    pub code: Option<i32>,
}

impl ExitOutcome {
    pub fn from_code(code: i32) -> Self {
        ExitOutcome { success: code == 0, code: Some(code) }
    }

    pub fn signalled() -> Self {
        ExitOutcome { success: false, code: None }
    }
}

/// A running encoder process as seen by the job runner.
pub trait EncoderProcess: Send {
    fn id(&self) -> u32;
    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>>;
    fn take_stderr(&mut self) -> Option<Box<dyn Read + Send>>;
    /// Asks the process to stop; it may take a moment to comply.
    fn terminate(&mut self) -> io::Result<()>;
    fn kill(&mut self) -> io::Result<()>;
    fn try_wait(&mut self) -> io::Result<Option<ExitOutcome>>;
}

/// Starts encoder processes. The runner only ever talks to this seam.
pub trait Launcher: Send + Sync {
    fn launch(&self, program: &Path, args: &[OsString]) -> io::Result<Box<dyn EncoderProcess>>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn launch(&self, program: &Path, args: &[OsString]) -> io::Result<Box<dyn EncoderProcess>> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        debug!(pid = child.id(), program = ?program, "spawned encoder");
        Ok(Box::new(SystemProcess { child }))
    }
}

pub struct SystemProcess {
    child: Child,
}

impl EncoderProcess for SystemProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child.stdout.take().map(|s| Box::new(s) as Box<dyn Read + Send>)
    }

    fn take_stderr(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child.stderr.take().map(|s| Box::new(s) as Box<dyn Read + Send>)
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        signal::kill(Pid::from_raw(self.child.id() as i32), Signal::SIGTERM)
            .map_err(io::Error::from)
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        self.child.kill()
    }

    fn kill(&mut self) -> io::Result<()> {
        match self.child.kill() {
            // already exited
            Err(err) if err.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitOutcome>> {
        Ok(self.child.try_wait()?.map(|status| ExitOutcome {
            success: status.success(),
            code: status.code(),
        }))
    }
}
