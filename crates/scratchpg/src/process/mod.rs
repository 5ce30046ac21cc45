//! External command execution.
//!
//! [`ProcessRunner`] is the seam between the lifecycle controller and the
//! operating system. The production implementation, [`SystemRunner`], spawns
//! real child processes; tests substitute runners that script the engine's
//! behaviour without touching the filesystem or process table.
//!
//! The orchestrator built on top of the runner owns the shared protocol for
//! every invocation: log the command line, execute, log the captured output,
//! and classify failures.

use std::ffi::{OsStr, OsString};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

mod orchestrator;
mod runner;

pub(crate) use orchestrator::Orchestrator;
pub use runner::SystemRunner;

/// A program and its argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<OsString>,
}

impl Invocation {
    /// Starts an invocation of `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    /// Program to execute.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments passed to the program, excluding the program itself.
    #[must_use]
    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// The full command line, space separated, for diagnostics.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

/// What a finished process left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, or `None` when the process was terminated by a signal.
    pub status: Option<i32>,
    /// Captured standard output. Empty for streamed invocations.
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    /// Output of a process that exited with status zero.
    #[must_use]
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    /// Output of a process that exited with `code` after writing `stderr`.
    #[must_use]
    pub fn failure(code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            status: Some(code),
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns `true` when the process exited with status zero.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == Some(0)
    }

    /// Captured standard error as text.
    #[must_use]
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_owned()
    }
}

/// Failures of a streamed invocation that happen outside the process.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The process could not be started.
    #[error("failed to launch: {0}")]
    Launch(#[source] io::Error),
    /// Copying standard output into the sink failed.
    #[error("failed to transfer output: {0}")]
    Transfer(#[source] io::Error),
}

/// Executes external commands on behalf of the controller.
pub trait ProcessRunner {
    /// Runs the invocation to completion, capturing standard output and
    /// standard error.
    ///
    /// # Errors
    ///
    /// Returns an I/O error only when the process could not be launched or
    /// waited on; a non-zero exit is reported through [`ProcessOutput`].
    fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput>;

    /// Runs the invocation, copying standard output into `sink` as it is
    /// produced. Standard error is captured and returned.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Launch`] when the process could not be started
    /// and [`StreamError::Transfer`] when copying into `sink` failed.
    fn stream(
        &self,
        invocation: &Invocation,
        sink: &mut dyn Write,
    ) -> Result<ProcessOutput, StreamError>;
}
