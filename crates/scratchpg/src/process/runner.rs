//! Process runner backed by `std::process`.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use super::{Invocation, ProcessOutput, ProcessRunner, StreamError};

const RUNNER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Spawns real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    fn command(invocation: &Invocation) -> Command {
        let mut command = Command::new(invocation.program());
        command.args(invocation.arguments()).stdin(Stdio::null());
        command
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
        let output = Self::command(invocation).output()?;
        debug!(
            target: RUNNER_TARGET,
            program = %invocation.program().display(),
            status = ?output.status,
            "process exited"
        );
        Ok(ProcessOutput {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn stream(
        &self,
        invocation: &Invocation,
        sink: &mut dyn Write,
    ) -> Result<ProcessOutput, StreamError> {
        // Standard error goes to an anonymous file so a chatty process cannot
        // block on a full pipe while standard output is being copied.
        let mut stderr_file = tempfile::tempfile().map_err(StreamError::Launch)?;
        let stderr_handle = stderr_file.try_clone().map_err(StreamError::Launch)?;

        let mut child = Self::command(invocation)
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr_handle))
            .spawn()
            .map_err(StreamError::Launch)?;

        let Some(mut stdout) = child.stdout.take() else {
            drop(child.kill());
            drop(child.wait());
            return Err(StreamError::Launch(io::Error::other(
                "failed to capture stdout",
            )));
        };

        let copied = match io::copy(&mut stdout, sink) {
            Ok(copied) => copied,
            Err(error) => {
                warn!(
                    target: RUNNER_TARGET,
                    program = %invocation.program().display(),
                    error = %error,
                    "sink rejected streamed output, killing process"
                );
                drop(child.kill());
                drop(child.wait());
                return Err(StreamError::Transfer(error));
            }
        };
        drop(stdout);

        let status = child.wait().map_err(StreamError::Transfer)?;
        debug!(
            target: RUNNER_TARGET,
            program = %invocation.program().display(),
            copied,
            ?status,
            "streamed process exited"
        );

        let mut stderr = Vec::new();
        stderr_file
            .seek(SeekFrom::Start(0))
            .and_then(|_| stderr_file.read_to_end(&mut stderr))
            .map_err(StreamError::Transfer)?;

        Ok(ProcessOutput {
            status: status.code(),
            stdout: Vec::new(),
            stderr,
        })
    }
}
