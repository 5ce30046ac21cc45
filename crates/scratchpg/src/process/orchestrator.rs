//! Shared invocation protocol for every external command.

use std::io::Write;
use std::sync::Arc;

use tracing::debug;

use super::{Invocation, ProcessOutput, ProcessRunner, StreamError};
use crate::error::InstanceError;
use crate::log::{LINE_PREFIX, LogSink};

const ORCHESTRATOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::orchestrator");

/// Logs, runs, and classifies external commands.
///
/// The command line is written to the sink before the process is launched.
/// Launch failures become [`InstanceError::LaunchFailed`]; a launched process
/// that exits unsuccessfully becomes [`InstanceError::ExternalCommandFailed`]
/// carrying the command line and captured standard error.
pub(crate) struct Orchestrator<'a, R: ?Sized> {
    runner: &'a R,
    log: &'a dyn LogSink,
}

impl<'a, R> Orchestrator<'a, R>
where
    R: ProcessRunner + ?Sized,
{
    pub(crate) const fn new(runner: &'a R, log: &'a dyn LogSink) -> Self {
        Self { runner, log }
    }

    /// Runs to completion with output captured.
    pub(crate) fn run(
        &self,
        operation: &'static str,
        invocation: &Invocation,
    ) -> Result<ProcessOutput, InstanceError> {
        let command_line = invocation.command_line();
        self.note(&command_line);
        debug!(
            target: ORCHESTRATOR_TARGET,
            operation,
            command = %command_line,
            "running external command"
        );

        let output = self
            .runner
            .run(invocation)
            .map_err(|source| InstanceError::LaunchFailed {
                operation,
                program: invocation.program().to_path_buf(),
                source: Arc::new(source),
            })?;

        self.emit_output(&output.stdout);
        self.emit_output(&output.stderr);
        Self::classify(operation, command_line, output)
    }

    /// Runs with standard output copied into `sink` as it arrives.
    pub(crate) fn stream(
        &self,
        operation: &'static str,
        invocation: &Invocation,
        sink: &mut dyn Write,
    ) -> Result<ProcessOutput, InstanceError> {
        let command_line = invocation.command_line();
        self.note(&format!("starting {operation}: {command_line}"));
        debug!(
            target: ORCHESTRATOR_TARGET,
            operation,
            command = %command_line,
            "streaming external command"
        );

        let output = self
            .runner
            .stream(invocation, sink)
            .map_err(|error| match error {
                StreamError::Launch(source) => InstanceError::LaunchFailed {
                    operation,
                    program: invocation.program().to_path_buf(),
                    source: Arc::new(source),
                },
                StreamError::Transfer(source) => InstanceError::Stream {
                    operation,
                    source: Arc::new(source),
                },
            })?;

        self.emit_output(&output.stderr);
        Self::classify(operation, command_line, output)
    }

    fn classify(
        operation: &'static str,
        command_line: String,
        output: ProcessOutput,
    ) -> Result<ProcessOutput, InstanceError> {
        if output.succeeded() {
            return Ok(output);
        }
        Err(InstanceError::ExternalCommandFailed {
            operation,
            command_line,
            status: output.status,
            stderr: output.stderr_text(),
        })
    }

    /// Writes one prefixed line to the sink.
    pub(crate) fn note(&self, line: &str) {
        self.log.log(&format!("{LINE_PREFIX}{line}"));
    }

    fn emit_output(&self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        for line in text.trim().lines() {
            self.note(line);
        }
    }
}
