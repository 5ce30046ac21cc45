//! Diagnostic sinks for external command activity.
//!
//! The orchestrator writes each command line before running it and each line
//! of captured output afterwards. Where those lines go is up to the caller:
//! [`DiscardLog`] drops them (the default), [`TracingLog`] forwards them to
//! `tracing`, and any `Fn(&str)` closure can be used to route them into a
//! test's own output.

use tracing::info;

/// Tracing target for lines forwarded by [`TracingLog`].
const EXTERNAL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::external");

/// Prefix attached to every diagnostic line.
pub(crate) const LINE_PREFIX: &str = "scratchpg: ";

/// Receives diagnostic lines from the subprocess orchestrator.
pub trait LogSink: Send + Sync {
    /// Records a single line.
    fn log(&self, line: &str);
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, line: &str) {
        self(line);
    }
}

/// Sink that drops every line.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardLog;

impl LogSink for DiscardLog {
    fn log(&self, _line: &str) {}
}

/// Sink that forwards every line to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl LogSink for TracingLog {
    fn log(&self, line: &str) {
        info!(target: EXTERNAL_TARGET, "{line}");
    }
}
