//! Errors raised while locating, configuring, and driving an instance.
//!
//! Every failure of an external command carries the operation name, the full
//! command line, and the captured standard error so a failing test can be
//! diagnosed without re-running anything by hand. I/O errors are wrapped in
//! `Arc` to keep the enum small and cloneable.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::template::TemplateError;

/// Errors arising from instance operations.
#[derive(Debug, Clone, Error)]
pub enum InstanceError {
    /// No candidate directory held a complete set of engine utilities.
    #[error("couldn't find a complete PostgreSQL installation; tried {}", join_paths(.tried))]
    NotFound {
        /// Candidate directories examined, in search order.
        tried: Vec<PathBuf>,
    },

    /// An option was applied in a state that forbids it, or failed its own
    /// validation.
    #[error("option '{option}' rejected: {reason}")]
    ConfigurationRejected {
        /// Name of the rejected option.
        option: &'static str,
        /// Why the option was rejected.
        reason: String,
    },

    /// The caller-supplied working directory is missing or unreadable.
    #[error("working directory {} not present or not readable: {source}", .path.display())]
    NotReady {
        /// Directory that was checked.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The instance has been torn down and can no longer be used.
    #[error("instance is defunct")]
    Defunct,

    /// The operation needs a running server.
    #[error("server not started; cannot {operation}")]
    NotRunning {
        /// Operation that was attempted.
        operation: &'static str,
    },

    /// An external command was launched but exited unsuccessfully.
    #[error(
        "{operation} failed (exit status {}); command: {command_line}; stderr: {stderr}",
        display_status(.status)
    )]
    ExternalCommandFailed {
        /// Operation the command was part of.
        operation: &'static str,
        /// Full command line, program first.
        command_line: String,
        /// Exit code, or `None` when the process was killed by a signal.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },

    /// An external command could not be launched at all.
    #[error("{operation} failed: could not launch {}: {source}", .program.display())]
    LaunchFailed {
        /// Operation the command was part of.
        operation: &'static str,
        /// Program that failed to launch.
        program: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The version query produced no usable version token.
    #[error("could not determine engine version from {} output {output:?}", .program.display())]
    UnrecognisedVersion {
        /// Program that was queried.
        program: PathBuf,
        /// Trimmed output of the query.
        output: String,
    },

    /// A filesystem step performed by the controller itself failed.
    #[error("filesystem operation on {} failed: {source}", .path.display())]
    Filesystem {
        /// Path being created or written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Copying streamed command output into the caller's sink failed.
    #[error("{operation} failed while streaming output: {source}")]
    Stream {
        /// Operation whose output was being streamed.
        operation: &'static str,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

impl InstanceError {
    pub(crate) fn rejected(option: &'static str, reason: impl Into<String>) -> Self {
        Self::ConfigurationRejected {
            option,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_template(error: &TemplateError) -> Self {
        Self::rejected("config_template", error.to_string())
    }

    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(":")
}

fn display_status(status: &Option<i32>) -> String {
    status.map_or_else(|| String::from("signal"), |code| code.to_string())
}
