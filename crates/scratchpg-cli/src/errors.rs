//! Error type reported by the command-line front end.

use std::io;

use scratchpg::InstanceError;
use thiserror::Error;

use crate::shutdown::ShutdownError;
use crate::telemetry::TelemetryError;

/// Failures reported by the front end before it exits.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    #[error("{0}")]
    Usage(clap::Error),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Instance(#[from] InstanceError),
    #[error("failed to wait for shutdown: {0}")]
    Shutdown(#[from] ShutdownError),
    #[error("failed to write output: {0}")]
    Output(#[source] io::Error),
}
