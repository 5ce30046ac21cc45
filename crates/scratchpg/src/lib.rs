//! Disposable PostgreSQL servers for tests.
//!
//! `scratchpg` finds an installed PostgreSQL engine, initialises a private
//! data directory, starts a server listening only on a Unix-domain socket,
//! and removes everything again when the test is done:
//!
//! ```no_run
//! use scratchpg::Instance;
//!
//! let mut instance = Instance::new()?;
//! instance.start()?;
//! let uri = instance.create_db("orders", "")?;
//! // connect to `uri` with the driver of your choice
//! # drop(uri);
//! let mut dump = Vec::new();
//! instance.dump_db("orders", &mut dump)?;
//! instance.teardown()?;
//! # Ok::<(), scratchpg::InstanceError>(())
//! ```
//!
//! The lifecycle is a small state machine (see [`InstanceState`]); calling
//! operations out of order returns an error instead of leaving stray
//! processes or directories behind. External commands run through the
//! [`ProcessRunner`] seam so the controller can be exercised without a real
//! installation.

mod error;
mod instance;
mod locator;
mod log;
mod options;
mod process;
mod state;
mod template;

#[cfg(test)]
mod tests;

pub use error::InstanceError;
pub use instance::{CONFIG_FILE, Instance, SERVER_LOG_FILE};
pub use locator::{
    Engine, EngineCommands, Locator, SearchSpace, Utility, WELL_KNOWN_GLOBS,
};
pub use log::{DiscardLog, LogSink, TracingLog};
pub use options::{
    ADMIN_DATABASE, ADMIN_USER, DEFAULT_ENCODING, DIR_PREFIX, InstanceBuilder, InstanceOption,
    URI_SCHEME,
};
pub use process::{Invocation, ProcessOutput, ProcessRunner, StreamError, SystemRunner};
pub use state::InstanceState;
pub use template::{ConfigTemplate, DEFAULT_CONFIG_TEMPLATE, TemplateError, WORKING_DIR_VARIABLE};

/// Locates a complete engine installation without building an instance.
///
/// With a non-empty `hint` only that directory is examined; otherwise the
/// executable search path and [`WELL_KNOWN_GLOBS`] are searched in order.
///
/// # Errors
///
/// Returns [`InstanceError::NotFound`] listing every directory examined.
pub fn installed(hint: Option<&std::path::Path>) -> Result<EngineCommands, InstanceError> {
    Locator::system().find_commands(hint)
}
