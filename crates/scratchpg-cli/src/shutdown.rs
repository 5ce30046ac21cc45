//! Termination signal handling for `scratchpg run`.
//!
//! Handlers are registered before the server is started, so a signal that
//! arrives while `pg_ctl` or `psql` is still running is queued instead of
//! killing the process. The queued signal then ends the wait immediately and
//! the server is torn down as usual.

use std::io;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::{debug, info};

use crate::CLI_TARGET;

/// Signals that end a `run` session.
pub(crate) const TERMINATION_SIGNALS: [i32; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// Source of the shutdown request that ends a `run` session.
pub(crate) trait ShutdownSignal {
    /// Starts intercepting termination signals. Called before any server is
    /// started; signals received from then on are held until [`wait`].
    ///
    /// [`wait`]: ShutdownSignal::wait
    fn install(&mut self) -> Result<(), ShutdownError>;

    /// Blocks until shutdown should proceed.
    fn wait(&mut self) -> Result<(), ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub(crate) enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Listener backed by process signal handlers.
#[derive(Default)]
pub(crate) struct SystemShutdownSignal {
    signals: Option<Signals>,
}

impl SystemShutdownSignal {
    fn registered(&mut self) -> Result<&mut Signals, ShutdownError> {
        let signals = match self.signals.take() {
            Some(signals) => signals,
            None => {
                let fresh = Signals::new(TERMINATION_SIGNALS)
                    .map_err(|source| ShutdownError::Install { source })?;
                debug!(target: CLI_TARGET, "termination signal handlers installed");
                fresh
            }
        };
        Ok(self.signals.insert(signals))
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn install(&mut self) -> Result<(), ShutdownError> {
        self.registered()?;
        Ok(())
    }

    fn wait(&mut self) -> Result<(), ShutdownError> {
        let signals = self.registered()?;
        if let Some(signal) = signals.forever().next() {
            info!(target: CLI_TARGET, signal, "shutdown signal received");
        }
        Ok(())
    }
}
