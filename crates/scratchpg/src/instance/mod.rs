//! The instance lifecycle controller.
//!
//! An [`Instance`] owns one throwaway database server. It is configured
//! through [`InstanceOption`]s, initialised and started lazily by
//! [`Instance::start`], and always ends in [`InstanceState::Defunct`] after
//! [`Instance::teardown`]. Every operation checks the current state before
//! touching the filesystem or spawning a process, so calling things in the
//! wrong order fails fast and leaves nothing behind.
//!
//! On disk, the data directory lives at `<working dir>/<engine version>/` so
//! that several engine versions can share one caller-supplied working
//! directory. The working directory is also the server's socket directory.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::InstanceError;
use crate::locator::{Engine, Locator, Utility};
use crate::options::{
    ADMIN_DATABASE, ADMIN_USER, InstanceBuilder, InstanceOption, Settings, URI_SCHEME,
    ensure_unconfigured,
};
use crate::process::{Invocation, Orchestrator, ProcessRunner, SystemRunner};
use crate::state::InstanceState;

mod workdir;

pub(crate) use workdir::WorkingDir;

pub(crate) const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");

/// Name of the rendered server configuration file inside the data directory.
pub const CONFIG_FILE: &str = "postgresql.conf";

/// Name of the server log file inside the data directory.
pub const SERVER_LOG_FILE: &str = "postgres.log";

/// Server settings applied on every start. Only the Unix-domain socket is
/// opened.
const START_SETTINGS: &str = "-c listen_addresses=''";

/// A disposable database server and its on-disk state.
///
/// Operations take `&mut self` or `&self` and block until the underlying
/// command exits. Separate instances with separate working directories are
/// independent and may be used from separate threads.
///
/// Dropping an instance that was not torn down tears it down on a best-effort
/// basis; failures are logged. Call [`Instance::teardown`] to observe them.
pub struct Instance<R: ProcessRunner = SystemRunner> {
    runner: R,
    locator: Locator,
    engine: Engine,
    settings: Settings,
    state: InstanceState,
}

impl Instance<SystemRunner> {
    /// Builds an instance with default options.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::NotFound`] when no complete engine
    /// installation can be located, or an error from the version query.
    pub fn new() -> Result<Self, InstanceError> {
        Self::builder().build()
    }

    /// Builds an instance, applying `options` in order.
    ///
    /// # Errors
    ///
    /// Returns the first option rejection or engine resolution failure. No
    /// instance is produced in that case.
    pub fn with_options(
        options: impl IntoIterator<Item = InstanceOption>,
    ) -> Result<Self, InstanceError> {
        Self::builder().options(options).build()
    }

    /// Starts an [`InstanceBuilder`].
    pub const fn builder() -> InstanceBuilder {
        InstanceBuilder::new()
    }
}

impl<R> Instance<R>
where
    R: ProcessRunner,
{
    pub(crate) const fn assemble(
        runner: R,
        locator: Locator,
        engine: Engine,
        settings: Settings,
    ) -> Self {
        Self {
            runner,
            locator,
            engine,
            settings,
            state: InstanceState::Uninitialized,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> InstanceState {
        self.state
    }

    /// The resolved engine.
    #[must_use]
    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Version reported by the resolved engine.
    #[must_use]
    pub fn engine_version(&self) -> &str {
        self.engine.version()
    }

    /// The working directory, once chosen or generated.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.settings.working_dir.path()
    }

    /// Returns `true` when the working directory was generated by this
    /// instance and is removed on teardown.
    #[must_use]
    pub const fn owns_working_dir(&self) -> bool {
        self.settings.working_dir.is_owned()
    }

    /// `<working dir>/<engine version>`, once a working directory exists.
    #[must_use]
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.working_dir()
            .map(|dir| dir.join(self.engine.version()))
    }

    /// Encoding handed to the initializer.
    #[must_use]
    pub fn encoding(&self) -> &str {
        &self.settings.encoding
    }

    /// The process runner driving external commands.
    #[must_use]
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    /// Applies one option to a live instance.
    ///
    /// The same state guards as construction apply: configuration is frozen
    /// once the data directory has been initialised. A search path is
    /// resolved immediately and only replaces the current engine when a
    /// complete installation is found there.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::ConfigurationRejected`] when the option is not
    /// allowed in the current state or fails validation, or the locator's
    /// error for an unusable search path.
    pub fn set_option(&mut self, option: InstanceOption) -> Result<(), InstanceError> {
        if let InstanceOption::SearchPath(dir) = &option {
            ensure_unconfigured(option.name(), self.state)?;
            let engine = self.locator.locate(Some(dir), &self.orchestrator())?;
            self.engine = engine;
        }
        self.settings.apply(option, self.state)
    }

    /// Initialises the data directory if needed and starts the server.
    ///
    /// Starting an instance whose server is already running does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::Defunct`] after teardown,
    /// [`InstanceError::NotReady`] when a caller-supplied working directory is
    /// missing, and command or filesystem errors from initialisation and the
    /// start command.
    pub fn start(&mut self) -> Result<(), InstanceError> {
        match self.state {
            InstanceState::Defunct => return Err(InstanceError::Defunct),
            InstanceState::ServerStarted => {
                debug!(target: LIFECYCLE_TARGET, "server already started");
                return Ok(());
            }
            _ => {}
        }

        let data_dir = if self.state < InstanceState::Initialized {
            self.initialize()?
        } else {
            self.materialised_data_dir()?
        };

        // TODO: accept extra server settings through an option and append
        // them to START_SETTINGS.
        let log_file = data_dir.join(SERVER_LOG_FILE);
        let invocation = Invocation::new(self.engine.commands().path(Utility::Controller))
            .args(["-w", "-o", START_SETTINGS, "-s", "-D"])
            .arg(&data_dir)
            .arg("-l")
            .arg(&log_file)
            .arg("start");
        self.orchestrator().run("start server", &invocation)?;

        self.transition(InstanceState::ServerStarted);
        Ok(())
    }

    /// Creates database `name` and returns its connection string.
    ///
    /// `extra_args` is appended verbatim to the `CREATE DATABASE` statement,
    /// e.g. `TEMPLATE template0`.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::Defunct`] after teardown,
    /// [`InstanceError::NotRunning`] before the server is started, and
    /// [`InstanceError::ExternalCommandFailed`] when the statement fails.
    pub fn create_db(&self, name: &str, extra_args: &str) -> Result<String, InstanceError> {
        self.ensure_running("create database")?;
        let invocation = Invocation::new(self.engine.commands().path(Utility::Shell))
            .arg("-c")
            .arg(create_database_statement(name, extra_args))
            .arg(self.db_uri(ADMIN_DATABASE));
        self.orchestrator().run("create database", &invocation)?;
        Ok(self.db_uri(name))
    }

    /// Streams a plain-text dump of database `name` into `sink`.
    ///
    /// Output is copied as it is produced; the dump is never held in memory
    /// as a whole.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::Defunct`] after teardown,
    /// [`InstanceError::NotRunning`] before the server is started,
    /// [`InstanceError::ExternalCommandFailed`] when the dump fails (for
    /// instance because the database does not exist), and
    /// [`InstanceError::Stream`] when `sink` rejects the output.
    pub fn dump_db(&self, name: &str, sink: &mut dyn Write) -> Result<(), InstanceError> {
        self.ensure_running("dump database")?;
        let invocation = Invocation::new(self.engine.commands().path(Utility::Dumper))
            .arg(self.db_uri(name));
        self.orchestrator()
            .stream("dump database", &invocation, sink)?;
        Ok(())
    }

    /// Connection string for database `name`.
    ///
    /// The working directory serves as the socket host, so the string is
    /// only usable once the server is running.
    #[must_use]
    pub fn db_uri(&self, name: &str) -> String {
        let host = self
            .working_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_default();
        format!("{URI_SCHEME}:///{name}?host={host}&user={ADMIN_USER}")
    }

    /// Stops the server if running, removes a generated working directory,
    /// and marks the instance defunct.
    ///
    /// Teardown is idempotent and may be called in any state. The instance
    /// becomes defunct even when the stop command fails; that failure is
    /// returned after cleanup has finished.
    ///
    /// # Errors
    ///
    /// Returns the stop command's error, if any.
    pub fn teardown(&mut self) -> Result<(), InstanceError> {
        if self.state == InstanceState::Defunct {
            return Ok(());
        }

        let stopped = if self.state.is_at_least(InstanceState::ServerStarted) {
            self.stop_server()
        } else {
            Ok(())
        };

        if self.settings.working_dir.is_owned() {
            if let Some(dir) = self.working_dir() {
                self.orchestrator()
                    .note(&format!("cleaning up {}", dir.display()));
            }
            self.settings.working_dir.release();
        }

        self.transition(InstanceState::Defunct);
        stopped
    }

    /// Tears down, treating any failure as fatal.
    ///
    /// # Panics
    ///
    /// Panics when [`Instance::teardown`] returns an error.
    pub fn teardown_or_panic(&mut self) {
        if let Err(error) = self.teardown() {
            panic!("teardown failed: {error}");
        }
    }

    fn initialize(&mut self) -> Result<PathBuf, InstanceError> {
        match &self.settings.working_dir {
            WorkingDir::Unset => {
                self.settings.working_dir = WorkingDir::generate(&self.settings.dir_prefix)?;
                self.transition(InstanceState::Present);
            }
            WorkingDir::Borrowed(dir) | WorkingDir::Released(dir) => {
                if let Err(source) = fs::read_dir(dir) {
                    let path = dir.clone();
                    self.transition(InstanceState::NotPresent);
                    return Err(InstanceError::NotReady {
                        path,
                        source: Arc::new(source),
                    });
                }
            }
            WorkingDir::Owned(_) => {}
        }

        let working_dir = self.materialised_working_dir()?;
        let data_dir = working_dir.join(self.engine.version());
        if data_dir.exists() {
            debug!(
                target: LIFECYCLE_TARGET,
                data_dir = %data_dir.display(),
                "reusing existing data directory"
            );
        } else {
            let invocation =
                Invocation::new(self.engine.commands().path(Utility::Initializer))
                    .args(["--nosync", "-U", ADMIN_USER, "-D"])
                    .arg(&data_dir)
                    .arg("-E")
                    .arg(&self.settings.encoding)
                    .args(["-A", "trust"]);
            self.orchestrator().run("initialise data directory", &invocation)?;
        }

        self.write_config(working_dir, &data_dir)?;
        self.transition(InstanceState::Initialized);
        Ok(data_dir)
    }

    fn write_config(&self, working_dir: &Path, data_dir: &Path) -> Result<(), InstanceError> {
        let config_path = data_dir.join(CONFIG_FILE);
        self.orchestrator()
            .note(&format!("generating {}", config_path.display()));
        let rendered = self
            .settings
            .config_template
            .render(working_dir)
            .map_err(|error| InstanceError::invalid_template(&error))?;

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(&config_path)
            .map_err(|source| InstanceError::filesystem(&config_path, source))?;
        file.write_all(rendered.as_bytes())
            .map_err(|source| InstanceError::filesystem(&config_path, source))?;
        Ok(())
    }

    fn stop_server(&self) -> Result<(), InstanceError> {
        let data_dir = self.materialised_data_dir()?;
        let invocation = Invocation::new(self.engine.commands().path(Utility::Controller))
            .args(["-m", "immediate", "-w", "-D"])
            .arg(&data_dir)
            .arg("stop");
        self.orchestrator().run("stop server", &invocation)?;
        Ok(())
    }

    fn ensure_running(&self, operation: &'static str) -> Result<(), InstanceError> {
        match self.state {
            InstanceState::Defunct => Err(InstanceError::Defunct),
            InstanceState::ServerStarted => Ok(()),
            _ => Err(InstanceError::NotRunning { operation }),
        }
    }

    fn materialised_data_dir(&self) -> Result<PathBuf, InstanceError> {
        Ok(self.materialised_working_dir()?.join(self.engine.version()))
    }

    fn materialised_working_dir(&self) -> Result<&Path, InstanceError> {
        self.working_dir().ok_or_else(|| InstanceError::NotReady {
            path: PathBuf::new(),
            source: Arc::new(io::Error::new(
                io::ErrorKind::NotFound,
                "no working directory has been materialised",
            )),
        })
    }

    fn orchestrator(&self) -> Orchestrator<'_, R> {
        Orchestrator::new(&self.runner, self.settings.log.as_ref())
    }

    fn transition(&mut self, next: InstanceState) {
        info!(
            target: LIFECYCLE_TARGET,
            from = %self.state,
            to = %next,
            "instance state changed"
        );
        self.state = next;
    }
}

impl<R> Drop for Instance<R>
where
    R: ProcessRunner,
{
    fn drop(&mut self) {
        if self.state == InstanceState::Defunct {
            return;
        }
        if let Err(error) = self.teardown() {
            warn!(
                target: LIFECYCLE_TARGET,
                error = %error,
                "teardown on drop failed"
            );
        }
    }
}

/// `CREATE DATABASE "<name>" <extra>`, with quotes in `name` doubled.
fn create_database_statement(name: &str, extra_args: &str) -> String {
    let quoted = name.replace('"', "\"\"");
    let extra = extra_args.trim();
    if extra.is_empty() {
        format!("CREATE DATABASE \"{quoted}\"")
    } else {
        format!("CREATE DATABASE \"{quoted}\" {extra}")
    }
}
