//! Instance configuration and the options that change it.
//!
//! Options are values rather than closures so they can be collected, logged,
//! and applied either while building an instance or afterwards through
//! [`Instance::set_option`](crate::Instance::set_option). Each application is
//! guarded by the lifecycle state; building is atomic, so a rejected option
//! never yields a partially configured instance.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::InstanceError;
use crate::instance::{Instance, WorkingDir};
use crate::locator::{Locator, SearchSpace};
use crate::log::{DiscardLog, LogSink};
use crate::process::{Orchestrator, ProcessRunner, SystemRunner};
use crate::state::InstanceState;
use crate::template::ConfigTemplate;

/// Encoding passed to the initializer unless overridden.
pub const DEFAULT_ENCODING: &str = "UNICODE";

/// Superuser created by the initializer and used in every connection string.
pub const ADMIN_USER: &str = "postgres";

/// Database connected to when issuing administrative statements.
pub const ADMIN_DATABASE: &str = "postgres";

/// Scheme of generated connection strings.
pub const URI_SCHEME: &str = "postgresql";

/// Leading component of generated working directory names.
pub const DIR_PREFIX: &str = "scratchpg.";

const SEARCH_PATH: &str = "search_path";
const WORKING_DIR: &str = "working_dir";
const ENCODING: &str = "encoding";
const LOG: &str = "log";
const CONFIG_TEMPLATE: &str = "config_template";

/// A single configuration change.
#[derive(Clone)]
pub enum InstanceOption {
    /// Resolve the engine from this directory only.
    SearchPath(PathBuf),
    /// Use a caller-owned working directory. It is never deleted.
    WorkingDir(PathBuf),
    /// Encoding handed verbatim to the initializer.
    Encoding(String),
    /// Sink receiving every diagnostic line.
    Log(Arc<dyn LogSink>),
    /// Replacement server configuration template.
    ConfigTemplate(String),
}

impl InstanceOption {
    /// Wraps `sink` as a [`InstanceOption::Log`].
    #[must_use]
    pub fn log(sink: impl LogSink + 'static) -> Self {
        Self::Log(Arc::new(sink))
    }

    /// Name of the option, as reported in rejections.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SearchPath(_) => SEARCH_PATH,
            Self::WorkingDir(_) => WORKING_DIR,
            Self::Encoding(_) => ENCODING,
            Self::Log(_) => LOG,
            Self::ConfigTemplate(_) => CONFIG_TEMPLATE,
        }
    }
}

impl fmt::Debug for InstanceOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SearchPath(dir) => f.debug_tuple("SearchPath").field(dir).finish(),
            Self::WorkingDir(dir) => f.debug_tuple("WorkingDir").field(dir).finish(),
            Self::Encoding(encoding) => f.debug_tuple("Encoding").field(encoding).finish(),
            Self::Log(_) => f.write_str("Log(..)"),
            Self::ConfigTemplate(source) => f.debug_tuple("ConfigTemplate").field(source).finish(),
        }
    }
}

/// Mutable configuration held by an instance.
pub(crate) struct Settings {
    pub(crate) search_hint: Option<PathBuf>,
    pub(crate) working_dir: WorkingDir,
    pub(crate) encoding: String,
    pub(crate) config_template: ConfigTemplate,
    pub(crate) log: Arc<dyn LogSink>,
    pub(crate) dir_prefix: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            search_hint: None,
            working_dir: WorkingDir::Unset,
            encoding: String::from(DEFAULT_ENCODING),
            config_template: ConfigTemplate::default(),
            log: Arc::new(DiscardLog),
            dir_prefix: owned_dir_prefix(),
        }
    }
}

impl Settings {
    /// Applies `option` to the configuration, honouring the state guards.
    ///
    /// A search path is only recorded here; resolving it is the caller's job.
    pub(crate) fn apply(
        &mut self,
        option: InstanceOption,
        state: InstanceState,
    ) -> Result<(), InstanceError> {
        ensure_unconfigured(option.name(), state)?;
        match option {
            InstanceOption::SearchPath(dir) => self.search_hint = Some(dir),
            InstanceOption::WorkingDir(dir) => {
                if self.working_dir.is_owned() {
                    return Err(InstanceError::rejected(
                        WORKING_DIR,
                        "a generated working directory is already in use",
                    ));
                }
                self.working_dir = WorkingDir::Borrowed(dir);
            }
            InstanceOption::Encoding(encoding) => self.encoding = encoding,
            InstanceOption::Log(sink) => self.log = sink,
            InstanceOption::ConfigTemplate(source) => {
                self.config_template = ConfigTemplate::parse(source)
                    .map_err(|error| InstanceError::invalid_template(&error))?;
            }
        }
        Ok(())
    }
}

/// Rejects configuration changes once the data directory has been prepared.
pub(crate) fn ensure_unconfigured(
    option: &'static str,
    state: InstanceState,
) -> Result<(), InstanceError> {
    if state.is_at_least(InstanceState::Initialized) {
        return Err(InstanceError::rejected(
            option,
            format!("cannot be changed once the instance is {state}"),
        ));
    }
    Ok(())
}

/// `scratchpg.<user>.`, or [`DIR_PREFIX`] when the user cannot be determined.
fn owned_dir_prefix() -> String {
    current_user().map_or_else(
        || String::from(DIR_PREFIX),
        |user| format!("{DIR_PREFIX}{user}."),
    )
}

#[cfg(unix)]
fn current_user() -> Option<String> {
    use nix::unistd::{User, geteuid};

    User::from_uid(geteuid())
        .ok()
        .flatten()
        .map(|user| user.name)
        .filter(|name| !name.is_empty())
}

#[cfg(not(unix))]
fn current_user() -> Option<String> {
    None
}

/// Collects options and builds an [`Instance`].
///
/// ```no_run
/// use scratchpg::{Instance, TracingLog};
///
/// let mut instance = Instance::builder()
///     .encoding("UTF8")
///     .log(TracingLog)
///     .build()?;
/// instance.start()?;
/// let uri = instance.create_db("fixtures", "")?;
/// # drop(uri);
/// instance.teardown()?;
/// # Ok::<(), scratchpg::InstanceError>(())
/// ```
#[must_use]
pub struct InstanceBuilder<R = SystemRunner> {
    runner: R,
    search: Option<SearchSpace>,
    options: Vec<InstanceOption>,
}

impl InstanceBuilder<SystemRunner> {
    /// Starts a builder that spawns real processes and searches the system.
    pub const fn new() -> Self {
        Self {
            runner: SystemRunner,
            search: None,
            options: Vec::new(),
        }
    }
}

impl Default for InstanceBuilder<SystemRunner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> InstanceBuilder<R>
where
    R: ProcessRunner,
{
    /// Queues an option. Options are applied in the order given.
    pub fn option(mut self, option: InstanceOption) -> Self {
        self.options.push(option);
        self
    }

    /// Queues several options.
    pub fn options(mut self, options: impl IntoIterator<Item = InstanceOption>) -> Self {
        self.options.extend(options);
        self
    }

    /// Queues [`InstanceOption::SearchPath`].
    pub fn search_path(self, dir: impl Into<PathBuf>) -> Self {
        self.option(InstanceOption::SearchPath(dir.into()))
    }

    /// Queues [`InstanceOption::WorkingDir`].
    pub fn working_dir(self, dir: impl Into<PathBuf>) -> Self {
        self.option(InstanceOption::WorkingDir(dir.into()))
    }

    /// Queues [`InstanceOption::Encoding`].
    pub fn encoding(self, encoding: impl Into<String>) -> Self {
        self.option(InstanceOption::Encoding(encoding.into()))
    }

    /// Queues [`InstanceOption::Log`].
    pub fn log(self, sink: impl LogSink + 'static) -> Self {
        self.option(InstanceOption::log(sink))
    }

    /// Queues [`InstanceOption::ConfigTemplate`].
    pub fn config_template(self, source: impl Into<String>) -> Self {
        self.option(InstanceOption::ConfigTemplate(source.into()))
    }

    /// Replaces the candidate directories searched when no search path is set.
    pub fn search_space(mut self, search: SearchSpace) -> Self {
        self.search = Some(search);
        self
    }

    /// Replaces the process runner.
    pub fn runner<T: ProcessRunner>(self, runner: T) -> InstanceBuilder<T> {
        InstanceBuilder {
            runner,
            search: self.search,
            options: self.options,
        }
    }

    /// Applies every queued option and resolves the engine.
    ///
    /// # Errors
    ///
    /// Returns the first option rejection, or the locator's error when no
    /// engine can be resolved from the configured search path or search
    /// space.
    pub fn build(self) -> Result<Instance<R>, InstanceError> {
        let mut settings = Settings::default();
        for option in self.options {
            settings.apply(option, InstanceState::Uninitialized)?;
        }
        let locator = self.search.map_or_else(Locator::system, Locator::new);
        let engine = locator.locate(
            settings.search_hint.as_deref(),
            &Orchestrator::new(&self.runner, settings.log.as_ref()),
        )?;
        Ok(Instance::assemble(self.runner, locator, engine, settings))
    }
}
