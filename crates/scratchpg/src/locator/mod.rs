//! Discovery of an installed PostgreSQL engine.
//!
//! The locator walks an ordered list of candidate directories and accepts the
//! first one holding *every* required utility as a regular file. Directories
//! with only some of the utilities are skipped outright; utilities are never
//! mixed across directories. Once a directory is chosen the shell client is
//! asked for its version, which namespaces the on-disk data directory.

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::InstanceError;
use crate::process::{Invocation, Orchestrator, ProcessRunner};

const LOCATOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::locator");

/// Installation directories tried after the executable search path, in order.
pub const WELL_KNOWN_GLOBS: &[&str] = &[
    // Debian and Ubuntu
    "/usr/lib/postgresql/*/bin",
    // CentOS and Fedora
    "/usr/pgsql-*/bin",
    "/usr/local/pgsql/bin",
    "/usr/local/pgsql-*/bin",
    // Homebrew and friends
    "/usr/local/bin",
];

/// Engine utilities the controller drives, by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Utility {
    /// Creates a data directory (`initdb`).
    Initializer,
    /// Starts and stops the server (`pg_ctl`).
    Controller,
    /// Interactive SQL client (`psql`).
    Shell,
    /// Logical backup tool (`pg_dump`).
    Dumper,
}

impl Utility {
    /// Every utility that must be present in a candidate directory.
    pub const ALL: [Self; 4] = [Self::Shell, Self::Initializer, Self::Controller, Self::Dumper];

    /// Executable file name of the utility.
    #[must_use]
    pub const fn binary_name(self) -> &'static str {
        match self {
            Self::Initializer => "initdb",
            Self::Controller => "pg_ctl",
            Self::Shell => "psql",
            Self::Dumper => "pg_dump",
        }
    }
}

impl fmt::Display for Utility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary_name())
    }
}

/// Resolved executable paths for every [`Utility`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommands {
    directory: PathBuf,
    initializer: PathBuf,
    controller: PathBuf,
    shell: PathBuf,
    dumper: PathBuf,
}

impl EngineCommands {
    /// Resolves every utility inside `directory`, or `None` if any is missing.
    fn from_directory(directory: &Path) -> Option<Self> {
        let resolve = |utility: Utility| {
            let path = directory.join(utility.binary_name());
            is_regular_file(&path).then_some(path)
        };
        Some(Self {
            directory: directory.to_path_buf(),
            initializer: resolve(Utility::Initializer)?,
            controller: resolve(Utility::Controller)?,
            shell: resolve(Utility::Shell)?,
            dumper: resolve(Utility::Dumper)?,
        })
    }

    /// Directory all utilities were found in.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the given utility.
    #[must_use]
    pub fn path(&self, utility: Utility) -> &Path {
        match utility {
            Utility::Initializer => &self.initializer,
            Utility::Controller => &self.controller,
            Utility::Shell => &self.shell,
            Utility::Dumper => &self.dumper,
        }
    }
}

/// A located engine: its utilities and reported version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Engine {
    commands: EngineCommands,
    version: String,
}

impl Engine {
    /// Resolved utilities.
    #[must_use]
    pub const fn commands(&self) -> &EngineCommands {
        &self.commands
    }

    /// Version token reported by the shell client, e.g. `16.4`.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }
}

/// The ordered places searched when no explicit directory is given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchSpace {
    path_dirs: Vec<PathBuf>,
    globs: Vec<String>,
}

impl SearchSpace {
    /// A search space made of explicit directories and glob patterns.
    #[must_use]
    pub const fn new(path_dirs: Vec<PathBuf>, globs: Vec<String>) -> Self {
        Self { path_dirs, globs }
    }

    /// The caller's `PATH` followed by [`WELL_KNOWN_GLOBS`].
    #[must_use]
    pub fn system() -> Self {
        let path_dirs = env::var_os("PATH")
            .map(|path| env::split_paths(&path).collect())
            .unwrap_or_default();
        let globs = WELL_KNOWN_GLOBS
            .iter()
            .map(|pattern| (*pattern).to_owned())
            .collect();
        Self { path_dirs, globs }
    }

    /// Candidate directories in search order.
    ///
    /// A non-empty `hint` is the sole candidate. Otherwise the search path
    /// directories come first, then every match of every glob, pattern by
    /// pattern.
    #[must_use]
    pub fn candidates(&self, hint: Option<&Path>) -> Vec<PathBuf> {
        if let Some(hint) = hint.filter(|hint| !hint.as_os_str().is_empty()) {
            return vec![hint.to_path_buf()];
        }
        let mut candidates = self.path_dirs.clone();
        for pattern in &self.globs {
            match glob::glob(pattern) {
                Ok(paths) => candidates.extend(paths.filter_map(Result::ok)),
                Err(error) => debug!(
                    target: LOCATOR_TARGET,
                    pattern = %pattern,
                    error = %error,
                    "skipping invalid search pattern"
                ),
            }
        }
        candidates
    }
}

/// Finds engines within a [`SearchSpace`].
#[derive(Debug, Clone, Default)]
pub struct Locator {
    search: SearchSpace,
}

impl Locator {
    /// Creates a locator over `search`.
    #[must_use]
    pub const fn new(search: SearchSpace) -> Self {
        Self { search }
    }

    /// Locator over [`SearchSpace::system`].
    #[must_use]
    pub fn system() -> Self {
        Self::new(SearchSpace::system())
    }

    /// The search space this locator walks.
    #[must_use]
    pub const fn search_space(&self) -> &SearchSpace {
        &self.search
    }

    /// Returns the utilities of the first complete candidate directory.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::NotFound`] listing every directory tried when
    /// no candidate holds all of the utilities.
    pub fn find_commands(&self, hint: Option<&Path>) -> Result<EngineCommands, InstanceError> {
        let candidates = self.search.candidates(hint);
        for candidate in &candidates {
            if let Some(commands) = EngineCommands::from_directory(candidate) {
                debug!(
                    target: LOCATOR_TARGET,
                    directory = %candidate.display(),
                    "found complete engine installation"
                );
                return Ok(commands);
            }
        }
        Err(InstanceError::NotFound { tried: candidates })
    }

    pub(crate) fn locate<R>(
        &self,
        hint: Option<&Path>,
        orchestrator: &Orchestrator<'_, R>,
    ) -> Result<Engine, InstanceError>
    where
        R: ProcessRunner + ?Sized,
    {
        let commands = self.find_commands(hint)?;
        let version = query_version(&commands, orchestrator)?;
        Ok(Engine { commands, version })
    }
}

fn query_version<R>(
    commands: &EngineCommands,
    orchestrator: &Orchestrator<'_, R>,
) -> Result<String, InstanceError>
where
    R: ProcessRunner + ?Sized,
{
    let program = commands.path(Utility::Shell);
    let output = orchestrator.run("query version", &Invocation::new(program).arg("-V"))?;
    let text = String::from_utf8_lossy(&output.stdout);
    parse_version(&text)
        .map(str::to_owned)
        .ok_or_else(|| InstanceError::UnrecognisedVersion {
            program: program.to_path_buf(),
            output: text.trim().to_owned(),
        })
}

/// Extracts the version token: the last whitespace-separated field.
pub(crate) fn parse_version(output: &str) -> Option<&str> {
    output.split_whitespace().last()
}

fn is_regular_file(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|metadata| metadata.is_file())
}

#[cfg(test)]
mod tests;
