//! Ownership of the directory holding the versioned data directory.

use std::env;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use super::LIFECYCLE_TARGET;
use crate::error::InstanceError;

/// Where the data directory lives and who is responsible for removing it.
#[derive(Debug, Default)]
pub(crate) enum WorkingDir {
    /// Nothing chosen yet; a directory is generated on first start.
    #[default]
    Unset,
    /// Supplied by the caller, who owns its lifetime.
    Borrowed(PathBuf),
    /// Generated by the instance and removed on teardown.
    Owned(TempDir),
    /// A generated directory that has already been removed.
    Released(PathBuf),
}

impl WorkingDir {
    /// Creates a fresh directory under the system temporary directory.
    pub(crate) fn generate(prefix: &str) -> Result<Self, InstanceError> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .map_err(|source| InstanceError::filesystem(env::temp_dir(), source))?;
        debug!(
            target: LIFECYCLE_TARGET,
            dir = %dir.path().display(),
            "generated working directory"
        );
        Ok(Self::Owned(dir))
    }

    pub(crate) fn path(&self) -> Option<&Path> {
        match self {
            Self::Unset => None,
            Self::Borrowed(path) | Self::Released(path) => Some(path),
            Self::Owned(dir) => Some(dir.path()),
        }
    }

    /// Returns `true` for directories the instance generated.
    pub(crate) const fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_) | Self::Released(_))
    }

    /// Removes a generated directory. Borrowed directories are left alone.
    ///
    /// Removal failures are logged rather than returned: the directory sits
    /// under the system temporary directory and the instance is finished
    /// with it either way.
    pub(crate) fn release(&mut self) -> Option<PathBuf> {
        match std::mem::take(self) {
            Self::Owned(dir) => {
                let path = dir.path().to_path_buf();
                if let Err(error) = dir.close() {
                    warn!(
                        target: LIFECYCLE_TARGET,
                        dir = %path.display(),
                        error = %error,
                        "failed to remove working directory"
                    );
                }
                *self = Self::Released(path.clone());
                Some(path)
            }
            other => {
                *self = other;
                None
            }
        }
    }
}
