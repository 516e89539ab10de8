//! Single-instance lock next to the configuration file.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::CliError;

/// Held for the duration of a run; the lock file is removed on drop.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Lock file guarding `config`: `.<config-file-name>.lock` in the same
    /// directory.
    #[must_use]
    pub fn path_for(config: &Path) -> PathBuf {
        let name = config
            .file_name()
            .map_or_else(|| "filerelay".into(), |n| n.to_string_lossy());
        let dir = config
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        dir.join(format!(".{name}.lock"))
    }

    /// Create the lock file with create-new semantics and record our PID.
    ///
    /// # Errors
    ///
    /// [`CliError::Locked`] if the file already exists, [`CliError::Io`] on
    /// any other failure.
    pub fn acquire(config: &Path) -> Result<Self, CliError> {
        let path = Self::path_for(config);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let pid = fs::read_to_string(&path)
                    .ok()
                    .and_then(|s| s.trim().parse().ok());
                return Err(CliError::Locked { path, pid });
            }
            Err(source) => return Err(CliError::Io { path, source }),
        };

        // From here on the file is ours; dropping the guard removes it even
        // if writing the PID fails.
        let lock = Self { path };
        writeln!(file, "{}", std::process::id()).map_err(|source| CliError::Io {
            path: lock.path.clone(),
            source,
        })?;
        tracing::debug!(lock = %lock.path.display(), "instance lock acquired");
        Ok(lock)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(lock = %self.path.display(), "instance lock released"),
            Err(e) => {
                tracing::warn!(lock = %self.path.display(), error = %e, "failed to remove lock file");
            }
        }
    }
}
