//! Local filesystem capability used by the rename, copy and move stages.

use std::io;
use std::path::Path;

/// The filesystem operations local stages are allowed to perform.
pub trait LocalFs: Send + Sync {
    /// Create `path` and every missing ancestor.
    fn create_path(&self, path: &Path) -> io::Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Copy contents and permissions; returns the number of bytes copied.
    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64>;

    /// Relocate `from` to `to`, across filesystems if needed.
    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn exists(&self, path: &Path) -> io::Result<bool>;
}

/// [`LocalFs`] backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFs;

impl LocalFs for StdFs {
    fn create_path(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        std::fs::copy(from, to)
    }

    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        match std::fs::rename(from, to) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                tracing::debug!(
                    from = %from.display(),
                    to = %to.display(),
                    error = %e,
                    "rename failed, falling back to copy"
                );
                std::fs::copy(from, to)?;
                std::fs::remove_file(from)
            }
            Err(e) => Err(e),
        }
    }

    fn exists(&self, path: &Path) -> io::Result<bool> {
        path.try_exists()
    }
}
