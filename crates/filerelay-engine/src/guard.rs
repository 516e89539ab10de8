//! Advisory check for files still held open by another process.
//!
//! Only Linux can answer the question cheaply (through `/proc/<pid>/fd`);
//! every other platform gets a guard that never objects.

use std::path::Path;
use std::sync::Arc;

/// Reports whether some process currently holds `path` open.
pub trait OpenFileGuard: Send + Sync {
    fn is_open(&self, path: &Path) -> bool;
}

/// Guard that never reports a file as open.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGuard;

impl OpenFileGuard for NoopGuard {
    fn is_open(&self, _path: &Path) -> bool {
        false
    }
}

/// Scans the file descriptor tables under `/proc`.
///
/// Processes whose descriptors cannot be read (other users, exited in the
/// meantime) are skipped silently.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcFsGuard;

#[cfg(target_os = "linux")]
impl OpenFileGuard for ProcFsGuard {
    fn is_open(&self, path: &Path) -> bool {
        let Ok(target) = std::fs::canonicalize(path) else {
            return false;
        };
        let Ok(processes) = std::fs::read_dir("/proc") else {
            return false;
        };
        let own_pid = std::process::id().to_string();

        processes
            .flatten()
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.bytes().all(|b| b.is_ascii_digit()) && name != own_pid
            })
            .filter_map(|entry| std::fs::read_dir(entry.path().join("fd")).ok())
            .flat_map(|fds| fds.flatten())
            .filter_map(|fd| std::fs::read_link(fd.path()).ok())
            .any(|link| link == target)
    }
}

/// The best guard available on this platform.
#[must_use]
pub fn platform_guard() -> Arc<dyn OpenFileGuard> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(ProcFsGuard)
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(NoopGuard)
    }
}
