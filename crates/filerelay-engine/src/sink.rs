//! Remote delivery: the four-operation sink surface and the stage wrapper
//! that drives any sink through the processor lifecycle.

use std::collections::HashSet;
use std::path::{Component, Path};
use std::sync::Arc;

use filerelay_types::WorkItem;

use crate::error::StageError;
use crate::guard::OpenFileGuard;
use crate::stage::Stage;

/// A protocol client able to deliver local files to a remote store.
///
/// Implementations hold at most one connection; the wrapper forks one sink
/// per worker so a connection is never shared.
pub trait RemoteSink: Send + 'static {
    /// An unconnected copy carrying the same settings.
    fn fork(&self) -> Self
    where
        Self: Sized;

    /// # Errors
    ///
    /// Fails when the endpoint is unreachable or rejects the credentials.
    fn connect(&mut self) -> Result<(), StageError>;

    /// Close the connection; never fails, errors are only logged.
    fn disconnect(&mut self);

    /// Create the remote directory `path`. An existing directory is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Fails when the directory is missing afterwards or the connection broke.
    fn ensure_directory(&mut self, path: &str) -> Result<(), StageError>;

    /// Upload `local` to `remote`.
    ///
    /// # Errors
    ///
    /// Fails on any connection or transfer error.
    fn put(&mut self, local: &Path, remote: &str) -> Result<(), StageError>;

    /// Endpoint description for logs and pipeline listings.
    fn endpoint(&self) -> String;
}

/// Lifecycle wrapper turning a [`RemoteSink`] into a [`Stage`].
///
/// `pre_process` connects, `post_process` disconnects, and `run` mirrors the
/// item's relative directory under `remote_dir` before uploading it.
pub struct RemoteStage<S: RemoteSink> {
    sink: S,
    remote_dir: String,
    check_open: bool,
    guard: Arc<dyn OpenFileGuard>,
    known_dirs: HashSet<String>,
}

impl<S: RemoteSink> RemoteStage<S> {
    pub fn new(
        sink: S,
        remote_dir: impl Into<String>,
        check_open: bool,
        guard: Arc<dyn OpenFileGuard>,
    ) -> Self {
        Self {
            sink,
            remote_dir: remote_dir.into(),
            check_open,
            guard,
            known_dirs: HashSet::new(),
        }
    }

    fn ensure_ancestors(&mut self, remote_dir: &str) -> Result<(), StageError> {
        for dir in ancestors(remote_dir) {
            if self.known_dirs.contains(&dir) {
                continue;
            }
            self.sink.ensure_directory(&dir)?;
            self.known_dirs.insert(dir);
        }
        Ok(())
    }
}

impl<S: RemoteSink> Stage for RemoteStage<S> {
    fn fork(&self) -> Box<dyn Stage> {
        Box::new(Self::new(
            self.sink.fork(),
            self.remote_dir.clone(),
            self.check_open,
            Arc::clone(&self.guard),
        ))
    }

    fn pre_process(&mut self) -> Result<(), StageError> {
        self.known_dirs.clear();
        self.sink.connect()?;
        tracing::info!(endpoint = %self.sink.endpoint(), "connected");
        Ok(())
    }

    fn post_process(&mut self) {
        self.sink.disconnect();
        tracing::info!(endpoint = %self.sink.endpoint(), "disconnected");
    }

    fn run(&mut self, item: &WorkItem) -> Result<(), StageError> {
        if self.check_open && self.guard.is_open(&item.full_path) {
            return Err(StageError::FileOpen(item.full_path.clone()));
        }
        let dir = remote_join(&self.remote_dir, &item.relative_dir());
        self.ensure_ancestors(&dir)?;
        let remote = remote_join(&dir, Path::new(&item.name));
        self.sink.put(&item.full_path, &remote)
    }

    fn summary(&self) -> String {
        format!("{} -> {}", self.sink.endpoint(), self.remote_dir)
    }
}

/// Join a local relative path onto a `/`-separated remote path.
#[must_use]
pub fn remote_join(base: &str, relative: &Path) -> String {
    let mut joined = base.trim_end_matches('/').to_string();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            joined.push('/');
            joined.push_str(&part.to_string_lossy());
        }
    }
    if joined.is_empty() && base.starts_with('/') {
        joined.push('/');
    }
    joined
}

/// Every directory from the first component down to `path` itself.
fn ancestors(path: &str) -> Vec<String> {
    let absolute = path.starts_with('/');
    let mut current = String::new();
    let mut dirs = Vec::new();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        if absolute || !current.is_empty() {
            current.push('/');
        }
        current.push_str(part);
        dirs.push(current.clone());
    }
    dirs
}
