//! CLI errors and their process exit codes.

use std::path::PathBuf;
use std::process::ExitCode;

use filerelay_engine::AssemblyError;
use filerelay_state::StateError;

/// Everything a command can fail with, mapped onto a stable exit status.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// The configuration is missing, malformed or names a bad provider.
    #[error("Configuration error: {0}")]
    Config(#[from] AssemblyError),

    /// The checkpoint backend could not be opened.
    #[error("State backend error: {0}")]
    State(#[from] StateError),

    /// Another process holds the lock for this configuration.
    #[error("Another instance is running: lock file {} exists{}", .path.display(), holder(.pid))]
    Locked { path: PathBuf, pid: Option<u32> },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The run finished but some items failed or some producers could not
    /// list their source.
    #[error("{}", failure_summary(.items, .producers))]
    Failures { items: usize, producers: usize },
}

impl CliError {
    /// Exit status for this error: 2 for configuration problems, 3 when
    /// locked out, 1 for everything else.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Locked { .. } => 3,
            Self::State(_) | Self::Io { .. } | Self::Failures { .. } => 1,
        }
    }

    /// Print the error to stderr and return the matching exit code.
    pub fn report(&self) -> ExitCode {
        eprintln!("Error: {self}");
        if let Self::Locked { path, .. } = self {
            eprintln!();
            eprintln!("If no other filerelay process is running, remove the stale lock:");
            eprintln!("  rm {}", path.display());
        }
        ExitCode::from(self.exit_code())
    }
}

fn holder(pid: &Option<u32>) -> String {
    pid.map(|pid| format!(" (held by pid {pid})")).unwrap_or_default()
}

fn failure_summary(items: &usize, producers: &usize) -> String {
    match (*items, *producers) {
        (items, 0) => format!("{items} item(s) failed; they will be retried on the next run"),
        (0, producers) => format!(
            "discovery failed for {producers} producer(s); nothing was processed for them"
        ),
        (items, producers) => format!(
            "{items} item(s) failed and discovery failed for {producers} producer(s); \
             failed items will be retried on the next run"
        ),
    }
}
