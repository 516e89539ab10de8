//! `echo`: writes one line per item to standard output or a file.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use filerelay_types::{ConfigError, Properties, PropertyKind, PropertySpec, WorkItem};

use crate::error::StageError;
use crate::registry::Collaborators;
use crate::stage::Stage;

pub const SCHEMA: &[PropertySpec] = &[PropertySpec::optional(
    "stdout",
    "Output file; empty writes to standard output",
    PropertyKind::String,
    "",
)];

#[derive(Default)]
struct Output {
    handle: Option<Box<dyn Write + Send>>,
    users: usize,
}

/// Echo stage. All forks of one configured stage share a single output,
/// opened by the first worker to start and closed by the last to finish.
pub struct EchoStage {
    target: Option<PathBuf>,
    output: Arc<Mutex<Output>>,
}

impl EchoStage {
    #[must_use]
    pub fn new(target: Option<PathBuf>) -> Self {
        Self {
            target,
            output: Arc::new(Mutex::new(Output::default())),
        }
    }

    fn target_path(&self) -> PathBuf {
        self.target
            .clone()
            .unwrap_or_else(|| PathBuf::from("<stdout>"))
    }

    fn poisoned(&self) -> StageError {
        StageError::io(
            &self.target_path(),
            std::io::Error::other("echo output lock poisoned"),
        )
    }
}

/// # Errors
///
/// Fails if a declared property is missing or of the wrong kind.
pub fn build(props: &Properties, _: &Collaborators) -> Result<Box<dyn Stage>, ConfigError> {
    let target = props.string("stdout")?;
    let target = (!target.is_empty()).then(|| PathBuf::from(target));
    Ok(Box::new(EchoStage::new(target)))
}

impl Stage for EchoStage {
    fn fork(&self) -> Box<dyn Stage> {
        Box::new(Self {
            target: self.target.clone(),
            output: Arc::clone(&self.output),
        })
    }

    fn pre_process(&mut self) -> Result<(), StageError> {
        let mut output = self.output.lock().map_err(|_| self.poisoned())?;
        if output.handle.is_none() {
            let handle: Box<dyn Write + Send> = match &self.target {
                None => Box::new(std::io::stdout()),
                Some(path) => Box::new(std::io::BufWriter::new(
                    std::fs::File::create(path).map_err(|e| StageError::io(path, e))?,
                )),
            };
            output.handle = Some(handle);
        }
        output.users += 1;
        Ok(())
    }

    fn post_process(&mut self) {
        let Ok(mut output) = self.output.lock() else {
            return;
        };
        output.users = output.users.saturating_sub(1);
        if output.users == 0 {
            if let Some(mut handle) = output.handle.take() {
                if let Err(e) = handle.flush() {
                    tracing::warn!(target_path = %self.target_path().display(), error = %e, "echo flush failed");
                }
            }
        }
    }

    fn run(&mut self, item: &WorkItem) -> Result<(), StageError> {
        let mut output = self.output.lock().map_err(|_| self.poisoned())?;
        let Some(handle) = output.handle.as_mut() else {
            return Err(StageError::NotConnected);
        };
        writeln!(handle, "{item}").map_err(|e| StageError::io(&self.target_path(), e))
    }

    fn summary(&self) -> String {
        format!("write items to {}", self.target_path().display())
    }
}
