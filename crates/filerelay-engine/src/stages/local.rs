//! `cp` and `move`: mirror items under a destination root.

use std::path::PathBuf;
use std::sync::Arc;

use filerelay_types::{ConfigError, Properties, PropertyKind, PropertySpec, WorkItem};

use crate::error::StageError;
use crate::fs::LocalFs;
use crate::guard::OpenFileGuard;
use crate::registry::Collaborators;
use crate::stage::Stage;

pub const SCHEMA: &[PropertySpec] = &[
    PropertySpec::required("dest_dir", "Destination directory", PropertyKind::String),
    PropertySpec::optional(
        "check_open",
        "Fail items another process still holds open",
        PropertyKind::Boolean,
        "true",
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Copy,
    Move,
}

/// Copies or moves each item to `dest_dir / relative_dir / name`.
#[derive(Clone)]
pub struct LocalTransferStage {
    mode: TransferMode,
    dest_dir: PathBuf,
    check_open: bool,
    fs: Arc<dyn LocalFs>,
    guard: Arc<dyn OpenFileGuard>,
}

impl LocalTransferStage {
    pub fn new(
        mode: TransferMode,
        dest_dir: impl Into<PathBuf>,
        check_open: bool,
        collab: &Collaborators,
    ) -> Self {
        Self {
            mode,
            dest_dir: dest_dir.into(),
            check_open,
            fs: Arc::clone(&collab.fs),
            guard: Arc::clone(&collab.guard),
        }
    }

    fn from_properties(
        mode: TransferMode,
        props: &Properties,
        collab: &Collaborators,
    ) -> Result<Box<dyn Stage>, ConfigError> {
        Ok(Box::new(Self::new(
            mode,
            props.string("dest_dir")?,
            props.boolean("check_open")?,
            collab,
        )))
    }

    fn destination(&self, item: &WorkItem) -> PathBuf {
        // The raw leaf keeps names that are not valid UTF-8 intact.
        let leaf = item
            .full_path
            .file_name()
            .map_or_else(|| std::ffi::OsString::from(&item.name), ToOwned::to_owned);
        self.dest_dir.join(item.relative_dir()).join(leaf)
    }
}

/// # Errors
///
/// Fails if a declared property is missing or of the wrong kind.
pub fn build_copy(props: &Properties, collab: &Collaborators) -> Result<Box<dyn Stage>, ConfigError> {
    LocalTransferStage::from_properties(TransferMode::Copy, props, collab)
}

/// # Errors
///
/// Fails if a declared property is missing or of the wrong kind.
pub fn build_move(props: &Properties, collab: &Collaborators) -> Result<Box<dyn Stage>, ConfigError> {
    LocalTransferStage::from_properties(TransferMode::Move, props, collab)
}

impl Stage for LocalTransferStage {
    fn fork(&self) -> Box<dyn Stage> {
        Box::new(self.clone())
    }

    fn run(&mut self, item: &WorkItem) -> Result<(), StageError> {
        if self.check_open && self.guard.is_open(&item.full_path) {
            return Err(StageError::FileOpen(item.full_path.clone()));
        }

        let target = self.destination(item);
        if let Some(parent) = target.parent() {
            self.fs
                .create_path(parent)
                .map_err(|e| StageError::io(parent, e))?;
        }

        let transferred = match self.mode {
            TransferMode::Copy => self.fs.copy(&item.full_path, &target).map(|_| ()),
            TransferMode::Move => self.fs.move_file(&item.full_path, &target),
        };
        transferred.map_err(|e| StageError::io(&item.full_path, e))
    }

    fn summary(&self) -> String {
        let verb = match self.mode {
            TransferMode::Copy => "copy",
            TransferMode::Move => "move",
        };
        format!("{verb} to {}", self.dest_dir.display())
    }
}
