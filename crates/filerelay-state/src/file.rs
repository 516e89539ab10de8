//! One JSON document per stage, replaced atomically on every save.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use filerelay_types::{ItemKey, StageId};
use tempfile::NamedTempFile;

use crate::backend::CheckpointStore;
use crate::error;

const SUFFIX: &str = ".checkpoint.json";

/// Checkpoint store keeping `<producer>/<stage>.checkpoint.json` files under
/// one directory.
///
/// Both names are percent-encoded (dots included), so distinct stage ids
/// always map to distinct files and no name can escape the directory.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Use (and create if needed) `dir` as the checkpoint directory.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`](crate::StateError::Io) if the directory
    /// cannot be created.
    pub fn open(dir: &Path) -> error::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Path of the record for `stage`.
    #[must_use]
    pub fn record_path(&self, stage: &StageId) -> PathBuf {
        self.dir
            .join(encode(stage.producer()))
            .join(format!("{}{SUFFIX}", encode(stage.stage())))
    }
}

/// Injective, path-safe file name for one id component.
fn encode(part: &str) -> String {
    if part.is_empty() {
        return "%".to_string();
    }
    urlencoding::encode(part).replace('.', "%2E")
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, stage: &StageId) -> error::Result<HashSet<ItemKey>> {
        let path = self.record_path(stage);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => return Err(e.into()),
        };
        let keys: Vec<ItemKey> = serde_json::from_slice(&bytes)?;
        Ok(keys.into_iter().collect())
    }

    fn save(&self, stage: &StageId, keys: &HashSet<ItemKey>) -> error::Result<()> {
        let mut sorted: Vec<&ItemKey> = keys.iter().collect();
        sorted.sort();

        let record = self.record_path(stage);
        let parent = record.parent().unwrap_or(&self.dir);
        std::fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut tmp, &sorted)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&record).map_err(|e| e.error)?;

        tracing::debug!(stage = %stage, items = keys.len(), "checkpoint written");
        Ok(())
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}
