//! Work items and their persisted identity.

use std::fs::Metadata;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deduplication key of a [`WorkItem`]: path, size and modification time.
///
/// This is all a checkpoint stores. A file whose size or mtime changed since
/// the last run yields a different key and is therefore processed again.
///
/// The path serializes as a plain string when it is valid UTF-8 and as
/// `{"raw": [bytes]}` otherwise, so any name the filesystem hands out
/// survives a round trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    #[serde(with = "stored_path")]
    pub path: PathBuf,
    pub size: u64,
    pub mtime: DateTime<Utc>,
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} size:{} mtime:{}",
            self.path.display(),
            self.size,
            self.mtime.to_rfc3339()
        )
    }
}

/// Lossless byte form of `path`, for stores that keep paths as blobs.
///
/// On Unix these are the exact `OsStr` bytes. Elsewhere paths are stored as
/// UTF-8.
#[must_use]
pub fn path_to_bytes(path: &Path) -> Vec<u8> {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        path.as_os_str().as_bytes().to_vec()
    }
    #[cfg(not(unix))]
    {
        path.to_string_lossy().into_owned().into_bytes()
    }
}

/// Inverse of [`path_to_bytes`].
#[must_use]
pub fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStringExt;
        PathBuf::from(std::ffi::OsString::from_vec(bytes))
    }
    #[cfg(not(unix))]
    {
        PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
    }
}

mod stored_path {
    use std::path::{Path, PathBuf};

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum StoredPath {
        Text(String),
        Raw { raw: Vec<u8> },
    }

    pub fn serialize<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
        let stored = match path.to_str() {
            Some(text) => StoredPath::Text(text.to_string()),
            None => StoredPath::Raw {
                raw: super::path_to_bytes(path),
            },
        };
        stored.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PathBuf, D::Error> {
        Ok(match StoredPath::deserialize(deserializer)? {
            StoredPath::Text(text) => PathBuf::from(text),
            StoredPath::Raw { raw } => super::path_from_bytes(raw),
        })
    }
}

/// Snapshot of one discovered file.
///
/// Equality and hashing only consider the [`ItemKey`] triple; the remaining
/// timestamps are informational.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub full_path: PathBuf,
    pub basedir: PathBuf,
    pub name: String,
    pub size: u64,
    pub ctime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    pub atime: DateTime<Utc>,
    pub processed_time: Option<DateTime<Utc>>,
}

impl WorkItem {
    /// Build an item from metadata gathered while the file was being filtered.
    ///
    /// Timestamps a platform cannot report fall back to the modification time.
    #[must_use]
    pub fn from_metadata(full_path: PathBuf, basedir: &Path, metadata: &Metadata) -> Self {
        let mtime = metadata.modified().map(to_utc).unwrap_or_default();
        let atime = metadata.accessed().map(to_utc).unwrap_or(mtime);
        let ctime = change_time(metadata).unwrap_or(mtime);
        let name = full_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            full_path,
            basedir: basedir.to_path_buf(),
            name,
            size: metadata.len(),
            ctime,
            mtime,
            atime,
            processed_time: None,
        }
    }

    /// Identity triple used for checkpoint membership.
    #[must_use]
    pub fn key(&self) -> ItemKey {
        ItemKey {
            path: self.full_path.clone(),
            size: self.size,
            mtime: self.mtime,
        }
    }

    /// Directory of the item relative to the root it was discovered under.
    ///
    /// Empty for files sitting directly in `basedir`.
    #[must_use]
    pub fn relative_dir(&self) -> PathBuf {
        self.full_path
            .parent()
            .and_then(|parent| parent.strip_prefix(&self.basedir).ok())
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    /// Stamp the moment the terminal stage finished with this item.
    pub fn mark_processed(&mut self) {
        self.processed_time = Some(Utc::now());
    }
}

impl PartialEq for WorkItem {
    fn eq(&self, other: &Self) -> bool {
        self.full_path == other.full_path && self.size == other.size && self.mtime == other.mtime
    }
}

impl Eq for WorkItem {}

impl Hash for WorkItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.full_path.hash(state);
        self.size.hash(state);
        self.mtime.hash(state);
    }
}

impl std::fmt::Display for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} size:{}", self.full_path.display(), self.size)
    }
}

fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

#[cfg(unix)]
fn change_time(metadata: &Metadata) -> Option<DateTime<Utc>> {
    use std::os::unix::fs::MetadataExt;

    let nanos = u32::try_from(metadata.ctime_nsec()).ok()?;
    DateTime::from_timestamp(metadata.ctime(), nanos)
}

#[cfg(not(unix))]
fn change_time(metadata: &Metadata) -> Option<DateTime<Utc>> {
    metadata.created().ok().map(to_utc)
}
