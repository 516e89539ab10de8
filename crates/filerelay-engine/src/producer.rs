//! Item sources.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use filerelay_types::{ConfigError, Properties, PropertyKind, PropertySpec, WorkItem};
use regex::Regex;
use walkdir::WalkDir;

use crate::error::StageError;

/// Iterator over the items of one discovery pass.
pub type Items = Box<dyn Iterator<Item = WorkItem> + Send>;

/// A finite, restartable source of work items.
pub trait Producer: Send + Sync {
    /// Start a new discovery pass.
    ///
    /// # Errors
    ///
    /// Fails when the source root itself is unavailable; the pipeline then
    /// runs with no items.
    fn produce(&self) -> Result<Items, StageError>;

    /// One-line, human-readable rendering of the producer's configuration.
    fn summary(&self) -> String;
}

/// Signed age thresholds in minutes.
///
/// `0` disables a threshold. A positive value admits files whose timestamp is
/// older than `now - v`; a negative value admits files newer than `now + v`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgeFilter {
    pub mtime: i64,
    pub atime: i64,
    pub ctime: i64,
}

// Roughly a thousand years; keeps `now ± threshold` representable.
const MAX_THRESHOLD_MINUTES: i64 = 525_600_000;

impl AgeFilter {
    #[must_use]
    pub fn admits(&self, item: &WorkItem, now: DateTime<Utc>) -> bool {
        threshold_admits(self.mtime, item.mtime, now)
            && threshold_admits(self.atime, item.atime, now)
            && threshold_admits(self.ctime, item.ctime, now)
    }
}

/// Evaluate one signed threshold against `timestamp`.
#[must_use]
pub fn threshold_admits(minutes: i64, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    if minutes == 0 {
        return true;
    }
    let offset = Duration::minutes(minutes.clamp(-MAX_THRESHOLD_MINUTES, MAX_THRESHOLD_MINUTES));
    if minutes > 0 {
        timestamp < now - offset
    } else {
        timestamp > now + offset
    }
}

/// `dir_mon` properties.
pub const DIR_MON_SCHEMA: &[PropertySpec] = &[
    PropertySpec::optional("basedir", "Directory to monitor", PropertyKind::String, "./"),
    PropertySpec::optional(
        "recursive",
        "Descend into subdirectories",
        PropertyKind::Boolean,
        "true",
    ),
    PropertySpec::optional(
        "filter",
        "Regular expression searched in file names",
        PropertyKind::Regex,
        ".*",
    ),
    PropertySpec::optional(
        "mtime",
        "Minutes since modification (negative: at most)",
        PropertyKind::Integer,
        "0",
    ),
    PropertySpec::optional(
        "atime",
        "Minutes since last access (negative: at most)",
        PropertyKind::Integer,
        "0",
    ),
    PropertySpec::optional(
        "ctime",
        "Minutes since status change (negative: at most)",
        PropertyKind::Integer,
        "0",
    ),
];

/// Directory monitor: regular files under `basedir` whose name matches
/// `filter` and whose timestamps pass the age thresholds.
#[derive(Debug, Clone)]
pub struct DirMon {
    pub basedir: PathBuf,
    pub recursive: bool,
    pub filter: Regex,
    pub ages: AgeFilter,
}

impl DirMon {
    /// Build from materialized `dir_mon` properties.
    ///
    /// # Errors
    ///
    /// Fails if a declared property is missing or of the wrong kind.
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        Ok(Self {
            basedir: PathBuf::from(props.string("basedir")?),
            recursive: props.boolean("recursive")?,
            filter: props.regex("filter")?.clone(),
            ages: AgeFilter {
                mtime: props.integer("mtime")?,
                atime: props.integer("atime")?,
                ctime: props.integer("ctime")?,
            },
        })
    }
}

impl Producer for DirMon {
    fn produce(&self) -> Result<Items, StageError> {
        // walkdir reports a missing root lazily; the pipeline needs it now.
        std::fs::read_dir(&self.basedir).map_err(|e| StageError::io(&self.basedir, e))?;

        let walk = WalkDir::new(&self.basedir)
            .min_depth(1)
            .max_depth(if self.recursive { usize::MAX } else { 1 })
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();
        Ok(Box::new(DirWalk {
            basedir: self.basedir.clone(),
            filter: self.filter.clone(),
            ages: self.ages,
            now: Utc::now(),
            walk,
        }))
    }

    fn summary(&self) -> String {
        let mut summary = format!(
            "{} recursive={} filter={}",
            self.basedir.display(),
            self.recursive,
            self.filter.as_str()
        );
        for (label, minutes) in [
            ("mtime", self.ages.mtime),
            ("atime", self.ages.atime),
            ("ctime", self.ages.ctime),
        ] {
            if minutes != 0 {
                summary.push_str(&format!(" {label}={minutes}"));
            }
        }
        summary
    }
}

/// Lazy walk over `basedir` yielding admitted regular files.
struct DirWalk {
    basedir: PathBuf,
    filter: Regex,
    ages: AgeFilter,
    now: DateTime<Utc>,
    walk: walkdir::IntoIter,
}

impl Iterator for DirWalk {
    type Item = WorkItem;

    fn next(&mut self) -> Option<WorkItem> {
        loop {
            let entry = match self.walk.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().unwrap_or(self.basedir.as_path()).display().to_string();
                    tracing::warn!(path = %path, error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            // Symlinks are never followed, so only real files reach here.
            if !entry.file_type().is_file() {
                continue;
            }
            if !self.filter.is_match(&entry.file_name().to_string_lossy()) {
                continue;
            }

            // Metadata is read once; filters and snapshot use the same values.
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::debug!(path = %entry.path().display(), error = %e, "vanished during discovery");
                    continue;
                }
            };

            let item = WorkItem::from_metadata(entry.into_path(), &self.basedir, &metadata);
            if self.ages.admits(&item, self.now) {
                return Some(item);
            }
        }
    }
}
