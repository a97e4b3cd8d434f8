use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub type ScanId = u64;

/// A row of the `indexed_file` table.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedFile {
    pub path: PathBuf,
    pub parent_path: PathBuf,
    pub name: String,
    /// Seconds since the unix epoch, `None` when the modification time could not be read.
    pub last_modified_at: Option<i64>,
    pub relevancy_score: f64,
}

impl IndexedFile {
    pub fn new(path: PathBuf, last_modified: Option<SystemTime>, relevancy_score: f64) -> Self {
        let parent_path = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();

        Self {
            path,
            parent_path,
            name,
            last_modified_at: last_modified.and_then(unix_seconds),
            relevancy_score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileEventKind {
    Modify,
    Delete,
}

/// A transient change notification produced by every scan strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: PathBuf,
    pub event_time: Option<SystemTime>,
}

impl FileEvent {
    pub fn modify(path: impl Into<PathBuf>, event_time: Option<SystemTime>) -> Self {
        Self {
            kind: FileEventKind::Modify,
            path: path.into(),
            event_time,
        }
    }

    pub fn delete(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: FileEventKind::Delete,
            path: path.into(),
            event_time: Some(SystemTime::now()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanType {
    Full,
    Incremental,
    Watch,
}

impl ScanType {
    pub(crate) fn as_i64(self) -> i64 {
        match self {
            ScanType::Full => 0,
            ScanType::Incremental => 1,
            ScanType::Watch => 2,
        }
    }

    pub(crate) fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(ScanType::Full),
            1 => Some(ScanType::Incremental),
            2 => Some(ScanType::Watch),
            _ => None,
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScanType::Full => "full",
            ScanType::Incremental => "incremental",
            ScanType::Watch => "watch",
        })
    }
}

/// Lifecycle of a scan. `Interrupted`, `Failed` and `Succeeded` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanStatus {
    Pending,
    Started,
    Interrupted,
    Failed,
    Succeeded,
}

impl ScanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScanStatus::Interrupted | ScanStatus::Failed | ScanStatus::Succeeded
        )
    }

    pub(crate) fn as_i64(self) -> i64 {
        match self {
            ScanStatus::Pending => 0,
            ScanStatus::Started => 1,
            ScanStatus::Interrupted => 2,
            ScanStatus::Failed => 3,
            ScanStatus::Succeeded => 4,
        }
    }

    pub(crate) fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(ScanStatus::Pending),
            1 => Some(ScanStatus::Started),
            2 => Some(ScanStatus::Interrupted),
            3 => Some(ScanStatus::Failed),
            4 => Some(ScanStatus::Succeeded),
            _ => None,
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Started => "started",
            ScanStatus::Interrupted => "interrupted",
            ScanStatus::Failed => "failed",
            ScanStatus::Succeeded => "succeeded",
        })
    }
}

/// A row of the `scan_history` table.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRecord {
    pub id: i64,
    pub entrypoint: PathBuf,
    pub scan_type: ScanType,
    pub status: ScanStatus,
    pub created_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// One unit of indexing work, owned by the dispatcher until its scanner terminates.
#[derive(Debug, Clone, PartialEq)]
pub struct Scan {
    pub scan_type: ScanType,
    pub path: PathBuf,
    pub max_depth: Option<usize>,
    pub excluded_filenames: Vec<String>,
    pub excluded_paths: Vec<PathBuf>,
}

impl Scan {
    pub fn new(scan_type: ScanType, path: impl Into<PathBuf>) -> Self {
        Self {
            scan_type,
            path: path.into(),
            max_depth: None,
            excluded_filenames: Vec::new(),
            excluded_paths: Vec::new(),
        }
    }

    pub fn full(path: impl Into<PathBuf>) -> Self {
        Self::new(ScanType::Full, path)
    }

    pub fn incremental(path: impl Into<PathBuf>) -> Self {
        Self::new(ScanType::Incremental, path)
    }

    pub fn watch(path: impl Into<PathBuf>) -> Self {
        Self::new(ScanType::Watch, path)
    }

    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_excluded_filenames(mut self, filenames: Vec<String>) -> Self {
        self.excluded_filenames = filenames;
        self
    }

    pub fn with_excluded_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.excluded_paths = paths;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationArgs {
    pub offset: usize,
    pub limit: usize,
}

impl Default for PaginationArgs {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryParams {
    pub pagination: PaginationArgs,
    pub use_regex: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResult {
    pub path: PathBuf,
}

pub(crate) fn unix_seconds(time: SystemTime) -> Option<i64> {
    time.duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| i64::try_from(d.as_secs()).ok())
}
