//! Engine configuration and the user-facing indexing preferences.
//!
//! Everything is optional in the TOML file; missing keys fall back to the
//! defaults below so `IndexerConfig::default()` is a working configuration.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_MAX_PENDING_BATCHES: usize = 10;
pub const DEFAULT_INCREMENTAL_MAX_DEPTH: usize = 5;
pub const DATABASE_FILE_NAME: &str = "file-indexer.db";
const MIN_WATCH_DEBOUNCE_MS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub database_path: PathBuf,
    /// Maximum number of file events written in a single transaction.
    pub batch_size: usize,
    /// Number of batches a full scan may queue before its walker stalls.
    pub max_pending_batches: usize,
    pub incremental_max_depth: Option<usize>,
    /// Names of ignore files looked up in every ancestor of a walked entry.
    pub ignore_files: Vec<String>,
    pub ignore_hidden: bool,
    pub watch_debounce_ms: u64,
    pub preferences: Preferences,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_pending_batches: DEFAULT_MAX_PENDING_BATCHES,
            incremental_max_depth: Some(DEFAULT_INCREMENTAL_MAX_DEPTH),
            ignore_files: vec![".gitignore".to_string()],
            ignore_hidden: false,
            watch_debounce_ms: 250,
            preferences: Preferences::default(),
        }
    }
}

impl IndexerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: IndexerConfig = toml::from_str(raw)?;
        config.database_path = expand_tilde(&config.database_path);
        config.preferences = config.preferences.normalized();
        config.batch_size = config.batch_size.max(1);
        config.max_pending_batches = config.max_pending_batches.max(1);
        Ok(config)
    }

    /// Never zero: the debouncer ticks at half this interval.
    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms.max(MIN_WATCH_DEBOUNCE_MS))
    }

    /// File names of the persisted index itself. Scans must never index these.
    pub fn storage_filenames(&self) -> Vec<String> {
        let Some(name) = self.database_path.file_name() else {
            return Vec::new();
        };
        let name = name.to_string_lossy();

        vec![name.to_string(), format!("{name}-wal"), format!("{name}-shm")]
    }
}

/// The set of paths the host application wants indexed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Preferences {
    pub paths: Vec<PathBuf>,
    pub excluded_paths: Vec<PathBuf>,
    pub watcher_paths: Vec<PathBuf>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            paths: dirs::home_dir().into_iter().collect(),
            excluded_paths: Vec::new(),
            watcher_paths: Vec::new(),
        }
    }
}

impl Preferences {
    pub fn normalized(self) -> Self {
        Self {
            paths: normalize_paths(self.paths),
            excluded_paths: normalize_paths(self.excluded_paths),
            watcher_paths: normalize_paths(self.watcher_paths),
        }
    }
}

fn normalize_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut normalized: Vec<PathBuf> = paths
        .into_iter()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| expand_tilde(&p).components().collect())
        .collect();

    normalized.dedup();
    normalized
}

fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("fsindex")
        .join(DATABASE_FILE_NAME)
}
