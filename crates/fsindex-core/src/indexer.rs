//! The indexing service the host application constructs and holds on to.
//!
//! [`FileIndexer`] ties the writer, the dispatcher and the read path together: it
//! decides which scans to run at startup and on preference changes, and answers
//! queries on the rayon pool without ever touching the write queue.

use crate::config::{IndexerConfig, Preferences};
use crate::db_healthcheck::{DbHealth, DbHealthChecker};
use crate::dispatcher::ScanDispatcher;
use crate::error::{Error, Result};
use crate::scanner::{ScanContext, ScanSettings};
use crate::storage::IndexDatabase;
use crate::types::{FileResult, QueryParams, Scan, ScanId, ScanRecord, ScanStatus, ScanType};
use crate::writer::DbWriter;
use ahash::AHashSet;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{Level, error, info, warn};

const RESTART_INTERRUPTION: &str = "Interrupted by process exit";

pub struct FileIndexer {
    config: IndexerConfig,
    preferences: Mutex<Preferences>,
    writer: Arc<DbWriter>,
    dispatcher: ScanDispatcher,
    started: AtomicBool,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for FileIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileIndexer")
            .field("database_path", &self.config.database_path)
            .field("preferences", &*self.preferences.lock())
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl FileIndexer {
    /// Opens (and migrates) the index database and starts the writer and dispatcher
    /// threads. No scan runs until [`Self::start`].
    pub fn new(config: IndexerConfig) -> Result<Self> {
        if config.database_path.file_name().is_none() {
            return Err(Error::InvalidPath(config.database_path));
        }

        let preferences = config.preferences.clone().normalized();
        let writer = Arc::new(DbWriter::spawn(&config.database_path)?);
        let context = Arc::new(ScanContext::new(
            Arc::clone(&writer),
            ScanSettings::from(&config),
        ));
        let dispatcher = ScanDispatcher::new(context)?;

        info!(
            database = ?config.database_path,
            entrypoints = preferences.paths.len(),
            watched = preferences.watcher_paths.len(),
            "File indexer created"
        );

        Ok(Self {
            config,
            preferences: Mutex::new(preferences),
            writer,
            dispatcher,
            started: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn preferences(&self) -> Preferences {
        self.preferences.lock().clone()
    }

    /// File names every scan skips: the database and its journal companions.
    pub fn excluded_filenames(&self) -> Vec<String> {
        self.config.storage_filenames()
    }

    /// Kicks off indexing. The first run ever does a full scan of every entrypoint.
    /// Later runs recover scans a previous process left `Started` (marking the old
    /// records interrupted), run incremental scans for the remaining entrypoints and
    /// watch every watcher path. Only the first call has an effect.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("File indexer already started");
            return Ok(());
        }

        let preferences = self.preferences();
        let (last_scan, recovered) = self.writer.submit_with_result(|db| {
            let last_scan = db.get_last_scan()?;
            let started = db.list_started_scans()?;
            for record in &started {
                db.set_scan_error(record.id, ScanStatus::Interrupted, RESTART_INTERRUPTION)?;
            }
            Ok((last_scan, started))
        })?;

        let mut indexed: AHashSet<PathBuf> = AHashSet::new();
        let mut watched: AHashSet<PathBuf> = AHashSet::new();

        if last_scan.is_none() {
            info!("No previous scan found, starting full scans");
            for path in &preferences.paths {
                self.enqueue(ScanType::Full, path, &preferences)?;
                indexed.insert(path.clone());
            }
        } else {
            let mut seen: AHashSet<(ScanType, PathBuf)> = AHashSet::new();
            for record in recovered {
                if !seen.insert((record.scan_type, record.entrypoint.clone())) {
                    continue;
                }

                let wanted = match record.scan_type {
                    ScanType::Watch => preferences.watcher_paths.contains(&record.entrypoint),
                    _ => preferences.paths.contains(&record.entrypoint),
                };
                if !wanted {
                    info!(path = ?record.entrypoint, "Not recovering scan of a removed path");
                    continue;
                }

                warn!(
                    path = ?record.entrypoint,
                    scan_type = %record.scan_type,
                    "Previous scan was interrupted, enqueuing it again"
                );
                self.enqueue(record.scan_type, &record.entrypoint, &preferences)?;
                match record.scan_type {
                    ScanType::Watch => watched.insert(record.entrypoint),
                    _ => indexed.insert(record.entrypoint),
                };
            }

            for path in &preferences.paths {
                if !indexed.contains(path) {
                    self.enqueue(ScanType::Incremental, path, &preferences)?;
                }
            }
        }

        for path in &preferences.watcher_paths {
            if !watched.contains(path) {
                self.enqueue(ScanType::Watch, path, &preferences)?;
            }
        }

        Ok(())
    }

    /// Replaces the preferences. Scans whose root is gone, or every scan when the
    /// excluded paths changed, are interrupted; new entrypoints get a full scan and new
    /// watcher paths a watch scan.
    pub fn set_preferences(&self, preferences: Preferences) -> Result<()> {
        let new = preferences.normalized();
        let old = std::mem::replace(&mut *self.preferences.lock(), new.clone());
        if old == new {
            return Ok(());
        }

        let exclusions_changed = old.excluded_paths != new.excluded_paths;
        let mut watched: AHashSet<PathBuf> = AHashSet::new();

        for (id, scan) in self.dispatcher.scans() {
            let still_wanted = match scan.scan_type {
                ScanType::Watch => new.watcher_paths.contains(&scan.path),
                _ => new.paths.contains(&scan.path),
            };

            if !still_wanted || exclusions_changed {
                info!(scan_id = id, path = ?scan.path, "Interrupting scan after preference change");
                self.dispatcher.interrupt(id);
            } else if scan.scan_type == ScanType::Watch {
                watched.insert(scan.path);
            }
        }

        if exclusions_changed {
            let newly_excluded: Vec<PathBuf> = new
                .excluded_paths
                .iter()
                .filter(|p| !old.excluded_paths.contains(p))
                .cloned()
                .collect();
            if !newly_excluded.is_empty() {
                self.writer.delete_files(newly_excluded)?;
            }
        }

        if self.started.load(Ordering::SeqCst) {
            for path in &new.paths {
                if exclusions_changed || !old.paths.contains(path) {
                    self.enqueue(ScanType::Full, path, &new)?;
                }
            }

            for path in &new.watcher_paths {
                if !watched.contains(path) {
                    self.enqueue(ScanType::Watch, path, &new)?;
                }
            }
        }

        Ok(())
    }

    /// Drops the whole index and re-scans everything from scratch.
    pub fn rebuild_index(&self) -> Result<()> {
        info!("Rebuilding file index");
        self.dispatcher.interrupt_all();
        self.dispatcher.wait_idle();
        self.writer.clear_index()?;

        let preferences = self.preferences();
        for path in &preferences.paths {
            self.enqueue(ScanType::Full, path, &preferences)?;
        }
        for path in &preferences.watcher_paths {
            self.enqueue(ScanType::Watch, path, &preferences)?;
        }

        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Runs a query on the rayon pool with its own read connection.
    pub fn query_async(&self, query: &str, params: QueryParams) -> PendingQuery {
        let (reply, receiver) = mpsc::sync_channel(1);
        let db_path = self.config.database_path.clone();
        let query = query.to_owned();

        rayon::spawn(move || {
            let results = std::panic::catch_unwind(AssertUnwindSafe(|| {
                run_query(&db_path, &query, &params)
            }))
            .unwrap_or_else(|_| {
                error!(query, "Query panicked");
                Vec::new()
            });
            let _ = reply.send(results);
        });

        PendingQuery { receiver }
    }

    pub fn query(&self, query: &str, params: QueryParams) -> Vec<FileResult> {
        self.query_async(query, params).wait()
    }

    pub fn scan_history(&self) -> Result<Vec<ScanRecord>> {
        IndexDatabase::open_read(&self.config.database_path)?.list_scans()
    }

    pub fn active_scans(&self) -> Vec<(ScanId, Scan)> {
        self.dispatcher.scans()
    }

    pub fn interrupt_scan(&self, id: ScanId) -> bool {
        self.dispatcher.interrupt(id)
    }

    /// Waits until every non-watch scan is done and the writer drained its queue.
    pub fn wait_for_scans(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let busy = self
                .dispatcher
                .scans()
                .iter()
                .any(|(_, scan)| scan.scan_type != ScanType::Watch);

            if !busy {
                return self.writer.flush().is_ok();
            }
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    pub fn health(&self) -> Result<DbHealth> {
        IndexDatabase::open_read(&self.config.database_path)?.get_health()
    }

    /// Interrupts and reclaims every scan, then drains and stops the writer.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.dispatcher.shutdown();
        self.writer.shutdown();
        info!("File indexer stopped");
    }

    fn enqueue(&self, scan_type: ScanType, path: &Path, preferences: &Preferences) -> Result<ScanId> {
        let max_depth = match scan_type {
            ScanType::Incremental => self.config.incremental_max_depth,
            _ => None,
        };

        let scan = Scan::new(scan_type, path)
            .with_max_depth(max_depth)
            .with_excluded_filenames(self.excluded_filenames())
            .with_excluded_paths(preferences.excluded_paths.clone());

        self.dispatcher.enqueue(scan)
    }
}

impl Drop for FileIndexer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[tracing::instrument(skip(db_path, params), level = Level::DEBUG)]
fn run_query(db_path: &Path, query: &str, params: &QueryParams) -> Vec<FileResult> {
    let db = match IndexDatabase::open_read(db_path) {
        Ok(db) => db,
        Err(error) => {
            error!(%error, "Failed to open index for query");
            return Vec::new();
        }
    };

    match db.search(query, params) {
        Ok(paths) => paths.into_iter().map(|path| FileResult { path }).collect(),
        Err(error) => {
            error!(%error, "Query failed");
            Vec::new()
        }
    }
}

/// Result of [`FileIndexer::query_async`]. Always resolves: failures resolve to an
/// empty result.
#[derive(Debug)]
pub struct PendingQuery {
    receiver: mpsc::Receiver<Vec<FileResult>>,
}

impl PendingQuery {
    pub fn wait(self) -> Vec<FileResult> {
        self.receiver.recv().unwrap_or_default()
    }

    /// `None` when the query is still running after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Vec<FileResult>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(results) => Some(results),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => Some(Vec::new()),
        }
    }

    pub fn try_get(&self) -> Option<Vec<FileResult>> {
        match self.receiver.try_recv() {
            Ok(results) => Some(results),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(tmp: &TempDir, root: &Path) -> IndexerConfig {
        IndexerConfig {
            database_path: tmp.path().join("state").join("index.db"),
            watch_debounce_ms: 20,
            preferences: Preferences {
                paths: vec![root.to_path_buf()],
                excluded_paths: Vec::new(),
                watcher_paths: Vec::new(),
            },
            ..IndexerConfig::default()
        }
    }

    fn tree(tmp: &TempDir) -> PathBuf {
        let root = tmp.path().join("home");
        std::fs::create_dir_all(root.join("projects/fsindex")).unwrap();
        std::fs::write(root.join("projects/fsindex/notes.md"), b"notes").unwrap();
        std::fs::write(root.join("invoice_2024.pdf"), b"pdf").unwrap();
        root
    }

    #[test]
    fn database_path_must_name_a_file() {
        let config = IndexerConfig {
            database_path: PathBuf::from("/"),
            ..IndexerConfig::default()
        };
        assert!(matches!(FileIndexer::new(config), Err(Error::InvalidPath(_))));
    }

    #[test]
    fn first_start_runs_full_scan() {
        let tmp = TempDir::new().unwrap();
        let root = tree(&tmp);
        let indexer = FileIndexer::new(config(&tmp, &root)).unwrap();

        indexer.start().unwrap();
        assert!(indexer.wait_for_scans(Duration::from_secs(10)));

        let history = indexer.scan_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].scan_type, ScanType::Full);
        assert_eq!(history[0].status, ScanStatus::Succeeded);

        let results = indexer.query("invoice", QueryParams::default());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, root.join("invoice_2024.pdf"));
    }

    #[test]
    fn second_start_runs_incremental_scan() {
        let tmp = TempDir::new().unwrap();
        let root = tree(&tmp);

        {
            let indexer = FileIndexer::new(config(&tmp, &root)).unwrap();
            indexer.start().unwrap();
            assert!(indexer.wait_for_scans(Duration::from_secs(10)));
        }

        let indexer = FileIndexer::new(config(&tmp, &root)).unwrap();
        indexer.start().unwrap();
        assert!(indexer.wait_for_scans(Duration::from_secs(10)));

        let types: Vec<ScanType> = indexer
            .scan_history()
            .unwrap()
            .into_iter()
            .map(|r| r.scan_type)
            .collect();
        assert_eq!(types, vec![ScanType::Full, ScanType::Incremental]);
    }

    #[test]
    fn query_async_resolves_empty_on_invalid_regex() {
        let tmp = TempDir::new().unwrap();
        let root = tree(&tmp);
        let indexer = FileIndexer::new(config(&tmp, &root)).unwrap();

        let params = QueryParams {
            use_regex: true,
            ..QueryParams::default()
        };
        let pending = indexer.query_async("(unclosed", params);
        let results = pending.wait_timeout(Duration::from_secs(10));
        assert_eq!(results, Some(Vec::new()));
    }

    #[test]
    fn rebuild_clears_and_rescans() {
        let tmp = TempDir::new().unwrap();
        let root = tree(&tmp);
        let indexer = FileIndexer::new(config(&tmp, &root)).unwrap();
        indexer.start().unwrap();
        assert!(indexer.wait_for_scans(Duration::from_secs(10)));

        std::fs::remove_file(root.join("invoice_2024.pdf")).unwrap();
        std::fs::write(root.join("receipt.pdf"), b"pdf").unwrap();
        indexer.rebuild_index().unwrap();
        assert!(indexer.wait_for_scans(Duration::from_secs(10)));

        let health = indexer.health().unwrap();
        let files = health
            .entry_counts
            .iter()
            .find(|(table, _)| *table == "indexed_file")
            .map(|(_, count)| *count);
        // projects, fsindex, notes.md, receipt.pdf; the root itself is never indexed
        assert_eq!(files, Some(4));
    }

    #[test]
    fn new_entrypoint_gets_full_scan() {
        let tmp = TempDir::new().unwrap();
        let root = tree(&tmp);
        let other = tmp.path().join("other");
        std::fs::create_dir_all(&other).unwrap();
        std::fs::write(other.join("budget.xlsx"), b"x").unwrap();

        let indexer = FileIndexer::new(config(&tmp, &root)).unwrap();
        indexer.start().unwrap();
        assert!(indexer.wait_for_scans(Duration::from_secs(10)));

        let mut preferences = indexer.preferences();
        preferences.paths.push(other.clone());
        indexer.set_preferences(preferences).unwrap();
        assert!(indexer.wait_for_scans(Duration::from_secs(10)));

        let results = indexer.query("budget", QueryParams::default());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, other.join("budget.xlsx"));
    }

    #[test]
    fn watching_a_missing_directory_fails_the_scan() {
        let tmp = TempDir::new().unwrap();
        let root = tree(&tmp);
        let missing = tmp.path().join("gone");
        let mut config = config(&tmp, &root);
        config.preferences.watcher_paths = vec![missing.clone()];
        let indexer = FileIndexer::new(config).unwrap();

        indexer.start().unwrap();
        assert!(indexer.wait_for_scans(Duration::from_secs(10)));

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while !indexer.active_scans().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(indexer.active_scans().is_empty(), "failed watch must be reclaimed");
        indexer.shutdown();

        let watch = indexer
            .scan_history()
            .unwrap()
            .into_iter()
            .find(|record| record.scan_type == ScanType::Watch)
            .expect("watch scan should be recorded");
        assert_eq!(watch.entrypoint, missing);
        assert_eq!(watch.status, ScanStatus::Failed);
        assert!(watch.error.is_some());
    }

    #[test]
    fn interrupted_watch_is_recorded() {
        let tmp = TempDir::new().unwrap();
        let root = tree(&tmp);
        let mut config = config(&tmp, &root);
        config.preferences.watcher_paths = vec![root.clone()];
        let indexer = FileIndexer::new(config).unwrap();
        assert_eq!(indexer.config().preferences.watcher_paths, vec![root.clone()]);

        indexer.start().unwrap();
        assert!(indexer.wait_for_scans(Duration::from_secs(10)));

        let (watch_id, _) = indexer
            .active_scans()
            .into_iter()
            .find(|(_, scan)| scan.scan_type == ScanType::Watch)
            .expect("watch scan should stay active");
        assert!(indexer.interrupt_scan(watch_id));
        assert!(!indexer.interrupt_scan(watch_id + 1_000));

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while !indexer.active_scans().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(indexer.active_scans().is_empty());

        let pending = indexer.query_async("notes", QueryParams::default());
        let results = loop {
            if let Some(results) = pending.try_get() {
                break results;
            }
            std::thread::sleep(Duration::from_millis(10));
        };
        assert_eq!(results.len(), 1);
    }
}
