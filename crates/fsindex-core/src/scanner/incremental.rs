use super::ScanContext;
use crate::cancel::StopSignal;
use crate::error::Result;
use crate::storage::IndexDatabase;
use crate::types::{FileEvent, FileEventKind, Scan, ScanType, unix_seconds};
use crate::walker::ExclusionRules;
use ahash::AHashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

/// Re-synchronises the index with the tree below the scan root by diffing the indexed
/// children of each directory changed since the cutoff against what is on disk.
pub(super) fn scan(scan: &Scan, context: &ScanContext, stop: &StopSignal) -> Result<()> {
    let db = IndexDatabase::open_read(context.writer.db_path())?;
    let cutoff = establish_cutoff(&db, &scan.path)?;
    let walker = context.walker_for(scan, stop);

    let directories = match cutoff {
        Some(cutoff) => {
            let mut directories = vec![scan.path.clone()];
            walker.walk(&scan.path, |entry| {
                if !entry.file_type().is_some_and(|ft| ft.is_dir()) {
                    return;
                }

                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .and_then(unix_seconds);

                if modified.is_some_and(|m| m >= cutoff) {
                    directories.push(entry.path().to_path_buf());
                }
            });
            directories
        }
        None => {
            info!(path = ?scan.path, "No incremental cutoff available, scanning root only");
            vec![scan.path.clone()]
        }
    };

    debug!(path = ?scan.path, ?cutoff, directories = directories.len(), "Incremental scan plan");

    let batch_size = context.settings.batch_size;
    let mut pending: Vec<FileEvent> = Vec::new();
    let mut deleted = 0usize;
    let mut modified = 0usize;
    let mut failed_batches = 0usize;

    for dir in &directories {
        if stop.is_stopped() {
            break;
        }

        let events = diff_directory(&db, dir, cutoff, walker.rules());
        for event in &events {
            match event.kind {
                FileEventKind::Delete => deleted += 1,
                FileEventKind::Modify => modified += 1,
            }
        }
        pending.extend(events);

        if pending.len() >= batch_size {
            apply_batch(context, std::mem::take(&mut pending), &mut failed_batches);
        }
    }

    if !pending.is_empty() {
        apply_batch(context, pending, &mut failed_batches);
    }

    info!(
        path = ?scan.path,
        directories = directories.len(),
        modified,
        deleted,
        failed_batches,
        "Incremental scan diff applied"
    );

    Ok(())
}

/// A failed batch is rolled back by the writer; the scan carries on with the next one.
fn apply_batch(context: &ScanContext, events: Vec<FileEvent>, failed_batches: &mut usize) {
    let size = events.len();
    if let Err(error) = context.writer.index_events_blocking(events) {
        error!(%error, events = size, "Incremental batch failed, continuing");
        *failed_batches += 1;
    }
}

/// Timestamp of the last successful incremental scan, else the newest modification
/// time indexed under `root`, else nothing.
fn establish_cutoff(db: &IndexDatabase, root: &Path) -> Result<Option<i64>> {
    if let Some(record) = db.last_successful_scan(root, ScanType::Incremental)? {
        return Ok(Some(record.created_at.timestamp()));
    }

    db.max_last_modified(root)
}

fn diff_directory(
    db: &IndexDatabase,
    dir: &Path,
    cutoff: Option<i64>,
    rules: &ExclusionRules,
) -> Vec<FileEvent> {
    let indexed: AHashSet<PathBuf> = match db.list_children(dir) {
        Ok(children) => children.into_iter().collect(),
        Err(error) => {
            warn!(?dir, %error, "Failed to list indexed children, skipping directory");
            return Vec::new();
        }
    };

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) => {
            // the directory itself vanished: drop it and everything below
            if error.kind() == std::io::ErrorKind::NotFound {
                return vec![FileEvent::delete(dir)];
            }
            warn!(?dir, %error, "Failed to read directory");
            return Vec::new();
        }
    };

    let mut present: AHashSet<PathBuf> = AHashSet::new();
    let mut events = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_symlink() || rules.is_excluded(&path) {
            continue;
        }

        let last_modified: Option<SystemTime> = entry.metadata().ok().and_then(|m| m.modified().ok());
        let changed = match (cutoff, last_modified.and_then(unix_seconds)) {
            (Some(cutoff), Some(modified)) => modified >= cutoff,
            _ => true,
        };

        if changed || !indexed.contains(&path) {
            events.push(FileEvent::modify(&path, last_modified));
        }
        present.insert(path);
    }

    events.extend(
        indexed
            .into_iter()
            .filter(|path| !present.contains(path))
            .map(FileEvent::delete),
    );

    events
}
