use super::ScanContext;
use crate::cancel::StopSignal;
use crate::error::{Error, Result};
use crate::types::{FileEvent, Scan};
use crate::walker::EXCLUDED_FILENAMES;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecursiveMode};
use notify_debouncer_full::{
    DebounceEventResult, DebouncedEvent, RecommendedCache, new_debouncer_opt,
};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use tracing::{Level, debug, info, warn};

type Debouncer = notify_debouncer_full::Debouncer<notify::RecommendedWatcher, RecommendedCache>;

/// How often the scan thread checks for interruption while events flow in the
/// background.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

struct EventFilter {
    excluded_filenames: Vec<String>,
    excluded_paths: Vec<PathBuf>,
}

impl EventFilter {
    fn is_excluded(&self, path: &Path) -> bool {
        let raw = path.as_os_str().to_string_lossy();
        if self.excluded_filenames.iter().any(|name| raw.ends_with(name.as_str())) {
            return true;
        }

        if self.excluded_paths.iter().any(|p| path.starts_with(p)) {
            return true;
        }

        path.components().any(|c| match c {
            Component::Normal(segment) => segment
                .to_str()
                .is_some_and(|s| EXCLUDED_FILENAMES.contains(&s)),
            _ => false,
        })
    }
}

/// Live-watches the scan root until interrupted. Events are translated on the
/// debouncer's thread and handed straight to the writer; this thread only waits for
/// interruption or a fatal watcher error.
pub(super) fn scan(scan: &Scan, context: &ScanContext, stop: &StopSignal) -> Result<()> {
    let (failures, failure_rx) = mpsc::channel::<Error>();
    let filter = EventFilter {
        excluded_filenames: scan.excluded_filenames.clone(),
        excluded_paths: scan.excluded_paths.clone(),
    };
    let writer = Arc::clone(&context.writer);
    let root = scan.path.clone();
    let debounce = context.settings.watch_debounce;

    // symlinked trees would produce events for files the walker never indexes
    let config = Config::default().with_follow_symlinks(false);

    let mut debouncer: Debouncer = new_debouncer_opt(
        debounce,
        Some(debounce / 2),
        move |result: DebounceEventResult| match result {
            Ok(events) => {
                let file_events = translate_events(&events, &filter);
                if file_events.is_empty() {
                    return;
                }

                if let Err(error) = writer.index_events(file_events) {
                    warn!(%error, "Dropping watcher events");
                }
            }
            Err(errors) => {
                for error in errors {
                    if matches!(error.kind, notify::ErrorKind::MaxFilesWatch) {
                        let _ = failures.send(Error::WatchLimitReached(root.clone()));
                    } else {
                        warn!(%error, "File watcher error");
                    }
                }
            }
        },
        RecommendedCache::new(),
        config,
    )
    .map_err(|error| watch_error(error, &scan.path))?;

    debouncer
        .watch(&scan.path, RecursiveMode::Recursive)
        .map_err(|error| watch_error(error, &scan.path))?;

    info!(path = ?scan.path, "File watcher started");

    let result = loop {
        match failure_rx.recv_timeout(POLL_INTERVAL) {
            Ok(error) => break Err(error),
            Err(RecvTimeoutError::Timeout) if stop.is_stopped() => break Ok(()),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break Ok(()),
        }
    };

    drop(debouncer);
    info!(path = ?scan.path, "File watcher stopped");
    result
}

fn watch_error(error: notify::Error, path: &Path) -> Error {
    match error.kind {
        notify::ErrorKind::MaxFilesWatch => Error::WatchLimitReached(path.to_path_buf()),
        _ => Error::FileSystemWatch(error),
    }
}

#[tracing::instrument(name = "fs_events", skip_all, fields(events = events.len()), level = Level::DEBUG)]
fn translate_events(events: &[DebouncedEvent], filter: &EventFilter) -> Vec<FileEvent> {
    let mut file_events = Vec::new();
    for debounced in events {
        debug!(event = ?debounced.event, "Processing FS event");
        translate_event(&debounced.event, &mut file_events);
    }

    file_events.retain(|event| !filter.is_excluded(&event.path));
    file_events
}

fn translate_event(event: &Event, out: &mut Vec<FileEvent>) {
    match event.kind {
        EventKind::Access(_) => {}
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to, ..] = event.paths.as_slice() {
                out.push(FileEvent::delete(from));
                out.extend(current_state(to));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            // the paired destination event was never delivered, index the removal only
            for path in &event.paths {
                warn!(?path, "Rename without associated event, treating as delete");
                out.push(FileEvent::delete(path));
            }
        }
        EventKind::Create(_)
        | EventKind::Modify(ModifyKind::Name(RenameMode::To))
        | EventKind::Modify(_) => {
            out.extend(event.paths.iter().filter_map(|p| current_state(p)));
        }
        EventKind::Remove(_) => {
            out.extend(event.paths.iter().map(FileEvent::delete));
        }
        EventKind::Any | EventKind::Other => {
            out.extend(event.paths.iter().filter_map(|p| current_state(p)));
        }
    }
}

/// Modify when the path exists, Delete when it is already gone. Symlinks are ignored
/// like the walker ignores them.
fn current_state(path: &Path) -> Option<FileEvent> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_symlink() => None,
        Ok(metadata) => Some(FileEvent::modify(path, metadata.modified().ok())),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Some(FileEvent::delete(path)),
        Err(_) => None,
    }
}
