//! Scan strategies and the lifecycle shared by all of them.
//!
//! Every scan runs on its own thread: it creates its `scan_history` record, marks it
//! started, runs the strategy body and persists the terminal status. Whatever
//! happens inside the body (error or panic) only fails that scan.

mod full;
mod incremental;
mod watcher;

use crate::cancel::StopSignal;
use crate::config::IndexerConfig;
use crate::error::{Error, Result};
use crate::types::{Scan, ScanId, ScanStatus, ScanType};
use crate::walker::FileSystemWalker;
use crate::writer::DbWriter;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Knobs every scanner reads, taken from [`IndexerConfig`].
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub batch_size: usize,
    pub max_pending_batches: usize,
    pub ignore_files: Vec<String>,
    pub ignore_hidden: bool,
    pub watch_debounce: Duration,
}

impl From<&IndexerConfig> for ScanSettings {
    fn from(config: &IndexerConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_pending_batches: config.max_pending_batches.max(1),
            ignore_files: config.ignore_files.clone(),
            ignore_hidden: config.ignore_hidden,
            watch_debounce: config.watch_debounce(),
        }
    }
}

pub struct ScanContext {
    pub writer: Arc<DbWriter>,
    pub settings: ScanSettings,
}

impl ScanContext {
    pub fn new(writer: Arc<DbWriter>, settings: ScanSettings) -> Self {
        Self { writer, settings }
    }

    fn walker_for(&self, scan: &Scan, stop: &StopSignal) -> FileSystemWalker {
        FileSystemWalker::new()
            .with_ignore_files(self.settings.ignore_files.clone())
            .with_ignore_hidden(self.settings.ignore_hidden)
            .with_excluded_filenames(scan.excluded_filenames.clone())
            .with_excluded_paths(scan.excluded_paths.clone())
            .with_max_depth(scan.max_depth)
            .with_stop_signal(stop.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Succeeded,
    Interrupted,
    Failed(String),
}

impl ScanOutcome {
    pub fn status(&self) -> ScanStatus {
        match self {
            ScanOutcome::Succeeded => ScanStatus::Succeeded,
            ScanOutcome::Interrupted => ScanStatus::Interrupted,
            ScanOutcome::Failed(_) => ScanStatus::Failed,
        }
    }
}

impl fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanOutcome::Failed(reason) => write!(f, "failed: {reason}"),
            other => write!(f, "{}", other.status()),
        }
    }
}

/// Owner side of a running scan thread.
#[derive(Debug)]
pub struct ScanHandle {
    stop: StopSignal,
    thread: Option<JoinHandle<()>>,
}

impl ScanHandle {
    pub fn interrupt(&self) {
        self.stop.stop();
    }

    pub fn join(mut self) {
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("Scan thread panicked outside of its scan body");
        }
    }
}

/// Starts `scan` on a new thread. `on_finish` runs on that thread once the terminal
/// status has been handed to the writer.
pub fn spawn_scanner(
    id: ScanId,
    scan: Scan,
    context: Arc<ScanContext>,
    on_finish: impl FnOnce(ScanId, ScanOutcome) + Send + 'static,
) -> Result<ScanHandle> {
    let stop = StopSignal::new();

    let thread = std::thread::Builder::new()
        .name(format!("fsindex-{}-scan-{id}", scan.scan_type))
        .spawn({
            let stop = stop.clone();
            move || {
                let outcome = run_scan(id, &scan, &context, &stop, || match scan.scan_type {
                    ScanType::Full => full::scan(&scan, &context, &stop),
                    ScanType::Incremental => incremental::scan(&scan, &context, &stop),
                    ScanType::Watch => watcher::scan(&scan, &context, &stop),
                });

                on_finish(id, outcome);
            }
        })?;

    Ok(ScanHandle {
        stop,
        thread: Some(thread),
    })
}

fn run_scan(
    id: ScanId,
    scan: &Scan,
    context: &ScanContext,
    stop: &StopSignal,
    body: impl FnOnce() -> Result<()>,
) -> ScanOutcome {
    let writer = &context.writer;
    let record = match writer.create_scan(&scan.path, scan.scan_type) {
        Ok(record) => record,
        Err(error) => {
            error!(
                scan_id = id,
                path = ?scan.path,
                %error,
                "Not scanning because scan record creation failed"
            );
            return ScanOutcome::Failed(Error::ScanRecordUnavailable(scan.path.clone()).to_string());
        }
    };

    if let Err(error) = writer.update_scan_status(record.id, ScanStatus::Started) {
        warn!(scan_id = id, %error, "Failed to mark scan as started");
    }

    info!(
        scan_id = id,
        record_id = record.id,
        path = ?scan.path,
        scan_type = %scan.scan_type,
        "Scan started"
    );

    let start = Instant::now();
    let outcome = match std::panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) if stop.is_stopped() => ScanOutcome::Interrupted,
        Ok(Ok(())) => ScanOutcome::Succeeded,
        Ok(Err(error)) => ScanOutcome::Failed(error.to_string()),
        Err(panic) => ScanOutcome::Failed(format!("scan panicked: {}", panic_message(&*panic))),
    };

    let persisted = match &outcome {
        ScanOutcome::Failed(reason) => {
            error!(scan_id = id, path = ?scan.path, %reason, "Scan failed");
            writer.set_scan_error(record.id, ScanStatus::Failed, reason.clone())
        }
        other => writer.update_scan_status(record.id, other.status()),
    };

    if let Err(error) = persisted {
        warn!(scan_id = id, %error, "Failed to persist scan outcome");
    }

    info!(
        scan_id = id,
        path = ?scan.path,
        scan_type = %scan.scan_type,
        %outcome,
        elapsed = ?start.elapsed(),
        "Scan terminated"
    );

    outcome
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
