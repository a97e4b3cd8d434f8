use super::ScanContext;
use crate::batch_writer::{BatchWriterWorker, EventSink};
use crate::cancel::StopSignal;
use crate::error::Result;
use crate::types::{FileEvent, Scan};
use std::sync::Arc;
use tracing::info;

/// Walks the whole entrypoint and re-indexes every entry found. Batches go through a
/// dedicated [`BatchWriterWorker`] so a fast walk stalls instead of buffering the
/// entire tree in memory.
pub(super) fn scan(scan: &Scan, context: &ScanContext, stop: &StopSignal) -> Result<()> {
    let batch_size = context.settings.batch_size;
    let sink: Arc<dyn EventSink> = context.writer.clone();
    let worker = BatchWriterWorker::spawn(sink, context.settings.max_pending_batches)?;
    let walker = context.walker_for(scan, stop);

    let mut batch = Vec::with_capacity(batch_size);
    let walk_stats = walker.walk(&scan.path, |entry| {
        let last_modified = entry.metadata().ok().and_then(|m| m.modified().ok());
        batch.push(FileEvent::modify(entry.path(), last_modified));

        if batch.len() >= batch_size {
            worker.submit(std::mem::replace(&mut batch, Vec::with_capacity(batch_size)));
        }
    });

    worker.submit(batch);
    let batch_stats = worker.finish();

    info!(
        path = ?scan.path,
        files = walk_stats.files,
        directories = walk_stats.directories,
        applied_batches = batch_stats.applied_batches,
        failed_batches = batch_stats.failed_batches,
        "Full scan walk finished"
    );

    Ok(())
}
