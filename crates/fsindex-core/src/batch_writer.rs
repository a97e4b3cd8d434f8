//! Bounded hand-off between a fast producer (the full scan walker) and the writer.
//!
//! Producers block in [`BatchWriterWorker::submit`] while `max_pending` batches are
//! already queued, so a walker can never run more than a bounded amount of memory
//! ahead of the database.

use crate::error::Result;
use crate::types::FileEvent;
use crate::writer::DbWriter;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error};

/// Destination of file event batches.
pub trait EventSink: Send + Sync {
    /// Applies one batch, returning once it is durable (or has failed).
    fn apply_batch(&self, events: Vec<FileEvent>) -> Result<()>;
}

impl EventSink for DbWriter {
    fn apply_batch(&self, events: Vec<FileEvent>) -> Result<()> {
        self.index_events_blocking(events)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub applied_batches: usize,
    pub failed_batches: usize,
    /// Largest queue length observed, never above the configured bound.
    pub max_pending_observed: usize,
}

#[derive(Default)]
struct BatchState {
    batches: VecDeque<Vec<FileEvent>>,
    finished: bool,
    stats: BatchStats,
}

#[derive(Default)]
struct BatchShared {
    state: Mutex<BatchState>,
    not_empty: Condvar,
    not_full: Condvar,
}

pub struct BatchWriterWorker {
    shared: Arc<BatchShared>,
    thread: Option<JoinHandle<()>>,
    max_pending: usize,
}

impl BatchWriterWorker {
    pub fn spawn(sink: Arc<dyn EventSink>, max_pending: usize) -> Result<Self> {
        let shared = Arc::new(BatchShared::default());

        let thread = std::thread::Builder::new()
            .name("fsindex-batch-writer".into())
            .spawn({
                let shared = Arc::clone(&shared);
                move || worker_loop(&shared, sink.as_ref())
            })?;

        Ok(Self {
            shared,
            thread: Some(thread),
            max_pending: max_pending.max(1),
        })
    }

    pub fn pending_batches(&self) -> usize {
        self.shared.state.lock().batches.len()
    }

    /// Queues a batch, blocking the caller while the queue is full.
    pub fn submit(&self, batch: Vec<FileEvent>) {
        if batch.is_empty() {
            return;
        }

        let mut state = self.shared.state.lock();
        while state.batches.len() >= self.max_pending {
            debug!(
                pending = state.batches.len(),
                "Batch queue full, waiting for writer"
            );
            self.shared.not_full.wait(&mut state);
        }

        state.batches.push_back(batch);
        state.stats.max_pending_observed = state.stats.max_pending_observed.max(state.batches.len());
        drop(state);
        self.shared.not_empty.notify_one();
    }

    /// Waits for every queued batch to be applied and stops the worker thread.
    pub fn finish(mut self) -> BatchStats {
        self.stop_and_join();
        self.shared.state.lock().stats
    }

    fn stop_and_join(&mut self) {
        self.shared.state.lock().finished = true;
        self.shared.not_empty.notify_all();

        if let Some(handle) = self.thread.take()
            && handle.join().is_err()
        {
            error!("Batch writer thread panicked");
        }
    }
}

impl Drop for BatchWriterWorker {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn worker_loop(shared: &BatchShared, sink: &dyn EventSink) {
    loop {
        let batch = {
            let mut state = shared.state.lock();
            loop {
                if let Some(batch) = state.batches.pop_front() {
                    break Some(batch);
                }
                if state.finished {
                    break None;
                }
                shared.not_empty.wait(&mut state);
            }
        };
        shared.not_full.notify_one();

        let Some(batch) = batch else {
            break;
        };

        let size = batch.len();
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| sink.apply_batch(batch)));
        let applied = match outcome {
            Ok(Ok(())) => true,
            Ok(Err(error)) => {
                error!(%error, size, "Failed to write batch, continuing with the next one");
                false
            }
            Err(_) => {
                error!(size, "Batch sink panicked, continuing with the next one");
                false
            }
        };

        let mut state = shared.state.lock();
        if applied {
            state.stats.applied_batches += 1;
        } else {
            state.stats.failed_batches += 1;
        }
    }
}
