//! Single writer for the index database.
//!
//! Every mutation, from any scan, is a job pushed onto one FIFO queue and executed by
//! one thread owning the only write connection. Jobs run strictly in submission
//! order. Callers that need an answer (scan record creation, batch acknowledgement)
//! block on a reply channel until their job has run.

use crate::error::{Error, Result};
use crate::storage::IndexDatabase;
use crate::types::{FileEvent, ScanRecord, ScanStatus, ScanType};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;
use tracing::{debug, error, info};

type Job = Box<dyn FnOnce(&mut IndexDatabase) + Send + 'static>;

#[derive(Default)]
struct JobQueue {
    jobs: VecDeque<Job>,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<JobQueue>,
    available: Condvar,
}

pub struct DbWriter {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    db_path: PathBuf,
}

impl std::fmt::Debug for DbWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbWriter")
            .field("db_path", &self.db_path)
            .field("pending_jobs", &self.pending_jobs())
            .finish()
    }
}

impl DbWriter {
    /// Opens (and migrates) the database, then hands the connection to a dedicated
    /// writer thread.
    pub fn spawn(db_path: &Path) -> Result<Self> {
        let db = IndexDatabase::open(db_path)?;
        let shared = Arc::new(Shared::default());

        let thread = std::thread::Builder::new()
            .name("fsindex-writer".into())
            .spawn({
                let shared = Arc::clone(&shared);
                move || writer_loop(db, &shared)
            })?;

        info!(?db_path, "Index writer started");

        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn pending_jobs(&self) -> usize {
        self.shared.queue.lock().jobs.len()
    }

    /// Queues a job without waiting for it to run.
    pub fn submit(&self, job: impl FnOnce(&mut IndexDatabase) + Send + 'static) -> Result<()> {
        let mut queue = self.shared.queue.lock();
        if queue.closed {
            return Err(Error::WriterShutdown);
        }

        queue.jobs.push_back(Box::new(job));
        drop(queue);
        self.shared.available.notify_one();
        Ok(())
    }

    /// Queues a job and blocks until the writer thread has run it.
    pub fn submit_with_result<T: Send + 'static>(
        &self,
        job: impl FnOnce(&mut IndexDatabase) -> Result<T> + Send + 'static,
    ) -> Result<T> {
        let (reply, response) = mpsc::sync_channel(1);
        self.submit(move |db| {
            let _ = reply.send(job(db));
        })?;

        // a dropped sender means the job panicked or the writer went away
        response.recv().map_err(|_| {
            if self.shared.queue.lock().closed {
                Error::WriterShutdown
            } else {
                Error::ThreadPanic
            }
        })?
    }

    /// Fire-and-forget batch application. Failures are logged by the writer.
    pub fn index_events(&self, events: Vec<FileEvent>) -> Result<()> {
        self.submit(move |db| {
            if let Err(error) = db.index_events(&events) {
                error!(%error, events = events.len(), "Failed to apply file events batch");
            }
        })
    }

    /// Applies a batch and waits for its transaction to commit or roll back.
    pub fn index_events_blocking(&self, events: Vec<FileEvent>) -> Result<()> {
        self.submit_with_result(move |db| db.index_events(&events))
    }

    pub fn delete_files(&self, paths: Vec<PathBuf>) -> Result<()> {
        self.submit_with_result(move |db| db.delete_files(&paths))
    }

    pub fn create_scan(&self, entrypoint: &Path, scan_type: ScanType) -> Result<ScanRecord> {
        let entrypoint = entrypoint.to_path_buf();
        self.submit_with_result(move |db| db.create_scan(&entrypoint, scan_type))
    }

    pub fn update_scan_status(&self, id: i64, status: ScanStatus) -> Result<()> {
        self.submit(move |db| {
            if let Err(error) = db.update_scan_status(id, status) {
                error!(scan_id = id, %status, %error, "Failed to update scan status");
            }
        })
    }

    pub fn set_scan_error(&self, id: i64, status: ScanStatus, message: String) -> Result<()> {
        self.submit(move |db| {
            if let Err(error) = db.set_scan_error(id, status, &message) {
                error!(scan_id = id, %status, %error, "Failed to record scan error");
            }
        })
    }

    pub fn clear_index(&self) -> Result<()> {
        self.submit_with_result(|db| db.clear_index())
    }

    /// Blocks until every job submitted so far has run.
    pub fn flush(&self) -> Result<()> {
        self.submit_with_result(|_| Ok(()))
    }

    /// Stops accepting jobs, runs what is already queued and joins the thread.
    pub fn shutdown(&self) {
        self.shared.queue.lock().closed = true;
        self.shared.available.notify_all();

        if let Some(handle) = self.thread.lock().take()
            && handle.join().is_err()
        {
            error!("Index writer thread panicked during shutdown");
        }
    }
}

impl Drop for DbWriter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn writer_loop(mut db: IndexDatabase, shared: &Shared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break Some(job);
                }
                if queue.closed {
                    break None;
                }
                shared.available.wait(&mut queue);
            }
        };

        let Some(job) = job else {
            break;
        };

        if std::panic::catch_unwind(AssertUnwindSafe(|| job(&mut db))).is_err() {
            error!("Index writer job panicked, continuing with the next one");
        }
    }

    debug!("Index writer stopped");
}
