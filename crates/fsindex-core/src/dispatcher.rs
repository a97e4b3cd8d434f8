//! Lifecycle owner of every running scan.
//!
//! `enqueue` spawns the scanner and registers it; the scanner reports back through a
//! completion callback, and a collector thread joins finished scan threads and drops
//! their bookkeeping. Callers of `enqueue`/`interrupt` never wait on a scan thread.

use crate::error::{Error, Result};
use crate::scanner::{ScanContext, ScanHandle, ScanOutcome, spawn_scanner};
use crate::types::{Scan, ScanId};
use ahash::AHashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

struct ActiveScan {
    scan: Scan,
    handle: ScanHandle,
}

#[derive(Default)]
struct FinishedQueue {
    finished: VecDeque<(ScanId, ScanOutcome)>,
    closed: bool,
}

struct DispatcherShared {
    context: Arc<ScanContext>,
    next_id: AtomicU64,
    active: Mutex<AHashMap<ScanId, ActiveScan>>,
    /// Signalled whenever the collector removed an entry from `active`.
    idle: Condvar,
    finished: Mutex<FinishedQueue>,
    finished_available: Condvar,
}

impl DispatcherShared {
    fn report_finished(&self, id: ScanId, outcome: ScanOutcome) {
        self.finished.lock().finished.push_back((id, outcome));
        self.finished_available.notify_one();
    }
}

pub struct ScanDispatcher {
    shared: Arc<DispatcherShared>,
    collector: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ScanDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanDispatcher")
            .field("active_scans", &self.shared.active.lock().len())
            .finish()
    }
}

impl ScanDispatcher {
    pub fn new(context: Arc<ScanContext>) -> Result<Self> {
        let shared = Arc::new(DispatcherShared {
            context,
            next_id: AtomicU64::new(1),
            active: Mutex::new(AHashMap::new()),
            idle: Condvar::new(),
            finished: Mutex::new(FinishedQueue::default()),
            finished_available: Condvar::new(),
        });

        let collector = std::thread::Builder::new()
            .name("fsindex-scan-collector".into())
            .spawn({
                let shared = Arc::clone(&shared);
                move || collector_loop(&shared)
            })?;

        Ok(Self {
            shared,
            collector: Mutex::new(Some(collector)),
        })
    }

    /// Starts `scan` on its own thread and returns its identifier.
    pub fn enqueue(&self, scan: Scan) -> Result<ScanId> {
        if self.shared.finished.lock().closed {
            return Err(Error::DispatcherShutdown);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let scan_type = scan.scan_type;
        let path = scan.path.clone();

        // held across spawn so a scan that finishes instantly is always registered
        // before the collector looks for it
        let mut active = self.shared.active.lock();
        let reporter: Weak<DispatcherShared> = Arc::downgrade(&self.shared);
        let handle = spawn_scanner(
            id,
            scan.clone(),
            Arc::clone(&self.shared.context),
            move |id, outcome| {
                if let Some(shared) = reporter.upgrade() {
                    shared.report_finished(id, outcome);
                }
            },
        )?;
        active.insert(id, ActiveScan { scan, handle });
        drop(active);

        info!(scan_id = id, ?path, %scan_type, "Scan enqueued");
        Ok(id)
    }

    /// Asks one scan to stop. Returns false when no such scan is active.
    pub fn interrupt(&self, id: ScanId) -> bool {
        match self.shared.active.lock().get(&id) {
            Some(active) => {
                debug!(scan_id = id, path = ?active.scan.path, "Interrupting scan");
                active.handle.interrupt();
                true
            }
            None => false,
        }
    }

    pub fn interrupt_all(&self) {
        let active = self.shared.active.lock();
        for (id, scan) in active.iter() {
            debug!(scan_id = id, path = ?scan.scan.path, "Interrupting scan");
            scan.handle.interrupt();
        }
    }

    /// Snapshot of the scans currently running, ordered by identifier.
    pub fn scans(&self) -> Vec<(ScanId, Scan)> {
        let mut scans: Vec<(ScanId, Scan)> = self
            .shared
            .active
            .lock()
            .iter()
            .map(|(id, active)| (*id, active.scan.clone()))
            .collect();
        scans.sort_unstable_by_key(|(id, _)| *id);
        scans
    }

    pub fn is_idle(&self) -> bool {
        self.shared.active.lock().is_empty()
    }

    /// Blocks until no scan is active. Watch scans only end when interrupted.
    pub fn wait_idle(&self) {
        let mut active = self.shared.active.lock();
        while !active.is_empty() {
            self.shared.idle.wait(&mut active);
        }
    }

    /// Like [`Self::wait_idle`] but gives up after `timeout`, returning whether the
    /// dispatcher became idle.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut active = self.shared.active.lock();
        while !active.is_empty() {
            if self.shared.idle.wait_until(&mut active, deadline).timed_out() {
                return active.is_empty();
            }
        }
        true
    }

    /// Interrupts every scan, waits for all of them to be reclaimed and stops the
    /// collector. Further `enqueue` calls fail.
    pub fn shutdown(&self) {
        let Some(collector) = self.collector.lock().take() else {
            return;
        };

        self.shared.finished.lock().closed = true;
        self.interrupt_all();
        self.wait_idle();
        self.shared.finished_available.notify_all();

        if collector.join().is_err() {
            error!("Scan collector thread panicked");
        }
        info!("Scan dispatcher stopped");
    }
}

impl Drop for ScanDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn collector_loop(shared: &DispatcherShared) {
    loop {
        let (id, outcome) = {
            let mut queue = shared.finished.lock();
            loop {
                if let Some(finished) = queue.finished.pop_front() {
                    break finished;
                }
                // closed is set before the final wait_idle, so only stop once every
                // registered scan has been reclaimed
                if queue.closed && shared.active.lock().is_empty() {
                    return;
                }
                shared.finished_available.wait(&mut queue);
            }
        };

        let removed = shared.active.lock().remove(&id);
        match removed {
            Some(active) => {
                active.handle.join();
                debug!(scan_id = id, path = ?active.scan.path, %outcome, "Scan reclaimed");
            }
            None => warn!(scan_id = id, "Finished scan was not registered"),
        }

        shared.idle.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexerConfig;
    use crate::scanner::ScanSettings;
    use crate::writer::DbWriter;
    use tempfile::TempDir;

    fn dispatcher(tmp: &TempDir) -> (Arc<ScanContext>, ScanDispatcher) {
        let writer = DbWriter::spawn(&tmp.path().join("index.db")).unwrap();
        let mut config = IndexerConfig::default();
        config.watch_debounce_ms = 20;
        let context = Arc::new(ScanContext::new(
            Arc::new(writer),
            ScanSettings::from(&config),
        ));
        let dispatcher = ScanDispatcher::new(Arc::clone(&context)).unwrap();
        (context, dispatcher)
    }

    fn tree(tmp: &TempDir) -> std::path::PathBuf {
        let root = tmp.path().join("tree");
        std::fs::create_dir_all(root.join("a/b")).unwrap();
        std::fs::write(root.join("a/one.txt"), b"1").unwrap();
        std::fs::write(root.join("a/b/two.txt"), b"2").unwrap();
        root
    }

    #[test]
    fn finished_scans_are_reclaimed() {
        let tmp = TempDir::new().unwrap();
        let root = tree(&tmp);
        let (context, dispatcher) = dispatcher(&tmp);

        let first = dispatcher.enqueue(Scan::full(&root)).unwrap();
        let second = dispatcher.enqueue(Scan::full(&root)).unwrap();
        assert!(second > first, "scan ids must increase");

        assert!(dispatcher.wait_idle_timeout(Duration::from_secs(10)));
        assert!(dispatcher.scans().is_empty());

        context.writer.flush().unwrap();
        let count = context.writer.submit_with_result(|db| db.count_files()).unwrap();
        assert_eq!(count, 4, "two directories and two files");
    }

    #[test]
    fn interrupting_unknown_scan_returns_false() {
        let tmp = TempDir::new().unwrap();
        let (_context, dispatcher) = dispatcher(&tmp);
        assert!(!dispatcher.interrupt(42));
    }

    #[test]
    fn watch_scan_stays_active_until_interrupted() {
        let tmp = TempDir::new().unwrap();
        let root = tree(&tmp);
        let (_context, dispatcher) = dispatcher(&tmp);

        let id = dispatcher.enqueue(Scan::watch(&root)).unwrap();
        assert!(!dispatcher.wait_idle_timeout(Duration::from_millis(300)));

        let scans = dispatcher.scans();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].0, id);
        assert_eq!(scans[0].1.path, root);

        assert!(dispatcher.interrupt(id));
        assert!(dispatcher.wait_idle_timeout(Duration::from_secs(10)));
    }

    #[test]
    fn enqueue_after_shutdown_fails() {
        let tmp = TempDir::new().unwrap();
        let root = tree(&tmp);
        let (_context, dispatcher) = dispatcher(&tmp);

        dispatcher.enqueue(Scan::watch(&root)).unwrap();
        dispatcher.shutdown();

        assert!(dispatcher.is_idle());
        assert!(matches!(
            dispatcher.enqueue(Scan::full(&root)),
            Err(Error::DispatcherShutdown)
        ));
    }
}
