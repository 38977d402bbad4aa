//! Fixed-size pool of worker threads driving the dispatch loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::dispatcher::{DispatchOutcome, Dispatcher};

/// How long a worker backs off after an idle or denied dispatch pass
const DISPATCH_BACKOFF: Duration = Duration::from_millis(1);

/// Fixed-size set of OS threads, each looping over the dispatcher
///
/// Workers run until the stop flag is set or the queue reports shutdown.
/// `resize` drains the current generation of workers and spawns a fresh one;
/// the pending queue survives a resize.
pub struct WorkerPool {
    dispatcher: Arc<Dispatcher>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    stopping: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Create a pool and eagerly spawn `size` workers
    pub fn new(dispatcher: Arc<Dispatcher>, size: usize) -> Self {
        debug!(%size, "WorkerPool::new: called");
        let pool = Self {
            dispatcher,
            workers: Mutex::new(Vec::new()),
            stopping: Arc::new(AtomicBool::new(false)),
        };
        pool.spawn_workers(size.max(1));
        pool
    }

    fn spawn_workers(&self, count: usize) {
        debug!(%count, "WorkerPool::spawn_workers: called");
        let mut workers = self.workers.lock();
        for index in 0..count {
            let dispatcher = self.dispatcher.clone();
            let stopping = self.stopping.clone();
            let spawned = thread::Builder::new()
                .name(format!("taskgate-worker-{}", index))
                .spawn(move || worker_loop(&dispatcher, &stopping));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => warn!(%index, error = %e, "WorkerPool::spawn_workers: failed to spawn worker"),
            }
        }
    }

    /// Number of live worker threads
    pub fn size(&self) -> usize {
        self.workers.lock().len()
    }

    /// Stop the current workers, join them, and spawn `size` fresh ones
    pub fn resize(&self, size: usize) {
        debug!(%size, "WorkerPool::resize: called");
        self.stop_and_join();
        self.stopping.store(false, Ordering::SeqCst);
        self.spawn_workers(size.max(1));
    }

    /// Stop and join all workers
    pub fn shutdown(&self) {
        debug!("WorkerPool::shutdown: called");
        self.stop_and_join();
    }

    fn stop_and_join(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let workers = {
            let mut guard = self.workers.lock();
            std::mem::take(&mut *guard)
        };
        for worker in workers {
            if worker.join().is_err() {
                warn!("WorkerPool::stop_and_join: worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size())
            .field("stopping", &self.stopping.load(Ordering::SeqCst))
            .finish()
    }
}

fn worker_loop(dispatcher: &Dispatcher, stopping: &AtomicBool) {
    debug!("worker_loop: started");
    while !stopping.load(Ordering::SeqCst) {
        match dispatcher.dispatch_next() {
            DispatchOutcome::Stopped => {
                debug!("worker_loop: queue stopped, exiting");
                break;
            }
            // Backing off after a denial bounds how fast a blocked task
            // accumulates re-queues toward the anti-starvation limit
            DispatchOutcome::Idle | DispatchOutcome::Requeued => {
                thread::sleep(DISPATCH_BACKOFF);
            }
            DispatchOutcome::Executed => {}
        }
    }
    debug!("worker_loop: exited");
}
