//! Execution of admitted tasks and ownership of the running set

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::domain::{ExecStatus, Task, TaskContext, TaskError};
use crate::events::ObserverSet;

use super::queue::Counters;

/// Called after a task leaves the running set, whatever the outcome
pub type CompletionCallback = Box<dyn Fn(&Arc<Task>) + Send + Sync>;

/// Executes admitted tasks and maintains the running set
///
/// Admission (insertion into the running set) and execution are split so the
/// dispatcher can serialise admission inside its critical section while the
/// closure itself runs outside any lock. The runner guarantees removal from
/// the running set on every exit path.
pub struct Runner {
    /// Currently executing tasks
    running: Mutex<Vec<Arc<Task>>>,

    /// Lifecycle notification fan-out
    observers: Arc<ObserverSet>,

    /// Global outcome counters
    counters: Arc<Counters>,

    /// Worker-local id allocator, fresh per invocation
    next_worker_id: AtomicU32,

    /// Process-wide logical tick, bumped at each task start
    next_tick: AtomicU64,

    /// Whether execution durations are measured
    profiling_enabled: AtomicBool,

    /// Optional user callback invoked after each completion
    completion_callback: RwLock<Option<CompletionCallback>>,
}

impl Runner {
    /// Create a runner
    pub fn new(observers: Arc<ObserverSet>, counters: Arc<Counters>, profiling: bool) -> Self {
        debug!(%profiling, "Runner::new: called");
        Self {
            running: Mutex::new(Vec::new()),
            observers,
            counters,
            next_worker_id: AtomicU32::new(0),
            next_tick: AtomicU64::new(0),
            profiling_enabled: AtomicBool::new(profiling),
            completion_callback: RwLock::new(None),
        }
    }

    /// Insert a task into the running set
    ///
    /// Called by the dispatcher inside its admission critical section, before
    /// [`Runner::run`] is invoked outside it.
    pub fn admit(&self, task: &Arc<Task>) {
        debug!(id = %task.id(), "Runner::admit: called");
        self.running.lock().push(task.clone());
    }

    /// Execute a previously admitted task
    ///
    /// Emits the start notification, runs the job inside a failure-containing
    /// frame, resolves counters and lifecycle events from the outcome, and
    /// removes the task from the running set.
    pub fn run(&self, task: Arc<Task>) {
        debug!(id = %task.id(), "Runner::run: called");

        let worker_id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
        let tick = self.next_tick.fetch_add(1, Ordering::SeqCst);
        let profiling = self.profiling_enabled.load(Ordering::SeqCst);

        let mut ctx = TaskContext::new(
            worker_id,
            tick,
            profiling,
            task.deadline(),
            task.cancel_flag(),
        );

        self.observers.task_started(&task, worker_id);

        let started = Instant::now();
        let status = task.execute(&mut ctx);

        match status {
            Some(ExecStatus::Completed) => {
                debug!(id = %task.id(), "Runner::run: completed");
                self.counters.record_completed();
                let duration = if profiling { Some(started.elapsed()) } else { None };
                self.observers.task_completed(&task, worker_id, duration);
            }
            Some(ExecStatus::Failed(description)) => {
                debug!(id = %task.id(), %description, "Runner::run: failed");
                self.counters.record_failed();
                self.observers.task_failed(&task, worker_id, &description);
            }
            Some(ExecStatus::Cancelled) => {
                debug!(id = %task.id(), "Runner::run: cancelled");
                self.counters.record_cancelled();
                self.observers.task_cancelled(&task);
            }
            Some(ExecStatus::TimedOut) => {
                debug!(id = %task.id(), "Runner::run: timed out");
                self.counters.record_timed_out();
                self.observers.task_timed_out(&task);
            }
            None => {
                // The job was already taken. The handle must still resolve,
                // so fail it the same log-and-continue way a missing
                // running-set entry is tolerated.
                warn!(id = %task.id(), "Runner::run: task had no job to run");
                let description = "job already consumed".to_string();
                task.resolve_failed(TaskError::ClosureFailed {
                    description: description.clone(),
                });
                self.counters.record_failed();
                self.observers.task_failed(&task, worker_id, &description);
            }
        }

        self.remove(&task);
        self.notify_completion(&task);
    }

    /// Remove a task from the running set
    fn remove(&self, task: &Arc<Task>) {
        let mut running = self.running.lock();
        match running.iter().position(|t| t.id() == task.id()) {
            Some(index) => {
                running.swap_remove(index);
                debug!(id = %task.id(), remaining = %running.len(), "Runner::remove: task removed");
            }
            None => {
                warn!(id = %task.id(), "Runner::remove: task not found in running set");
            }
        }
    }

    fn notify_completion(&self, task: &Arc<Task>) {
        let callback = self.completion_callback.read();
        if let Some(callback) = callback.as_ref() {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(task)));
            if outcome.is_err() {
                warn!(id = %task.id(), "Runner::notify_completion: completion callback panicked");
            }
        }
    }

    /// Snapshot of the currently executing tasks
    pub fn running_snapshot(&self) -> Vec<Arc<Task>> {
        self.running.lock().clone()
    }

    /// Number of currently executing tasks
    pub fn running_len(&self) -> usize {
        self.running.lock().len()
    }

    /// Enable or disable duration measurement
    pub fn set_profiling(&self, enabled: bool) {
        debug!(%enabled, "Runner::set_profiling: called");
        self.profiling_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Check whether duration measurement is enabled
    pub fn profiling_enabled(&self) -> bool {
        self.profiling_enabled.load(Ordering::SeqCst)
    }

    /// Install the completion callback, replacing any previous one
    pub fn set_completion_callback(&self, callback: CompletionCallback) {
        debug!("Runner::set_completion_callback: called");
        *self.completion_callback.write() = Some(callback);
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("running", &self.running_len())
            .field("profiling", &self.profiling_enabled())
            .finish()
    }
}
