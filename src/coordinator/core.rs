//! The coordinator facade: submission, policies, draining, statistics

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::GateConfig;
use crate::domain::handle::Slot;
use crate::domain::task::erase;
use crate::domain::{TagPolicy, Task, TaskContext, TaskError, TaskHandle, TaskId};
use crate::events::{GateObserver, ObserverSet};
use crate::scheduler::runner::CompletionCallback;
use crate::scheduler::{ConflictResolver, Counters, Dispatcher, GateStats, PendingQueue, Runner, WorkerPool};

/// How often the drain condition is polled while awaiting idleness
const AWAIT_POLL: Duration = Duration::from_millis(10);

/// Coordinates priority-ordered execution of tagged tasks
///
/// Owns the pending queue, the conflict resolver, the runner, the dispatcher,
/// and the worker pool. Construction spawns the pool eagerly; `shutdown`
/// stops the queue, joins the workers, and resolves whatever never ran.
pub struct Coordinator {
    queue: Arc<PendingQueue>,
    resolver: Arc<ConflictResolver>,
    runner: Arc<Runner>,
    dispatcher: Arc<Dispatcher>,
    pool: WorkerPool,
    observers: Arc<ObserverSet>,
    counters: Arc<Counters>,
    next_task_id: AtomicU32,
    stopping: AtomicBool,
}

impl Coordinator {
    /// Create a coordinator and eagerly spawn its worker pool
    pub fn new(config: GateConfig) -> Self {
        info!(?config, "Coordinator::new: called");

        let observers = Arc::new(ObserverSet::new());
        let counters = Arc::new(Counters::default());
        let queue = Arc::new(PendingQueue::new());
        let resolver = Arc::new(ConflictResolver::new(
            config.default_policy,
            observers.clone(),
        ));
        let runner = Arc::new(Runner::new(
            observers.clone(),
            counters.clone(),
            config.profiling_enabled,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            queue.clone(),
            resolver.clone(),
            runner.clone(),
            observers.clone(),
            counters.clone(),
            config.anti_starvation_limit,
        ));
        let pool = WorkerPool::new(dispatcher.clone(), config.pool_size);

        Self {
            queue,
            resolver,
            runner,
            dispatcher,
            pool,
            observers,
            counters,
            next_task_id: AtomicU32::new(0),
            stopping: AtomicBool::new(false),
        }
    }

    /// Submit a closure with a priority and tags
    ///
    /// Returns a handle resolving exactly once with the closure's value, its
    /// failure, or a cancelled/timed-out status.
    pub fn submit<T, F, I, S>(
        &self,
        func: F,
        priority: u32,
        tags: I,
    ) -> Result<TaskHandle<T>, TaskError>
    where
        F: FnOnce(&mut TaskContext) -> T + Send + 'static,
        T: Send + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.submit_with(func, priority, tags, None)
    }

    /// Submit with an optional timeout installed on the task record
    pub(crate) fn submit_with<T, F, I, S>(
        &self,
        func: F,
        priority: u32,
        tags: I,
        timeout: Option<Duration>,
    ) -> Result<TaskHandle<T>, TaskError>
    where
        F: FnOnce(&mut TaskContext) -> T + Send + 'static,
        T: Send + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.stopping.load(Ordering::SeqCst) {
            debug!("Coordinator::submit_with: coordinator stopping, rejecting");
            return Err(TaskError::QueueStopped);
        }

        let id: TaskId = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        debug!(%id, %priority, "Coordinator::submit_with: called");

        let slot = Slot::new();
        let mut task = Task::new(id, erase(func, slot.clone()), priority);
        for tag in tags {
            task.add_tag(tag);
        }
        if let Some(timeout) = timeout {
            task.set_timeout(timeout);
        }

        let task = Arc::new(task);
        let handle = TaskHandle::new(id, slot, task.cancel_flag());
        // Queued is observed before any started notification for this task
        self.observers.task_queued(&task);
        self.queue.enqueue(task)?;

        Ok(handle)
    }

    /// Set the admission policy for a tag (last writer wins)
    pub fn set_policy(&self, tag: impl Into<String>, policy: TagPolicy) {
        let tag = tag.into();
        debug!(%tag, %policy, "Coordinator::set_policy: called");
        self.resolver.set_policy(tag, policy);
    }

    /// Look up the admission policy for a tag
    pub fn get_policy(&self, tag: &str) -> TagPolicy {
        self.resolver.get_policy(tag)
    }

    /// Replace the fallback policy for tags without an explicit entry
    pub fn set_default_policy(&self, policy: TagPolicy) {
        debug!(%policy, "Coordinator::set_default_policy: called");
        self.resolver.set_default_policy(policy);
    }

    /// Get the fallback policy
    pub fn default_policy(&self) -> TagPolicy {
        self.resolver.default_policy()
    }

    /// Replace the worker pool with `size` fresh workers
    pub fn set_pool_size(&self, size: usize) {
        debug!(%size, "Coordinator::set_pool_size: called");
        self.pool.resize(size.max(1));
    }

    /// Number of live worker threads
    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    /// Replace the anti-starvation limit (clamped to at least 1)
    pub fn set_anti_starvation_limit(&self, limit: u32) {
        debug!(%limit, "Coordinator::set_anti_starvation_limit: called");
        self.dispatcher.set_anti_starvation_limit(limit);
    }

    /// Re-queue count after which a blocked task is forced through
    pub fn anti_starvation_limit(&self) -> u32 {
        self.dispatcher.anti_starvation_limit()
    }

    /// Enable or disable execution duration measurement
    pub fn set_profiling(&self, enabled: bool) {
        debug!(%enabled, "Coordinator::set_profiling: called");
        self.runner.set_profiling(enabled);
    }

    /// Register a lifecycle observer
    pub fn add_observer(&self, observer: Arc<dyn GateObserver>) {
        debug!("Coordinator::add_observer: called");
        self.observers.register(observer);
    }

    /// Remove every registered observer
    pub fn clear_observers(&self) {
        debug!("Coordinator::clear_observers: called");
        self.observers.clear();
    }

    /// Install a callback invoked after each task leaves the running set
    pub fn set_completion_callback(&self, callback: CompletionCallback) {
        debug!("Coordinator::set_completion_callback: called");
        self.runner.set_completion_callback(callback);
    }

    /// Block until the queue and running set are both empty, up to `timeout`
    ///
    /// Returns true if the coordinator drained in time.
    pub fn await_idle(&self, timeout: Duration) -> bool {
        debug!(?timeout, "Coordinator::await_idle: called");
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_idle() {
                debug!("Coordinator::await_idle: drained");
                return true;
            }
            if Instant::now() >= deadline {
                let drained = self.is_idle();
                debug!(%drained, "Coordinator::await_idle: timeout reached");
                return drained;
            }
            std::thread::sleep(AWAIT_POLL);
        }
    }

    /// Check whether nothing is pending, in hand-off, or running
    fn is_idle(&self) -> bool {
        self.queue.is_drained() && self.runner.running_len() == 0
    }

    /// Point-in-time statistics
    pub fn stats(&self) -> GateStats {
        self.counters
            .snapshot(self.queue.len(), self.runner.running_len())
    }

    /// Human-readable report of counters and the running set
    pub fn debug_dump(&self) -> String {
        debug!("Coordinator::debug_dump: called");
        let stats = self.stats();

        let mut out = String::new();
        let _ = writeln!(out, "TaskGate Debug Dump:");
        let _ = writeln!(out, "==================");
        let _ = writeln!(out, "Queued tasks: {}", stats.queued);
        let _ = writeln!(out, "Running tasks: {}", stats.running);
        let _ = writeln!(out, "Completed tasks: {}", stats.completed);
        let _ = writeln!(out, "Failed tasks: {}", stats.failed);
        let _ = writeln!(out, "Cancelled tasks: {}", stats.cancelled);
        let _ = writeln!(out, "Timed-out tasks: {}", stats.timed_out);
        let _ = writeln!(out, "Re-enqueued tasks: {}", stats.re_enqueued);
        let _ = writeln!(out, "Anti-starvation limit: {}", self.anti_starvation_limit());
        let _ = writeln!(out, "==================");
        let _ = writeln!(out, "Running Tasks:");
        for task in self.runner.running_snapshot() {
            let _ = writeln!(
                out,
                "- id: {}, priority: {}, tags: {}",
                task.id(),
                task.priority(),
                task.tags().join(" ")
            );
        }
        out
    }

    /// Stop accepting work, join the workers, and resolve leftovers
    ///
    /// Running tasks drain to completion. Tasks still pending when the queue
    /// stops resolve their handles as cancelled.
    pub fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            debug!("Coordinator::shutdown: already stopping");
            return;
        }
        info!("Coordinator::shutdown: called");

        self.queue.shutdown();
        self.pool.shutdown();

        for task in self.queue.drain_remaining() {
            debug!(id = %task.id(), "Coordinator::shutdown: resolving leftover task as cancelled");
            task.cancel();
            self.runner.admit(&task);
            self.runner.run(task);
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("queued", &self.queue.len())
            .field("running", &self.runner.running_len())
            .field("pool_size", &self.pool.size())
            .field("stopping", &self.stopping.load(Ordering::SeqCst))
            .finish()
    }
}
