//! Observer trait and the panic-swallowing fan-out used by the core

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::domain::Task;

/// Borrowed view of a task handed to observers
#[derive(Debug, Clone, Copy)]
pub struct TaskRef<'a> {
    /// Task id
    pub id: u32,
    /// Task priority
    pub priority: u32,
    /// Tags carried by the task
    pub tags: &'a [String],
}

impl<'a> TaskRef<'a> {
    pub(crate) fn from_task(task: &'a Task) -> Self {
        Self {
            id: task.id(),
            priority: task.priority(),
            tags: task.tags(),
        }
    }
}

/// Receiver of lifecycle notifications from the core
///
/// All methods default to no-ops so consumers only implement the events they
/// care about. Implementations must be panic-tolerant in spirit; the core
/// additionally guards every invocation, so a panicking observer can never
/// unwind into a worker.
pub trait GateObserver: Send + Sync {
    /// A task entered the pending queue
    fn task_queued(&self, task: &TaskRef<'_>) {
        let _ = task;
    }

    /// A task was admitted and its closure is about to run
    fn task_started(&self, task: &TaskRef<'_>, worker_id: u32) {
        let _ = (task, worker_id);
    }

    /// A task's closure returned normally
    fn task_completed(&self, task: &TaskRef<'_>, worker_id: u32, duration: Option<Duration>) {
        let _ = (task, worker_id, duration);
    }

    /// A task's closure failed
    fn task_failed(&self, task: &TaskRef<'_>, worker_id: u32, error: &str) {
        let _ = (task, worker_id, error);
    }

    /// A task short-circuited because it was cancelled
    fn task_cancelled(&self, task: &TaskRef<'_>) {
        let _ = task;
    }

    /// A task short-circuited because its deadline passed
    fn task_timed_out(&self, task: &TaskRef<'_>) {
        let _ = task;
    }

    /// The resolver denied admission over a tag policy
    fn conflict_detected(&self, task: &TaskRef<'_>, reason: &str) {
        let _ = (task, reason);
    }

    /// A blocked task was forced through past the policy check
    fn anti_starvation_applied(&self, task: &TaskRef<'_>, requeue_count: u32) {
        let _ = (task, requeue_count);
    }

    /// A dispatcher found the pending queue empty
    fn scheduler_empty(&self) {}
}

/// Fan-out of registered observers with panic containment
///
/// Each notification is delivered to every registered observer inside a
/// catch frame; a panicking observer is logged and skipped, never propagated.
#[derive(Default)]
pub struct ObserverSet {
    observers: RwLock<Vec<Arc<dyn GateObserver>>>,
}

impl ObserverSet {
    /// Create an empty set
    pub fn new() -> Self {
        debug!("ObserverSet::new: called");
        Self::default()
    }

    /// Register an observer
    pub fn register(&self, observer: Arc<dyn GateObserver>) {
        debug!("ObserverSet::register: called");
        self.observers.write().push(observer);
    }

    /// Remove every registered observer
    pub fn clear(&self) {
        debug!("ObserverSet::clear: called");
        self.observers.write().clear();
    }

    /// Number of registered observers
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Check if no observers are registered
    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn GateObserver>> {
        self.observers.read().clone()
    }

    fn deliver(&self, event: &str, call: impl Fn(&dyn GateObserver)) {
        for observer in self.snapshot() {
            let outcome = catch_unwind(AssertUnwindSafe(|| call(observer.as_ref())));
            if outcome.is_err() {
                warn!(%event, "ObserverSet: observer panicked, notification dropped");
            }
        }
    }

    pub(crate) fn task_queued(&self, task: &Task) {
        let r = TaskRef::from_task(task);
        self.deliver("task_queued", |obs| obs.task_queued(&r));
    }

    pub(crate) fn task_started(&self, task: &Task, worker_id: u32) {
        let r = TaskRef::from_task(task);
        self.deliver("task_started", |obs| obs.task_started(&r, worker_id));
    }

    pub(crate) fn task_completed(&self, task: &Task, worker_id: u32, duration: Option<Duration>) {
        let r = TaskRef::from_task(task);
        self.deliver("task_completed", |obs| {
            obs.task_completed(&r, worker_id, duration);
        });
    }

    pub(crate) fn task_failed(&self, task: &Task, worker_id: u32, error: &str) {
        let r = TaskRef::from_task(task);
        self.deliver("task_failed", |obs| obs.task_failed(&r, worker_id, error));
    }

    pub(crate) fn task_cancelled(&self, task: &Task) {
        let r = TaskRef::from_task(task);
        self.deliver("task_cancelled", |obs| obs.task_cancelled(&r));
    }

    pub(crate) fn task_timed_out(&self, task: &Task) {
        let r = TaskRef::from_task(task);
        self.deliver("task_timed_out", |obs| obs.task_timed_out(&r));
    }

    pub(crate) fn conflict_detected(&self, task: &Task, reason: &str) {
        let r = TaskRef::from_task(task);
        self.deliver("conflict_detected", |obs| obs.conflict_detected(&r, reason));
    }

    pub(crate) fn anti_starvation_applied(&self, task: &Task, requeue_count: u32) {
        let r = TaskRef::from_task(task);
        self.deliver("anti_starvation_applied", |obs| {
            obs.anti_starvation_applied(&r, requeue_count);
        });
    }

    pub(crate) fn scheduler_empty(&self) {
        self.deliver("scheduler_empty", |obs| obs.scheduler_empty());
    }
}

impl std::fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSet")
            .field("observers", &self.len())
            .finish()
    }
}
