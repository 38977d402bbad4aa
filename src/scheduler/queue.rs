//! Queue types for the scheduler

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{Task, TaskError};

/// How long a dequeue blocks waiting for work before reporting empty
const DEQUEUE_WAIT: Duration = Duration::from_millis(10);

/// Result of a dequeue attempt
#[derive(Debug)]
pub enum Dequeue {
    /// The best pending task
    Task(Arc<Task>),
    /// Nothing arrived within the bounded wait
    Empty,
    /// The queue has been shut down
    Stopped,
}

/// Heap entry ordering pending tasks by (priority desc, submission seq asc)
///
/// Task ids are assigned monotonically at submission, so the id doubles as
/// the submission-order tiebreak at equal priority.
struct QueueEntry(Arc<Task>);

impl Eq for QueueEntry {}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.id() == other.0.id()
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Higher priority first, then earlier submission
        self.0
            .priority()
            .cmp(&other.0.priority())
            .then_with(|| other.0.id().cmp(&self.0.id()))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct QueueInner {
    heap: BinaryHeap<QueueEntry>,
    stopped: bool,
    /// Tasks popped by a dispatcher but not yet running or re-queued
    in_transit: usize,
}

/// Thread-safe priority-ordered queue of pending tasks
///
/// Unbounded. `dequeue` blocks for a short bounded interval for work to
/// appear; `shutdown` unblocks all waiters and makes later dequeues report
/// [`Dequeue::Stopped`].
pub struct PendingQueue {
    inner: Mutex<QueueInner>,
    cond: Condvar,
}

impl PendingQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        debug!("PendingQueue::new: called");
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                stopped: false,
                in_transit: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Insert a task and wake one waiting consumer
    pub fn enqueue(&self, task: Arc<Task>) -> Result<(), TaskError> {
        debug!(id = %task.id(), priority = %task.priority(), "PendingQueue::enqueue: called");
        {
            let mut inner = self.inner.lock();
            if inner.stopped {
                debug!(id = %task.id(), "PendingQueue::enqueue: queue stopped, rejecting");
                return Err(TaskError::QueueStopped);
            }
            inner.heap.push(QueueEntry(task));
        }
        self.cond.notify_one();
        Ok(())
    }

    /// Pull the best pending task, waiting briefly for work to appear
    pub fn dequeue(&self) -> Dequeue {
        let mut inner = self.inner.lock();
        if inner.stopped {
            return Dequeue::Stopped;
        }
        if inner.heap.is_empty() {
            let _ = self.cond.wait_for(&mut inner, DEQUEUE_WAIT);
            if inner.stopped {
                debug!("PendingQueue::dequeue: stopped while waiting");
                return Dequeue::Stopped;
            }
        }
        match inner.heap.pop() {
            Some(entry) => {
                inner.in_transit += 1;
                debug!(id = %entry.0.id(), remaining = %inner.heap.len(), "PendingQueue::dequeue: task popped");
                Dequeue::Task(entry.0)
            }
            None => Dequeue::Empty,
        }
    }

    /// Mark a previously popped task as placed (running or re-queued)
    ///
    /// Dispatchers call this once the task has landed somewhere visible, so
    /// drain checks never miss a task mid hand-off.
    pub(crate) fn settle(&self) {
        let mut inner = self.inner.lock();
        if inner.in_transit == 0 {
            warn!("PendingQueue::settle: no task was in transit");
            return;
        }
        inner.in_transit -= 1;
    }

    /// Check whether nothing is pending or mid hand-off
    pub fn is_drained(&self) -> bool {
        let inner = self.inner.lock();
        inner.heap.is_empty() && inner.in_transit == 0
    }

    /// Stop the queue, waking all waiters
    pub fn shutdown(&self) {
        debug!("PendingQueue::shutdown: called");
        {
            let mut inner = self.inner.lock();
            inner.stopped = true;
        }
        self.cond.notify_all();
    }

    /// Check whether the queue has been stopped
    pub fn is_stopped(&self) -> bool {
        self.inner.lock().stopped
    }

    /// Remove and return everything still pending
    ///
    /// Used to resolve leftover handles after shutdown.
    pub(crate) fn drain_remaining(&self) -> Vec<Arc<Task>> {
        debug!("PendingQueue::drain_remaining: called");
        let mut inner = self.inner.lock();
        inner.heap.drain().map(|entry| entry.0).collect()
    }

    /// Number of pending tasks
    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    /// Check whether any task is pending
    pub fn has_tasks(&self) -> bool {
        !self.inner.lock().heap.is_empty()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        !self.has_tasks()
    }
}

impl Default for PendingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PendingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PendingQueue")
            .field("len", &inner.heap.len())
            .field("stopped", &inner.stopped)
            .finish()
    }
}

/// Global outcome counters maintained for statistics
#[derive(Debug, Default)]
pub struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    timed_out: AtomicU64,
    re_enqueued: AtomicU64,
}

impl Counters {
    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_re_enqueued(&self) {
        self.re_enqueued.fetch_add(1, Ordering::SeqCst);
    }

    /// Build a stats snapshot given live queue/running figures
    pub fn snapshot(&self, queued: usize, running: usize) -> GateStats {
        GateStats {
            queued,
            running,
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            cancelled: self.cancelled.load(Ordering::SeqCst),
            timed_out: self.timed_out.load(Ordering::SeqCst),
            re_enqueued: self.re_enqueued.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time statistics for the coordinator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStats {
    /// Tasks waiting in the pending queue
    pub queued: usize,
    /// Tasks currently executing
    pub running: usize,
    /// Closures run to completion
    pub completed: u64,
    /// Closures that failed
    pub failed: u64,
    /// Tasks resolved as cancelled
    pub cancelled: u64,
    /// Tasks resolved as timed out
    pub timed_out: u64,
    /// Admission denials that returned a task to the queue
    pub re_enqueued: u64,
}

impl GateStats {
    /// Total resolved tasks regardless of outcome
    pub fn resolved(&self) -> u64 {
        self.completed + self.failed + self.cancelled + self.timed_out
    }
}
