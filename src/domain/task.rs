//! Task records: immutable-after-submission descriptors of submitted work

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::context::TaskContext;
use super::error::TaskError;
use super::handle::Slot;

/// Process-unique task identity, assigned monotonically at submission
pub type TaskId = u32;

/// How one invocation of a task's job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecStatus {
    /// The closure ran to completion
    Completed,
    /// The closure panicked; the payload is described here
    Failed(String),
    /// The task was cancelled before the closure ran
    Cancelled,
    /// The task's deadline passed before the closure ran
    TimedOut,
}

/// Type-erased job stored on a task record
///
/// The job owns the typed completion slot: it resolves the handle itself and
/// reports back only how the invocation ended.
pub(crate) type Job = Box<dyn FnOnce(&mut TaskContext) -> ExecStatus + Send>;

/// Resolves the completion handle with a failure when the job cannot run
pub(crate) type FailHook = Box<dyn FnOnce(TaskError) + Send>;

/// The two erased halves of a submission
///
/// `run` executes the closure and resolves the handle with its outcome;
/// `fail` resolves the handle directly for paths where the job is gone.
/// Both share the same one-shot slot, so whichever fires second is a logged
/// no-op.
pub(crate) struct ErasedJob {
    run: Job,
    fail: FailHook,
}

/// Describe a panic payload for error reporting
fn panic_description(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Erase a typed closure into a [`Job`] bound to a completion slot
///
/// The job short-circuits to a cancelled/timed-out resolution when the
/// context says so, and contains panics by resolving the slot with the
/// captured description.
pub(crate) fn erase<T, F>(func: F, slot: Arc<Slot<T>>) -> ErasedJob
where
    F: FnOnce(&mut TaskContext) -> T + Send + 'static,
    T: Send + 'static,
{
    let fail_slot = slot.clone();
    let run: Job = Box::new(move |ctx: &mut TaskContext| {
        if ctx.cancellation_requested() {
            debug!("erase: cancellation observed, short-circuiting");
            slot.resolve(Err(TaskError::Cancelled));
            return ExecStatus::Cancelled;
        }
        if ctx.deadline_exceeded() {
            debug!("erase: deadline passed, short-circuiting");
            slot.resolve(Err(TaskError::TimedOut));
            return ExecStatus::TimedOut;
        }

        match catch_unwind(AssertUnwindSafe(|| func(ctx))) {
            Ok(value) => {
                slot.resolve(Ok(value));
                ExecStatus::Completed
            }
            Err(payload) => {
                let description = panic_description(payload.as_ref());
                debug!(%description, "erase: closure panicked");
                slot.resolve(Err(TaskError::ClosureFailed {
                    description: description.clone(),
                }));
                ExecStatus::Failed(description)
            }
        }
    });

    let fail: FailHook = Box::new(move |error: TaskError| {
        fail_slot.resolve(Err(error));
    });

    ErasedJob { run, fail }
}

/// A submitted unit of work
///
/// Identity, priority, tags, and the stored closure are fixed at submission;
/// only the cancellation flag, the deadline, and the re-queue counter mutate
/// afterwards.
pub struct Task {
    /// Process-unique id
    id: TaskId,

    /// The erased closure, taken exactly once at execution
    job: Mutex<Option<Job>>,

    /// Resolves the handle when the job cannot run, taken at most once
    fail_hook: Mutex<Option<FailHook>>,

    /// Larger numbers dispatch first
    priority: u32,

    /// Ordered tag list; duplicates are coalesced on insert
    tags: Vec<String>,

    /// Monotonic submission time
    submitted_at: Instant,

    /// Set by cancel(); observed at execute time and by contexts
    cancelled: Arc<AtomicBool>,

    /// Absolute deadline derived from an optional timeout
    deadline: Mutex<Option<Instant>>,

    /// Times this task has been returned to the pending queue
    requeue_count: AtomicU32,
}

impl Task {
    /// Create a task record around an erased job
    pub(crate) fn new(id: TaskId, job: ErasedJob, priority: u32) -> Self {
        debug!(%id, %priority, "Task::new: called");
        Self {
            id,
            job: Mutex::new(Some(job.run)),
            fail_hook: Mutex::new(Some(job.fail)),
            priority,
            tags: Vec::new(),
            submitted_at: Instant::now(),
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Mutex::new(None),
            requeue_count: AtomicU32::new(0),
        }
    }

    /// Append a tag, silently coalescing duplicates
    pub(crate) fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    /// Process-unique id
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Scheduling priority; larger is more important
    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Tag list in insertion order
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Check whether the task carries a tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Monotonic submission time
    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    /// Request cancellation; idempotent
    pub fn cancel(&self) {
        debug!(id = %self.id, "Task::cancel: called");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Shared cancellation flag, for wiring into an execution context
    pub(crate) fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// Install a deadline `timeout` from now; a zero timeout clears it
    pub fn set_timeout(&self, timeout: Duration) {
        debug!(id = %self.id, ?timeout, "Task::set_timeout: called");
        let mut deadline = self.deadline.lock();
        if timeout.is_zero() {
            *deadline = None;
        } else {
            *deadline = Some(Instant::now() + timeout);
        }
    }

    /// Absolute deadline, if one is installed
    pub fn deadline(&self) -> Option<Instant> {
        *self.deadline.lock()
    }

    /// Check whether the deadline has passed
    pub fn is_timed_out(&self) -> bool {
        match *self.deadline.lock() {
            Some(deadline) => Instant::now() > deadline,
            None => false,
        }
    }

    /// Bump the re-queue counter, returning the new value
    pub(crate) fn increment_requeue(&self) -> u32 {
        self.requeue_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Times this task has been returned to the pending queue
    pub fn requeue_count(&self) -> u32 {
        self.requeue_count.load(Ordering::SeqCst)
    }

    /// Resolve the completion handle with a failure without running the job
    ///
    /// Safety valve for paths where the job is gone. Resolving a handle that
    /// already carries an outcome is a logged no-op, so this can never
    /// overwrite a real result.
    pub(crate) fn resolve_failed(&self, error: TaskError) {
        debug!(id = %self.id, %error, "Task::resolve_failed: called");
        let hook = self.fail_hook.lock().take();
        match hook {
            Some(hook) => hook(error),
            None => {
                warn!(id = %self.id, "Task::resolve_failed: fail hook already consumed");
            }
        }
    }

    /// Run the stored job exactly once
    ///
    /// Returns None if the job was already taken; the dispatcher never offers
    /// the same record twice, so that indicates a caller bug.
    pub(crate) fn execute(&self, ctx: &mut TaskContext) -> Option<ExecStatus> {
        debug!(id = %self.id, "Task::execute: called");
        let job = self.job.lock().take();
        match job {
            Some(job) => Some(job(ctx)),
            None => {
                warn!(id = %self.id, "Task::execute: job already consumed");
                None
            }
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("tags", &self.tags)
            .field("cancelled", &self.is_cancelled())
            .field("requeue_count", &self.requeue_count())
            .finish()
    }
}
