//! Per-invocation execution context passed to task closures

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

/// A labelled timing span recorded by a closure
#[derive(Debug, Clone)]
pub struct ProfileSpan {
    /// Label supplied by the closure
    pub label: String,
    /// When the span was opened
    pub started_at: Instant,
    /// When the span was closed, if it has been
    pub ended_at: Option<Instant>,
}

impl ProfileSpan {
    /// Elapsed time of a closed span
    pub fn duration(&self) -> Option<Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }
}

/// Execution context handed to a closure for the duration of one invocation
///
/// Carries a worker-local id, the process-wide logical tick assigned at task
/// start, the deadline derived from the task's timeout, and the task's
/// cancellation flag. Closures that want cooperative cancellation poll
/// [`TaskContext::should_continue`].
#[derive(Debug)]
pub struct TaskContext {
    /// Id allocated for this invocation
    worker_id: u32,

    /// Process-wide sequence number assigned at task start
    logical_tick: u64,

    /// Whether timing spans are recorded
    profiling_enabled: bool,

    /// Most recent span opened via start_profiling
    profile: Option<ProfileSpan>,

    /// Absolute deadline copied from the task record
    deadline: Option<Instant>,

    /// Cancellation flag shared with the task record
    cancel_requested: Arc<AtomicBool>,
}

impl TaskContext {
    /// Create a context for one task invocation
    pub(crate) fn new(
        worker_id: u32,
        logical_tick: u64,
        profiling_enabled: bool,
        deadline: Option<Instant>,
        cancel_requested: Arc<AtomicBool>,
    ) -> Self {
        debug!(%worker_id, %logical_tick, %profiling_enabled, "TaskContext::new: called");
        Self {
            worker_id,
            logical_tick,
            profiling_enabled,
            profile: None,
            deadline,
            cancel_requested,
        }
    }

    /// Id allocated for this invocation
    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }

    /// Process-wide sequence number assigned at task start
    pub fn logical_tick(&self) -> u64 {
        self.logical_tick
    }

    /// Whether timing spans are recorded
    pub fn profiling_enabled(&self) -> bool {
        self.profiling_enabled
    }

    /// Open a labelled timing span; a no-op when profiling is disabled
    pub fn start_profiling(&mut self, label: impl Into<String>) {
        if !self.profiling_enabled {
            return;
        }
        let label = label.into();
        debug!(%label, "TaskContext::start_profiling: called");
        self.profile = Some(ProfileSpan {
            label,
            started_at: Instant::now(),
            ended_at: None,
        });
    }

    /// Close the currently open span; a no-op when none is open
    pub fn end_profiling(&mut self) {
        if !self.profiling_enabled {
            return;
        }
        debug!("TaskContext::end_profiling: called");
        if let Some(span) = self.profile.as_mut() {
            span.ended_at = Some(Instant::now());
        }
    }

    /// Most recently recorded span
    pub fn last_profile(&self) -> Option<&ProfileSpan> {
        self.profile.as_ref()
    }

    /// Deadline for this invocation, if the task carries a timeout
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Check whether the deadline has passed
    pub fn deadline_exceeded(&self) -> bool {
        match self.deadline {
            Some(deadline) => Instant::now() > deadline,
            None => false,
        }
    }

    /// Request cooperative cancellation of this task
    pub fn request_cancellation(&self) {
        debug!(worker_id = %self.worker_id, "TaskContext::request_cancellation: called");
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation has been requested
    pub fn cancellation_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Check whether the closure should keep working
    ///
    /// Returns false once cancellation is requested or the deadline has
    /// passed. Long-running closures should poll this.
    pub fn should_continue(&self) -> bool {
        !self.cancellation_requested() && !self.deadline_exceeded()
    }
}
