//! One-shot completion handles for submitted tasks

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use super::error::TaskError;
use super::task::TaskId;

/// Internal state of a completion slot
enum SlotState<T> {
    /// No outcome yet
    Pending,
    /// Outcome waiting to be read
    Ready(Result<T, TaskError>),
    /// Outcome already handed to a reader
    Consumed,
}

/// Single-writer single-reader completion slot
///
/// The writer side lives inside the erased job closure; the reader side is
/// the [`TaskHandle`]. The slot resolves exactly once.
pub(crate) struct Slot<T> {
    state: Mutex<SlotState<T>>,
    cond: Condvar,
}

impl<T> Slot<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState::Pending),
            cond: Condvar::new(),
        })
    }

    /// Resolve the slot; a second resolution is ignored with a warning
    pub(crate) fn resolve(&self, outcome: Result<T, TaskError>) {
        let mut state = self.state.lock();
        match *state {
            SlotState::Pending => {
                *state = SlotState::Ready(outcome);
                self.cond.notify_all();
            }
            _ => {
                warn!("Slot::resolve: slot already resolved, dropping outcome");
            }
        }
    }
}

/// Move a ready outcome out of the slot, marking it consumed
fn take_ready<T>(state: &mut SlotState<T>) -> Option<Result<T, TaskError>> {
    if !matches!(state, SlotState::Ready(_)) {
        return None;
    }
    match std::mem::replace(state, SlotState::Consumed) {
        SlotState::Ready(outcome) => Some(outcome),
        _ => None,
    }
}

/// Handle through which a submitter observes one task's completion
///
/// The outcome is readable exactly once: the first successful read consumes
/// it, and every later read returns [`TaskError::AlreadyConsumed`]. The
/// handle also carries the task's cancellation flag, so a submitter can
/// request cancellation without holding the task record.
pub struct TaskHandle<T> {
    /// Id of the task this handle belongs to
    id: TaskId,

    /// Shared completion slot
    slot: Arc<Slot<T>>,

    /// Cancellation flag shared with the task record
    cancelled: Arc<AtomicBool>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(id: TaskId, slot: Arc<Slot<T>>, cancelled: Arc<AtomicBool>) -> Self {
        debug!(%id, "TaskHandle::new: called");
        Self {
            id,
            slot,
            cancelled,
        }
    }

    /// Id of the task this handle belongs to
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Request cancellation of the task; idempotent
    ///
    /// A task cancelled before it runs resolves as cancelled; a running task
    /// only stops early if its closure polls for cancellation.
    pub fn cancel(&self) {
        debug!(id = %self.id, "TaskHandle::cancel: called");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Check whether an outcome is waiting without consuming it
    pub fn is_ready(&self) -> bool {
        let state = self.slot.state.lock();
        matches!(*state, SlotState::Ready(_))
    }

    /// Block until the task resolves and consume the outcome
    pub fn recv(&self) -> Result<T, TaskError> {
        debug!(id = %self.id, "TaskHandle::recv: called");
        let mut state = self.slot.state.lock();
        loop {
            if let Some(outcome) = take_ready(&mut state) {
                debug!(id = %self.id, "TaskHandle::recv: outcome consumed");
                return outcome;
            }
            if matches!(*state, SlotState::Consumed) {
                debug!(id = %self.id, "TaskHandle::recv: already consumed");
                return Err(TaskError::AlreadyConsumed);
            }
            self.slot.cond.wait(&mut state);
        }
    }

    /// Block up to `timeout` for the task to resolve
    ///
    /// Returns None if the task has not resolved in time; the outcome stays
    /// in the slot for a later read.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Result<T, TaskError>> {
        debug!(id = %self.id, ?timeout, "TaskHandle::recv_timeout: called");
        let deadline = Instant::now() + timeout;
        let mut state = self.slot.state.lock();
        loop {
            if let Some(outcome) = take_ready(&mut state) {
                return Some(outcome);
            }
            if matches!(*state, SlotState::Consumed) {
                return Some(Err(TaskError::AlreadyConsumed));
            }
            if self.slot.cond.wait_until(&mut state, deadline).timed_out() {
                debug!(id = %self.id, "TaskHandle::recv_timeout: timed out waiting");
                return take_ready(&mut state);
            }
        }
    }

    /// Consume the outcome if it is already available
    pub fn try_recv(&self) -> Option<Result<T, TaskError>> {
        debug!(id = %self.id, "TaskHandle::try_recv: called");
        let mut state = self.slot.state.lock();
        if matches!(*state, SlotState::Consumed) {
            return Some(Err(TaskError::AlreadyConsumed));
        }
        take_ready(&mut state)
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn handle_for<T>(slot: &Arc<Slot<T>>) -> TaskHandle<T> {
        TaskHandle::new(1, slot.clone(), Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_recv_returns_value() {
        let slot = Slot::new();
        let handle = handle_for(&slot);

        slot.resolve(Ok(42));
        assert_eq!(handle.recv(), Ok(42));
    }

    #[test]
    fn test_second_recv_fails_already_consumed() {
        let slot = Slot::new();
        let handle = handle_for(&slot);

        slot.resolve(Ok(7));
        assert_eq!(handle.recv(), Ok(7));
        assert_eq!(handle.recv(), Err::<i32, _>(TaskError::AlreadyConsumed));
    }

    #[test]
    fn test_recv_propagates_failure() {
        let slot = Slot::new();
        let handle: TaskHandle<()> = handle_for(&slot);

        slot.resolve(Err(TaskError::ClosureFailed {
            description: "boom".to_string(),
        }));
        assert_eq!(
            handle.recv(),
            Err(TaskError::ClosureFailed {
                description: "boom".to_string()
            })
        );
    }

    #[test]
    fn test_recv_blocks_until_resolved() {
        let slot = Slot::new();
        let handle = handle_for(&slot);

        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            slot.resolve(Ok("done"));
        });

        assert_eq!(handle.recv(), Ok("done"));
        writer.join().unwrap();
    }

    #[test]
    fn test_recv_timeout_returns_none_when_pending() {
        let slot: Arc<Slot<i32>> = Slot::new();
        let handle = handle_for(&slot);

        assert!(handle.recv_timeout(Duration::from_millis(10)).is_none());

        // Outcome still arrives afterwards
        slot.resolve(Ok(5));
        assert_eq!(handle.recv(), Ok(5));
    }

    #[test]
    fn test_try_recv() {
        let slot = Slot::new();
        let handle = handle_for(&slot);

        assert!(handle.try_recv().is_none());
        slot.resolve(Ok(1));
        assert!(handle.is_ready());
        assert_eq!(handle.try_recv(), Some(Ok(1)));
        assert_eq!(handle.try_recv(), Some(Err(TaskError::AlreadyConsumed)));
    }

    #[test]
    fn test_double_resolve_keeps_first_outcome() {
        let slot = Slot::new();
        let handle = handle_for(&slot);

        slot.resolve(Ok(1));
        slot.resolve(Ok(2));
        assert_eq!(handle.recv(), Ok(1));
    }
}
