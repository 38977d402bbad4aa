//! The dispatch step: pull, test admission, run or re-queue

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::domain::{Task, TaskId};
use crate::events::ObserverSet;

use super::queue::{Counters, Dequeue, PendingQueue};
use super::resolver::ConflictResolver;
use super::runner::Runner;

/// What one dispatch step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A task was admitted and executed
    Executed,
    /// A task was denied and returned to the queue
    Requeued,
    /// Nothing was pending within the bounded wait
    Idle,
    /// The queue has been shut down
    Stopped,
}

/// Per-dispatcher mutable state, held under the dispatch lock
struct DispatchState {
    /// Re-queue counts for currently blocked tasks, keyed by task id.
    /// Entries are created on first denial and erased on admission.
    starvation: HashMap<TaskId, u32>,
}

/// Pulls the best pending task and decides its fate
///
/// The admission test and the following state transition (start running or
/// re-enqueue) happen under a single dispatch lock so two workers can never
/// both admit mutually exclusive tasks on the same tag. Closure execution
/// happens after the lock is released.
pub struct Dispatcher {
    queue: Arc<PendingQueue>,
    resolver: Arc<ConflictResolver>,
    runner: Arc<Runner>,
    observers: Arc<ObserverSet>,
    counters: Arc<Counters>,
    state: Mutex<DispatchState>,
    anti_starvation_limit: AtomicU32,
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(
        queue: Arc<PendingQueue>,
        resolver: Arc<ConflictResolver>,
        runner: Arc<Runner>,
        observers: Arc<ObserverSet>,
        counters: Arc<Counters>,
        anti_starvation_limit: u32,
    ) -> Self {
        debug!(%anti_starvation_limit, "Dispatcher::new: called");
        Self {
            queue,
            resolver,
            runner,
            observers,
            counters,
            state: Mutex::new(DispatchState {
                starvation: HashMap::new(),
            }),
            anti_starvation_limit: AtomicU32::new(anti_starvation_limit.max(1)),
        }
    }

    /// Re-queue count after which a blocked task is forced through
    pub fn anti_starvation_limit(&self) -> u32 {
        self.anti_starvation_limit.load(Ordering::SeqCst)
    }

    /// Replace the anti-starvation limit (clamped to at least 1)
    pub fn set_anti_starvation_limit(&self, limit: u32) {
        debug!(%limit, "Dispatcher::set_anti_starvation_limit: called");
        self.anti_starvation_limit.store(limit.max(1), Ordering::SeqCst);
    }

    /// Number of tasks currently tracked as blocked
    pub fn blocked_len(&self) -> usize {
        self.state.lock().starvation.len()
    }

    /// Execute one dispatch step
    pub fn dispatch_next(&self) -> DispatchOutcome {
        let task = match self.queue.dequeue() {
            Dequeue::Stopped => {
                debug!("Dispatcher::dispatch_next: queue stopped");
                return DispatchOutcome::Stopped;
            }
            Dequeue::Empty => {
                self.observers.scheduler_empty();
                return DispatchOutcome::Idle;
            }
            Dequeue::Task(task) => task,
        };

        // Admission test and state transition are serialised under the
        // dispatch lock; only the closure itself runs outside it.
        let admitted = {
            let mut state = self.state.lock();
            let running = self.runner.running_snapshot();

            if self.resolver.can_execute(&task, &running) {
                state.starvation.remove(&task.id());
                self.runner.admit(&task);
                true
            } else {
                task.increment_requeue();
                let count = {
                    let entry = state.starvation.entry(task.id()).or_insert(0);
                    *entry += 1;
                    *entry
                };
                self.counters.record_re_enqueued();

                if count > self.anti_starvation_limit() {
                    debug!(id = %task.id(), %count, "Dispatcher::dispatch_next: forcing blocked task through");
                    state.starvation.remove(&task.id());
                    self.observers.anti_starvation_applied(&task, count);
                    self.runner.admit(&task);
                    true
                } else {
                    false
                }
            }
        };

        if admitted {
            debug!(id = %task.id(), "Dispatcher::dispatch_next: admitted");
            // The task is in the running set; the hand-off window is over
            self.queue.settle();
            self.runner.run(task);
            DispatchOutcome::Executed
        } else {
            debug!(id = %task.id(), "Dispatcher::dispatch_next: denied, re-queueing");
            if self.queue.enqueue(task.clone()).is_err() {
                // The queue stopped underneath a denied task. Resolve the
                // handle rather than dropping it on the floor.
                warn!(id = %task.id(), "Dispatcher::dispatch_next: queue stopped during re-enqueue, cancelling task");
                task.cancel();
                self.runner.admit(&task);
                self.queue.settle();
                self.runner.run(task);
                return DispatchOutcome::Executed;
            }
            self.queue.settle();
            std::thread::yield_now();
            DispatchOutcome::Requeued
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("blocked", &self.blocked_len())
            .field("anti_starvation_limit", &self.anti_starvation_limit())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::handle::Slot;
    use crate::domain::task::erase;
    use crate::domain::{TagPolicy, TaskContext, TaskHandle};
    use crate::events::{GateObserver, TaskRef};
    use std::sync::atomic::AtomicU32 as TestCounter;

    struct Fixture {
        queue: Arc<PendingQueue>,
        resolver: Arc<ConflictResolver>,
        runner: Arc<Runner>,
        dispatcher: Dispatcher,
        observers: Arc<ObserverSet>,
        counters: Arc<Counters>,
    }

    fn fixture(limit: u32) -> Fixture {
        let observers = Arc::new(ObserverSet::new());
        let counters = Arc::new(Counters::default());
        let queue = Arc::new(PendingQueue::new());
        let resolver = Arc::new(ConflictResolver::new(TagPolicy::Shared, observers.clone()));
        let runner = Arc::new(Runner::new(observers.clone(), counters.clone(), false));
        let dispatcher = Dispatcher::new(
            queue.clone(),
            resolver.clone(),
            runner.clone(),
            observers.clone(),
            counters.clone(),
            limit,
        );
        Fixture {
            queue,
            resolver,
            runner,
            dispatcher,
            observers,
            counters,
        }
    }

    fn make_task<T: Send + 'static>(
        id: u32,
        priority: u32,
        tags: &[&str],
        func: impl FnOnce(&mut TaskContext) -> T + Send + 'static,
    ) -> (Arc<Task>, TaskHandle<T>) {
        let slot = Slot::new();
        let mut task = Task::new(id, erase(func, slot.clone()), priority);
        for tag in tags {
            task.add_tag(*tag);
        }
        let handle = TaskHandle::new(id, slot, task.cancel_flag());
        (Arc::new(task), handle)
    }

    #[test]
    fn test_dispatch_runs_admitted_task() {
        let f = fixture(10);
        let (task, handle) = make_task(1, 0, &[], |_| 11);
        f.queue.enqueue(task).unwrap();

        assert_eq!(f.dispatcher.dispatch_next(), DispatchOutcome::Executed);
        assert_eq!(handle.recv(), Ok(11));
        assert_eq!(f.runner.running_len(), 0);
    }

    #[test]
    fn test_empty_queue_is_idle() {
        let f = fixture(10);
        assert_eq!(f.dispatcher.dispatch_next(), DispatchOutcome::Idle);
    }

    #[test]
    fn test_stopped_queue_reports_stopped() {
        let f = fixture(10);
        f.queue.shutdown();
        assert_eq!(f.dispatcher.dispatch_next(), DispatchOutcome::Stopped);
    }

    #[test]
    fn test_denied_task_is_requeued_with_accounting() {
        let f = fixture(10);
        f.resolver.set_policy("r", TagPolicy::Exclusive);

        // Simulate a long-running occupant of the tag
        let (occupant, _h) = make_task(1, 0, &["r"], |_| ());
        f.runner.admit(&occupant);

        let (blocked, _h2) = make_task(2, 0, &["r"], |_| ());
        f.queue.enqueue(blocked.clone()).unwrap();

        assert_eq!(f.dispatcher.dispatch_next(), DispatchOutcome::Requeued);
        assert_eq!(blocked.requeue_count(), 1);
        assert_eq!(f.dispatcher.blocked_len(), 1);
        assert_eq!(f.counters.snapshot(0, 0).re_enqueued, 1);
        assert!(f.queue.has_tasks());
    }

    #[test]
    fn test_anti_starvation_forces_admission() {
        #[derive(Default)]
        struct Forced(TestCounter);

        impl GateObserver for Forced {
            fn anti_starvation_applied(&self, _task: &TaskRef<'_>, requeue_count: u32) {
                assert!(requeue_count > 2);
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let f = fixture(2);
        let forced = Arc::new(Forced::default());
        f.observers.register(forced.clone());
        f.resolver.set_policy("r", TagPolicy::Exclusive);

        let (occupant, _h) = make_task(1, 0, &["r"], |_| ());
        f.runner.admit(&occupant);

        let (blocked, handle) = make_task(2, 0, &["r"], |_| 5);
        f.queue.enqueue(blocked.clone()).unwrap();

        // Limit 2: two denials re-queue, the third pass forces it through
        assert_eq!(f.dispatcher.dispatch_next(), DispatchOutcome::Requeued);
        assert_eq!(f.dispatcher.dispatch_next(), DispatchOutcome::Requeued);
        assert_eq!(f.dispatcher.dispatch_next(), DispatchOutcome::Executed);

        assert_eq!(handle.recv(), Ok(5));
        assert_eq!(forced.0.load(Ordering::SeqCst), 1);
        assert_eq!(f.dispatcher.blocked_len(), 0);
    }

    #[test]
    fn test_admission_clears_starvation_entry() {
        let f = fixture(10);
        f.resolver.set_policy("r", TagPolicy::Exclusive);

        let (occupant, _h) = make_task(1, 0, &["r"], |_| ());
        f.runner.admit(&occupant);

        let (blocked, handle) = make_task(2, 0, &["r"], |_| ());
        f.queue.enqueue(blocked).unwrap();
        assert_eq!(f.dispatcher.dispatch_next(), DispatchOutcome::Requeued);
        assert_eq!(f.dispatcher.blocked_len(), 1);

        // Occupant leaves; next pass admits and clears the entry
        f.runner.run(occupant);
        assert_eq!(f.dispatcher.dispatch_next(), DispatchOutcome::Executed);
        assert_eq!(f.dispatcher.blocked_len(), 0);
        assert!(handle.recv().is_ok());
    }

    #[test]
    fn test_cancelled_task_still_dispatches_and_short_circuits() {
        let f = fixture(10);
        let (task, handle) = make_task(1, 0, &[], |_| 1);
        task.cancel();
        f.queue.enqueue(task).unwrap();

        assert_eq!(f.dispatcher.dispatch_next(), DispatchOutcome::Executed);
        assert_eq!(handle.recv(), Err(crate::domain::TaskError::Cancelled));
    }
}
