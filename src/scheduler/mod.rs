//! Admission-and-dispatch engine
//!
//! The scheduler is the core of the crate: a priority-ordered pending queue,
//! a conflict resolver that inspects tags against the running set, a runner
//! that executes admitted tasks, a dispatcher serialising admission
//! decisions, and a fixed-size pool of worker threads driving it all.

pub mod dispatcher;
pub mod pool;
pub mod queue;
pub mod resolver;
pub mod runner;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use pool::WorkerPool;
pub use queue::{Counters, Dequeue, GateStats, PendingQueue};
pub use resolver::ConflictResolver;
pub use runner::{CompletionCallback, Runner};
