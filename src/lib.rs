//! TaskGate - Priority-ordered task coordination on shared resources
//!
//! TaskGate is an in-process coordinator for workloads where independently
//! submitted units of work must be ordered by priority and serialised against
//! one another on shared logical resources. Callers submit a closure together
//! with a priority and a set of string *tags* naming resources, and receive a
//! handle through which they observe completion, retrieve the return value, or
//! propagate a failure.
//!
//! # Core Concepts
//!
//! - **Tags Name Resources**: admission policy is defined per tag
//!   (`Exclusive`, `Shared`, or `Priority`)
//! - **Priority Wins**: pending work is dispatched highest-priority first,
//!   submission order breaking ties
//! - **Nothing Starves**: a task denied admission too many times is forced
//!   through past the policy check
//! - **Failures Are Contained**: a panicking closure resolves its handle with
//!   an error and never takes down a worker
//!
//! # Modules
//!
//! - [`domain`] - Task records, policies, completion handles, execution context
//! - [`scheduler`] - Pending queue, conflict resolver, runner, dispatcher, worker pool
//! - [`coordinator`] - Submission facade, fluent builder, sections, global accessor
//! - [`events`] - Observer protocol, trace log, per-tag metrics
//! - [`config`] - Configuration types

pub mod config;
pub mod coordinator;
pub mod domain;
pub mod events;
pub mod scheduler;

// Re-export commonly used types
pub use config::GateConfig;
pub use coordinator::{
    builder, global, init_global, section, shutdown_global, Coordinator, Section, TaskBuilder,
};
pub use domain::{PolicyTable, TagPolicy, Task, TaskContext, TaskError, TaskHandle};
pub use events::{
    EventKind, GateObserver, MetricsRegistry, TagMetrics, TaskRef, TraceLog, TraceRecord,
};
pub use scheduler::{Dequeue, GateStats, PendingQueue};
