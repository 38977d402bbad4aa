//! Observer protocol and its built-in consumers
//!
//! Every lifecycle point in the core notifies registered observers. The two
//! consumers shipped here record structured events (the trace log) and
//! aggregate per-tag counters (the metrics registry); both are optional and
//! purely out-of-band.

pub mod metrics;
pub mod observer;
pub mod tracer;
pub mod types;

pub use metrics::{MetricsRegistry, TagMetrics};
pub use observer::{GateObserver, ObserverSet, TaskRef};
pub use tracer::TraceLog;
pub use types::{EventKind, TraceRecord};
