//! Per-tag metrics aggregation with JSON and Prometheus renderings

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::observer::{GateObserver, TaskRef};

/// Aggregated counters and timings for one tag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagMetrics {
    /// Tag these metrics belong to
    pub tag: String,
    /// Priority most recently seen on the tag
    pub priority: u32,
    /// Closures run to completion
    pub execution_count: u64,
    /// Total measured execution time in microseconds
    pub total_time_us: u64,
    /// Shortest measured execution in microseconds
    pub min_time_us: u64,
    /// Longest measured execution in microseconds
    pub max_time_us: u64,
    /// Tasks queued
    pub queued_count: u64,
    /// Tasks resolved as cancelled
    pub cancelled_count: u64,
    /// Tasks resolved as timed out
    pub timed_out_count: u64,
    /// Tasks resolved as failed
    pub failed_count: u64,
    /// Admission denials (each denial sends the task back to the queue)
    pub re_enqueued_count: u64,
}

impl TagMetrics {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            priority: 0,
            execution_count: 0,
            total_time_us: 0,
            min_time_us: 0,
            max_time_us: 0,
            queued_count: 0,
            cancelled_count: 0,
            timed_out_count: 0,
            failed_count: 0,
            re_enqueued_count: 0,
        }
    }

    /// Average measured execution time in microseconds
    pub fn avg_time_us(&self) -> u64 {
        if self.execution_count == 0 {
            0
        } else {
            self.total_time_us / self.execution_count
        }
    }

    fn record_execution(&mut self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.total_time_us += us;
        if self.execution_count == 0 || us < self.min_time_us {
            self.min_time_us = us;
        }
        if us > self.max_time_us {
            self.max_time_us = us;
        }
    }
}

/// Per-tag metrics registry
///
/// Register a `MetricsRegistry` as an observer to aggregate lifecycle counts
/// and execution timings per tag. Untagged tasks are not aggregated.
#[derive(Default)]
pub struct MetricsRegistry {
    metrics: RwLock<HashMap<String, TagMetrics>>,
    enabled: AtomicBool,
}

impl MetricsRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        debug!("MetricsRegistry::new: called");
        Self {
            metrics: RwLock::new(HashMap::new()),
            enabled: AtomicBool::new(true),
        }
    }

    /// Check whether aggregation is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enable or disable aggregation
    pub fn set_enabled(&self, enabled: bool) {
        debug!(%enabled, "MetricsRegistry::set_enabled: called");
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Snapshot of all per-tag metrics
    pub fn snapshot(&self) -> Vec<TagMetrics> {
        let metrics = self.metrics.read();
        let mut all: Vec<TagMetrics> = metrics.values().cloned().collect();
        all.sort_by(|a, b| a.tag.cmp(&b.tag));
        all
    }

    /// Metrics for a single tag
    pub fn for_tag(&self, tag: &str) -> Option<TagMetrics> {
        self.metrics.read().get(tag).cloned()
    }

    /// Drop all aggregated metrics
    pub fn reset(&self) {
        debug!("MetricsRegistry::reset: called");
        self.metrics.write().clear();
    }

    /// Render all metrics as a JSON document keyed by tag
    pub fn to_json(&self) -> serde_json::Result<String> {
        debug!("MetricsRegistry::to_json: called");
        #[derive(Serialize)]
        struct Export {
            metrics: Vec<TagMetrics>,
        }
        serde_json::to_string(&Export {
            metrics: self.snapshot(),
        })
    }

    /// Render all metrics in the Prometheus exposition format
    pub fn to_prometheus(&self) -> String {
        debug!("MetricsRegistry::to_prometheus: called");
        let mut out = String::new();
        for m in self.snapshot() {
            let labels = format!("tag=\"{}\",priority=\"{}\"", m.tag, m.priority);
            out.push_str(&format!(
                "taskgate_task_execution_count{{{}}} {}\n",
                labels, m.execution_count
            ));
            out.push_str(&format!(
                "taskgate_task_total_time_us{{{}}} {}\n",
                labels, m.total_time_us
            ));
            out.push_str(&format!(
                "taskgate_task_min_time_us{{{}}} {}\n",
                labels, m.min_time_us
            ));
            out.push_str(&format!(
                "taskgate_task_max_time_us{{{}}} {}\n",
                labels, m.max_time_us
            ));
            out.push_str(&format!(
                "taskgate_task_avg_time_us{{{}}} {}\n",
                labels,
                m.avg_time_us()
            ));
            out.push_str(&format!(
                "taskgate_task_queued_count{{{}}} {}\n",
                labels, m.queued_count
            ));
            out.push_str(&format!(
                "taskgate_task_cancelled_count{{{}}} {}\n",
                labels, m.cancelled_count
            ));
            out.push_str(&format!(
                "taskgate_task_timed_out_count{{{}}} {}\n",
                labels, m.timed_out_count
            ));
            out.push_str(&format!(
                "taskgate_task_failed_count{{{}}} {}\n",
                labels, m.failed_count
            ));
            out.push_str(&format!(
                "taskgate_task_reenqueued_count{{{}}} {}\n",
                labels, m.re_enqueued_count
            ));
        }
        out
    }

    fn update(&self, task: &TaskRef<'_>, apply: impl Fn(&mut TagMetrics)) {
        if !self.is_enabled() {
            return;
        }
        let mut metrics = self.metrics.write();
        for tag in task.tags {
            let entry = metrics
                .entry(tag.clone())
                .or_insert_with(|| TagMetrics::new(tag));
            entry.priority = task.priority;
            apply(entry);
        }
    }
}

impl GateObserver for MetricsRegistry {
    fn task_queued(&self, task: &TaskRef<'_>) {
        self.update(task, |m| m.queued_count += 1);
    }

    fn task_completed(&self, task: &TaskRef<'_>, _worker_id: u32, duration: Option<Duration>) {
        self.update(task, |m| {
            if let Some(duration) = duration {
                m.record_execution(duration);
            }
            m.execution_count += 1;
        });
    }

    fn task_failed(&self, task: &TaskRef<'_>, _worker_id: u32, _error: &str) {
        self.update(task, |m| m.failed_count += 1);
    }

    fn task_cancelled(&self, task: &TaskRef<'_>) {
        self.update(task, |m| m.cancelled_count += 1);
    }

    fn task_timed_out(&self, task: &TaskRef<'_>) {
        self.update(task, |m| m.timed_out_count += 1);
    }

    fn conflict_detected(&self, task: &TaskRef<'_>, _reason: &str) {
        self.update(task, |m| m.re_enqueued_count += 1);
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("tags", &self.metrics.read().len())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
