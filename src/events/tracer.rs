//! In-memory trace log with JSON export

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use super::observer::{GateObserver, TaskRef};
use super::types::{EventKind, TraceRecord};

/// Default number of retained records
pub const DEFAULT_TRACE_CAPACITY: usize = 1000;

struct TraceInner {
    records: VecDeque<TraceRecord>,
    capacity: usize,
}

/// Bounded ring of lifecycle events
///
/// Register a `TraceLog` as an observer to capture structured records of
/// everything the coordinator does. The oldest records are evicted once the
/// capacity is reached.
pub struct TraceLog {
    inner: Mutex<TraceInner>,
    started: Instant,
    enabled: AtomicBool,
}

#[derive(Serialize)]
struct TraceExport<'a> {
    events: &'a [TraceRecord],
}

impl TraceLog {
    /// Create a log with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TRACE_CAPACITY)
    }

    /// Create a log retaining at most `capacity` records
    pub fn with_capacity(capacity: usize) -> Self {
        debug!(%capacity, "TraceLog::with_capacity: called");
        Self {
            inner: Mutex::new(TraceInner {
                records: VecDeque::new(),
                capacity: capacity.max(1),
            }),
            started: Instant::now(),
            enabled: AtomicBool::new(true),
        }
    }

    /// Check whether recording is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enable or disable recording
    pub fn set_enabled(&self, enabled: bool) {
        debug!(%enabled, "TraceLog::set_enabled: called");
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Change the retention capacity, evicting oldest records if needed
    pub fn set_capacity(&self, capacity: usize) {
        debug!(%capacity, "TraceLog::set_capacity: called");
        let mut inner = self.inner.lock();
        inner.capacity = capacity.max(1);
        while inner.records.len() > inner.capacity {
            inner.records.pop_front();
        }
    }

    /// Snapshot of the retained records, oldest first
    pub fn events(&self) -> Vec<TraceRecord> {
        self.inner.lock().records.iter().cloned().collect()
    }

    /// Number of retained records
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Check if no records are retained
    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }

    /// Drop all retained records
    pub fn clear(&self) {
        debug!("TraceLog::clear: called");
        self.inner.lock().records.clear();
    }

    /// Render the retained records as a JSON document
    pub fn to_json(&self) -> serde_json::Result<String> {
        debug!("TraceLog::to_json: called");
        let events = self.events();
        serde_json::to_string(&TraceExport { events: &events })
    }

    /// Write the JSON document to a file
    pub fn export_json(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        debug!(path = %path.as_ref().display(), "TraceLog::export_json: called");
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    fn record(
        &self,
        kind: EventKind,
        description: String,
        task: Option<&TaskRef<'_>>,
        worker_id: Option<u32>,
    ) {
        if !self.is_enabled() {
            return;
        }

        let record = TraceRecord {
            kind,
            timestamp: Utc::now(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            description,
            task_id: task.map(|t| t.id),
            worker_id,
            tags: task.map(|t| t.tags.to_vec()).unwrap_or_default(),
            priority: task.map(|t| t.priority).unwrap_or(0),
        };

        let mut inner = self.inner.lock();
        if inner.records.len() >= inner.capacity {
            inner.records.pop_front();
        }
        inner.records.push_back(record);
    }
}

impl Default for TraceLog {
    fn default() -> Self {
        Self::new()
    }
}

impl GateObserver for TraceLog {
    fn task_queued(&self, task: &TaskRef<'_>) {
        self.record(EventKind::TaskQueued, "Task queued".to_string(), Some(task), None);
    }

    fn task_started(&self, task: &TaskRef<'_>, worker_id: u32) {
        self.record(
            EventKind::TaskStarted,
            "Task started".to_string(),
            Some(task),
            Some(worker_id),
        );
    }

    fn task_completed(&self, task: &TaskRef<'_>, worker_id: u32, duration: Option<Duration>) {
        let description = match duration {
            Some(duration) => format!("Task completed (duration: {} us)", duration.as_micros()),
            None => "Task completed".to_string(),
        };
        self.record(EventKind::TaskCompleted, description, Some(task), Some(worker_id));
    }

    fn task_failed(&self, task: &TaskRef<'_>, worker_id: u32, error: &str) {
        self.record(
            EventKind::TaskFailed,
            format!("Task failed: {}", error),
            Some(task),
            Some(worker_id),
        );
    }

    fn task_cancelled(&self, task: &TaskRef<'_>) {
        self.record(EventKind::TaskCancelled, "Task cancelled".to_string(), Some(task), None);
    }

    fn task_timed_out(&self, task: &TaskRef<'_>) {
        self.record(EventKind::TaskTimedOut, "Task timed out".to_string(), Some(task), None);
    }

    fn conflict_detected(&self, task: &TaskRef<'_>, reason: &str) {
        self.record(
            EventKind::ConflictDetected,
            format!("Conflict detected: {}", reason),
            Some(task),
            None,
        );
    }

    fn anti_starvation_applied(&self, task: &TaskRef<'_>, requeue_count: u32) {
        self.record(
            EventKind::AntiStarvationApplied,
            format!("Anti-starvation applied after {} re-enqueues", requeue_count),
            Some(task),
            None,
        );
    }

    fn scheduler_empty(&self) {
        self.record(
            EventKind::SchedulerEmpty,
            "Scheduler queue empty".to_string(),
            None,
            None,
        );
    }
}

impl std::fmt::Debug for TraceLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceLog")
            .field("len", &self.len())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_ref<'a>(id: u32, priority: u32, tags: &'a [String]) -> TaskRef<'a> {
        TaskRef { id, priority, tags }
    }

    #[test]
    fn test_records_events_in_order() {
        let log = TraceLog::new();
        let tags = vec!["render".to_string()];
        let r = task_ref(1, 10, &tags);

        log.task_queued(&r);
        log.task_started(&r, 0);
        log.task_completed(&r, 0, Some(Duration::from_micros(250)));

        let events = log.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].kind, EventKind::TaskQueued);
        assert_eq!(events[1].kind, EventKind::TaskStarted);
        assert_eq!(events[2].kind, EventKind::TaskCompleted);
        assert!(events[2].description.contains("250 us"));
        assert_eq!(events[0].tags, tags);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let log = TraceLog::with_capacity(2);
        let tags: Vec<String> = Vec::new();

        log.task_queued(&task_ref(1, 0, &tags));
        log.task_queued(&task_ref(2, 0, &tags));
        log.task_queued(&task_ref(3, 0, &tags));

        let events = log.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].task_id, Some(2));
        assert_eq!(events[1].task_id, Some(3));
    }

    #[test]
    fn test_set_capacity_evicts_down() {
        let log = TraceLog::new();
        let tags: Vec<String> = Vec::new();
        for id in 0..5 {
            log.task_queued(&task_ref(id, 0, &tags));
        }

        log.set_capacity(3);
        assert_eq!(log.len(), 3);
        assert_eq!(log.events()[0].task_id, Some(2));
    }

    #[test]
    fn test_disabled_log_records_nothing() {
        let log = TraceLog::new();
        log.set_enabled(false);
        let tags: Vec<String> = Vec::new();

        log.task_queued(&task_ref(1, 0, &tags));
        assert!(log.is_empty());
    }

    #[test]
    fn test_to_json_shape() {
        let log = TraceLog::new();
        let tags = vec!["io".to_string()];
        log.conflict_detected(&task_ref(7, 3, &tags), "exclusive tag conflict on 'io'");

        let json = log.to_json().unwrap();
        assert!(json.starts_with("{\"events\":["));
        assert!(json.contains("conflict_detected"));
        assert!(json.contains("exclusive tag conflict on 'io'"));
    }

    #[test]
    fn test_export_json_writes_file() {
        let log = TraceLog::new();
        let tags: Vec<String> = Vec::new();
        log.scheduler_empty();
        log.task_queued(&task_ref(1, 0, &tags));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.json");
        log.export_json(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("scheduler_empty"));
    }

    #[test]
    fn test_clear() {
        let log = TraceLog::new();
        log.scheduler_empty();
        assert!(!log.is_empty());
        log.clear();
        assert!(log.is_empty());
    }
}
