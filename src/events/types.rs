//! Structured event records for lifecycle tracing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The vocabulary of observable lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A task entered the pending queue
    TaskQueued,
    /// A task was admitted and its closure is about to run
    TaskStarted,
    /// A task's closure returned normally
    TaskCompleted,
    /// A task's closure failed
    TaskFailed,
    /// A task short-circuited because it was cancelled
    TaskCancelled,
    /// A task short-circuited because its deadline passed
    TaskTimedOut,
    /// The resolver denied admission over a tag policy
    ConflictDetected,
    /// A blocked task was forced through past the policy check
    AntiStarvationApplied,
    /// A dispatcher found the pending queue empty
    SchedulerEmpty,
}

impl EventKind {
    /// Get the event kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TaskQueued => "task_queued",
            EventKind::TaskStarted => "task_started",
            EventKind::TaskCompleted => "task_completed",
            EventKind::TaskFailed => "task_failed",
            EventKind::TaskCancelled => "task_cancelled",
            EventKind::TaskTimedOut => "task_timed_out",
            EventKind::ConflictDetected => "conflict_detected",
            EventKind::AntiStarvationApplied => "anti_starvation_applied",
            EventKind::SchedulerEmpty => "scheduler_empty",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One recorded lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    /// What happened
    pub kind: EventKind,

    /// Wall-clock time of the record
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// Monotonic offset since the trace log was created
    pub elapsed_ms: u64,

    /// Human-readable description
    pub description: String,

    /// Task the event refers to, where applicable
    pub task_id: Option<u32>,

    /// Worker-local id of the executing invocation, where applicable
    pub worker_id: Option<u32>,

    /// Tags carried by the task
    pub tags: Vec<String>,

    /// Priority of the task
    pub priority: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_as_str() {
        assert_eq!(EventKind::TaskQueued.as_str(), "task_queued");
        assert_eq!(
            EventKind::AntiStarvationApplied.as_str(),
            "anti_starvation_applied"
        );
    }

    #[test]
    fn test_event_kind_serde() {
        let json = serde_json::to_string(&EventKind::ConflictDetected).unwrap();
        assert_eq!(json, "\"conflict_detected\"");

        let kind: EventKind = serde_json::from_str("\"scheduler_empty\"").unwrap();
        assert_eq!(kind, EventKind::SchedulerEmpty);
    }

    #[test]
    fn test_trace_record_serialization() {
        let record = TraceRecord {
            kind: EventKind::TaskStarted,
            timestamp: Utc::now(),
            elapsed_ms: 12,
            description: "Task started".to_string(),
            task_id: Some(3),
            worker_id: Some(1),
            tags: vec!["render".to_string()],
            priority: 10,
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("task_started"));
        assert!(json.contains("\"ts\""));

        let parsed: TraceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind, EventKind::TaskStarted);
        assert_eq!(parsed.task_id, Some(3));
    }
}
