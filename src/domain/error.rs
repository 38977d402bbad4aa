//! Error types surfaced through completion handles and the facade

use thiserror::Error;
use tracing::debug;

/// Errors that can resolve a task handle or fail a submission
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("closure failed: {description}")]
    ClosureFailed { description: String },

    #[error("task cancelled")]
    Cancelled,

    #[error("task timed out")]
    TimedOut,

    #[error("queue stopped")]
    QueueStopped,

    #[error("result already consumed")]
    AlreadyConsumed,
}

impl TaskError {
    /// Check if this error represents a closure failure
    pub fn is_failure(&self) -> bool {
        debug!(?self, "TaskError::is_failure: called");
        matches!(self, TaskError::ClosureFailed { .. })
    }

    /// Check if this error came from cancellation or a deadline
    pub fn is_short_circuit(&self) -> bool {
        debug!(?self, "TaskError::is_short_circuit: called");
        matches!(self, TaskError::Cancelled | TaskError::TimedOut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_failure() {
        let err = TaskError::ClosureFailed {
            description: "boom".to_string(),
        };
        assert!(err.is_failure());
        assert!(!TaskError::Cancelled.is_failure());
    }

    #[test]
    fn test_is_short_circuit() {
        assert!(TaskError::Cancelled.is_short_circuit());
        assert!(TaskError::TimedOut.is_short_circuit());
        assert!(!TaskError::QueueStopped.is_short_circuit());
    }

    #[test]
    fn test_display() {
        let err = TaskError::ClosureFailed {
            description: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "closure failed: boom");
        assert_eq!(TaskError::AlreadyConsumed.to_string(), "result already consumed");
    }
}
