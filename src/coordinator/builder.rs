//! Fluent builder assembling submission parameters

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::domain::{TagPolicy, TaskContext, TaskError, TaskHandle};

use super::core::Coordinator;

/// Fluent assembly of a submission: priority, tags, timeout, policy override
///
/// The builder is a convenience layer over [`Coordinator::submit`]; a policy
/// override, when present, is applied to every tag of the submission just
/// before the task is queued.
#[derive(Clone)]
pub struct TaskBuilder {
    coordinator: Arc<Coordinator>,
    priority: u32,
    tags: Vec<String>,
    timeout: Option<Duration>,
    policy_override: Option<TagPolicy>,
}

impl TaskBuilder {
    /// Start building a submission against a coordinator
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        debug!("TaskBuilder::new: called");
        Self {
            coordinator,
            priority: 0,
            tags: Vec::new(),
            timeout: None,
            policy_override: None,
        }
    }

    /// Set the scheduling priority; larger is more important
    pub fn priority(mut self, priority: u32) -> Self {
        debug!(%priority, "TaskBuilder::priority: called");
        self.priority = priority;
        self
    }

    /// Add one tag
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        debug!(%tag, "TaskBuilder::tag: called");
        self.tags.push(tag);
        self
    }

    /// Add several tags
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        debug!("TaskBuilder::tags: called");
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Install a deadline `timeout` after submission
    pub fn timeout(mut self, timeout: Duration) -> Self {
        debug!(?timeout, "TaskBuilder::timeout: called");
        self.timeout = Some(timeout);
        self
    }

    /// Make every tag of this submission exclusive
    pub fn exclusive(mut self) -> Self {
        debug!("TaskBuilder::exclusive: called");
        self.policy_override = Some(TagPolicy::Exclusive);
        self
    }

    /// Make every tag of this submission shared
    pub fn shared(mut self) -> Self {
        debug!("TaskBuilder::shared: called");
        self.policy_override = Some(TagPolicy::Shared);
        self
    }

    /// Make every tag of this submission priority-preempting
    pub fn prioritized(mut self) -> Self {
        debug!("TaskBuilder::prioritized: called");
        self.policy_override = Some(TagPolicy::Priority);
        self
    }

    /// Submit the closure with the assembled parameters
    pub fn run<T, F>(self, func: F) -> Result<TaskHandle<T>, TaskError>
    where
        F: FnOnce(&mut TaskContext) -> T + Send + 'static,
        T: Send + 'static,
    {
        debug!(priority = %self.priority, tags = ?self.tags, "TaskBuilder::run: called");
        if let Some(policy) = self.policy_override {
            for tag in &self.tags {
                self.coordinator.set_policy(tag.clone(), policy);
            }
        }
        self.coordinator
            .submit_with(func, self.priority, self.tags, self.timeout)
    }
}

impl std::fmt::Debug for TaskBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskBuilder")
            .field("priority", &self.priority)
            .field("tags", &self.tags)
            .field("timeout", &self.timeout)
            .field("policy_override", &self.policy_override)
            .finish()
    }
}
