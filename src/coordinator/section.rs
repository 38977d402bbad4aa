//! Named sections: a lexical helper tagging related submissions

use std::sync::Arc;

use tracing::debug;

use crate::domain::{TaskContext, TaskError, TaskHandle};

use super::core::Coordinator;

/// Groups submissions under a shared `section:{name}` tag
///
/// A section owns no scheduling state; it merely stamps every submission
/// with its tag so related work can be traced and policed together.
pub struct Section {
    coordinator: Arc<Coordinator>,
    name: String,
    priority: u32,
    tags: Vec<String>,
}

impl Section {
    /// Create a section with a name and a priority for its submissions
    pub fn new(coordinator: Arc<Coordinator>, name: impl Into<String>, priority: u32) -> Self {
        let name = name.into();
        debug!(%name, %priority, "Section::new: called");
        let tags = vec![format!("section:{}", name)];
        Self {
            coordinator,
            name,
            priority,
            tags,
        }
    }

    /// Section name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Priority stamped on submissions
    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Add an extra tag to every later submission
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        debug!(name = %self.name, %tag, "Section::tag: called");
        self.tags.push(tag);
        self
    }

    /// Tags stamped on submissions
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Submit a closure under this section's tag and priority
    pub fn run<T, F>(&self, func: F) -> Result<TaskHandle<T>, TaskError>
    where
        F: FnOnce(&mut TaskContext) -> T + Send + 'static,
        T: Send + 'static,
    {
        debug!(name = %self.name, "Section::run: called");
        self.coordinator
            .submit(func, self.priority, self.tags.clone())
    }
}

impl std::fmt::Debug for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Section")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("tags", &self.tags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GateConfig;
    use crate::events::{GateObserver, TaskRef};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn test_section_tags_submissions() {
        struct SawSectionTag(AtomicU32);

        impl GateObserver for SawSectionTag {
            fn task_queued(&self, task: &TaskRef<'_>) {
                if task.tags.iter().any(|t| t == "section:render-pass") {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let gate = Arc::new(Coordinator::new(GateConfig::with_pool_size(1)));
        let saw = Arc::new(SawSectionTag(AtomicU32::new(0)));
        gate.add_observer(saw.clone());

        let section = Section::new(gate.clone(), "render-pass", 5).tag("gpu");
        assert_eq!(section.name(), "render-pass");
        assert_eq!(section.priority(), 5);
        assert_eq!(section.tags().len(), 2);

        let a = section.run(|_| 1).unwrap();
        let b = section.run(|_| 2).unwrap();
        assert_eq!(a.recv_timeout(Duration::from_secs(5)), Some(Ok(1)));
        assert_eq!(b.recv_timeout(Duration::from_secs(5)), Some(Ok(2)));

        assert_eq!(saw.0.load(Ordering::SeqCst), 2);
        gate.shutdown();
    }
}
