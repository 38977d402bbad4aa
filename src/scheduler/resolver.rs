//! Conflict resolution: may a candidate start now?

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::domain::{PolicyTable, TagPolicy, Task};
use crate::events::ObserverSet;

/// Decision function inspecting a candidate's tags against the running set
///
/// The resolver never mutates scheduling state and never blocks; the
/// dispatcher is responsible for serialising the admission test against
/// state transitions. Denials are reported to the observers with a
/// human-readable reason.
pub struct ConflictResolver {
    /// Per-tag policies with a configurable fallback
    table: RwLock<PolicyTable>,

    /// Notified on every denial
    observers: Arc<ObserverSet>,
}

impl ConflictResolver {
    /// Create a resolver with the given fallback policy
    pub fn new(default_policy: TagPolicy, observers: Arc<ObserverSet>) -> Self {
        debug!(%default_policy, "ConflictResolver::new: called");
        Self {
            table: RwLock::new(PolicyTable::new(default_policy)),
            observers,
        }
    }

    /// Set the policy for a tag (last writer wins)
    pub fn set_policy(&self, tag: impl Into<String>, policy: TagPolicy) {
        self.table.write().set(tag, policy);
    }

    /// Look up the policy for a tag, falling back to the default
    pub fn get_policy(&self, tag: &str) -> TagPolicy {
        self.table.read().get(tag)
    }

    /// Replace the fallback policy
    pub fn set_default_policy(&self, policy: TagPolicy) {
        self.table.write().set_default(policy);
    }

    /// Get the fallback policy
    pub fn default_policy(&self) -> TagPolicy {
        self.table.read().default_policy()
    }

    /// Decide whether `candidate` may start against the running snapshot
    ///
    /// A candidate with multiple tags is denied if any single tag denies.
    pub fn can_execute(&self, candidate: &Task, running: &[Arc<Task>]) -> bool {
        if running.is_empty() || candidate.tags().is_empty() {
            return true;
        }

        for tag in candidate.tags() {
            let policy = self.get_policy(tag);
            match policy {
                TagPolicy::Shared => {}
                TagPolicy::Exclusive => {
                    for active in running {
                        if active.has_tag(tag) {
                            let reason = format!(
                                "exclusive tag conflict on '{}': task {} blocked by running task {}",
                                tag,
                                candidate.id(),
                                active.id()
                            );
                            debug!(id = %candidate.id(), %reason, "ConflictResolver::can_execute: denied");
                            self.observers.conflict_detected(candidate, &reason);
                            return false;
                        }
                    }
                }
                TagPolicy::Priority => {
                    for active in running {
                        // Strict greater-than is required to preempt
                        if active.has_tag(tag) && candidate.priority() <= active.priority() {
                            let reason = format!(
                                "priority conflict on tag '{}': task {} (priority {}) <= running task {} (priority {})",
                                tag,
                                candidate.id(),
                                candidate.priority(),
                                active.id(),
                                active.priority()
                            );
                            debug!(id = %candidate.id(), %reason, "ConflictResolver::can_execute: denied");
                            self.observers.conflict_detected(candidate, &reason);
                            return false;
                        }
                    }
                }
            }
        }

        true
    }
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.read();
        f.debug_struct("ConflictResolver")
            .field("entries", &table.len())
            .field("default_policy", &table.default_policy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::handle::Slot;
    use crate::domain::task::erase;
    use crate::events::{GateObserver, TaskRef};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn make_task(id: u32, priority: u32, tags: &[&str]) -> Arc<Task> {
        let slot: Arc<Slot<()>> = Slot::new();
        let mut task = Task::new(id, erase(|_| (), slot), priority);
        for tag in tags {
            task.add_tag(*tag);
        }
        Arc::new(task)
    }

    fn resolver(default_policy: TagPolicy) -> ConflictResolver {
        ConflictResolver::new(default_policy, Arc::new(ObserverSet::new()))
    }

    #[test]
    fn test_no_tags_always_admits() {
        let resolver = resolver(TagPolicy::Exclusive);
        let candidate = make_task(1, 0, &[]);
        let running = vec![make_task(2, 0, &["io"])];
        assert!(resolver.can_execute(&candidate, &running));
    }

    #[test]
    fn test_empty_running_set_admits() {
        let resolver = resolver(TagPolicy::Exclusive);
        let candidate = make_task(1, 0, &["io"]);
        assert!(resolver.can_execute(&candidate, &[]));
    }

    #[test]
    fn test_shared_policy_never_denies() {
        let resolver = resolver(TagPolicy::Shared);
        let candidate = make_task(1, 0, &["io"]);
        let running = vec![make_task(2, 99, &["io"])];
        assert!(resolver.can_execute(&candidate, &running));
    }

    #[test]
    fn test_exclusive_denies_on_overlap() {
        let resolver = resolver(TagPolicy::Shared);
        resolver.set_policy("render", TagPolicy::Exclusive);

        let candidate = make_task(1, 100, &["render"]);
        let running = vec![make_task(2, 0, &["render"])];
        assert!(!resolver.can_execute(&candidate, &running));

        // A disjoint tag does not conflict
        let other = make_task(3, 0, &["audio"]);
        assert!(resolver.can_execute(&other, &running));
    }

    #[test]
    fn test_priority_requires_strict_greater() {
        let resolver = resolver(TagPolicy::Shared);
        resolver.set_policy("phys", TagPolicy::Priority);
        let running = vec![make_task(2, 10, &["phys"])];

        // Equal priority is denied
        assert!(!resolver.can_execute(&make_task(1, 10, &["phys"]), &running));
        // Lower priority is denied
        assert!(!resolver.can_execute(&make_task(3, 5, &["phys"]), &running));
        // Strictly higher priority is admitted
        assert!(resolver.can_execute(&make_task(4, 11, &["phys"]), &running));
    }

    #[test]
    fn test_any_denying_tag_denies() {
        let resolver = resolver(TagPolicy::Shared);
        resolver.set_policy("render", TagPolicy::Exclusive);

        let candidate = make_task(1, 0, &["audio", "render"]);
        let running = vec![make_task(2, 0, &["render"])];
        assert!(!resolver.can_execute(&candidate, &running));
    }

    #[test]
    fn test_unknown_tag_uses_default() {
        let resolver = resolver(TagPolicy::Exclusive);
        let candidate = make_task(1, 0, &["anything"]);
        let running = vec![make_task(2, 0, &["anything"])];
        assert!(!resolver.can_execute(&candidate, &running));

        resolver.set_default_policy(TagPolicy::Shared);
        assert!(resolver.can_execute(&candidate, &running));
    }

    #[test]
    fn test_policy_roundtrip() {
        let resolver = resolver(TagPolicy::Shared);
        resolver.set_policy("io", TagPolicy::Priority);
        assert_eq!(resolver.get_policy("io"), TagPolicy::Priority);
        assert_eq!(resolver.get_policy("other"), TagPolicy::Shared);
    }

    #[test]
    fn test_denial_notifies_observers() {
        #[derive(Default)]
        struct Conflicts(AtomicU32);

        impl GateObserver for Conflicts {
            fn conflict_detected(&self, _task: &TaskRef<'_>, reason: &str) {
                assert!(reason.contains("render"));
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let observers = Arc::new(ObserverSet::new());
        let conflicts = Arc::new(Conflicts::default());
        observers.register(conflicts.clone());

        let resolver = ConflictResolver::new(TagPolicy::Shared, observers);
        resolver.set_policy("render", TagPolicy::Exclusive);

        let candidate = make_task(1, 0, &["render"]);
        let running = vec![make_task(2, 0, &["render"])];
        assert!(!resolver.can_execute(&candidate, &running));
        assert_eq!(conflicts.0.load(Ordering::SeqCst), 1);
    }
}
