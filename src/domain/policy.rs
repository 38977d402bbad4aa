//! Tag admission policies

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Admission policy governing how tasks sharing a tag may overlap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TagPolicy {
    /// Only one task carrying the tag may run at a time
    Exclusive,
    /// Any number of tasks carrying the tag may run concurrently
    #[default]
    Shared,
    /// A candidate is admitted only when it strictly outranks every running
    /// task carrying the tag
    Priority,
}

impl std::fmt::Display for TagPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exclusive => write!(f, "exclusive"),
            Self::Shared => write!(f, "shared"),
            Self::Priority => write!(f, "priority"),
        }
    }
}

impl std::str::FromStr for TagPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "TagPolicy::from_str: called");
        match s.to_lowercase().as_str() {
            "exclusive" => Ok(Self::Exclusive),
            "shared" => Ok(Self::Shared),
            "priority" => Ok(Self::Priority),
            _ => {
                debug!(%s, "TagPolicy::from_str: unknown policy");
                Err(format!("Unknown policy: {}", s))
            }
        }
    }
}

/// Mapping from tag to admission policy with a configurable fallback
///
/// The fallback is a dedicated field, not an entry in the tag map, so no tag
/// name is reserved.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    /// Explicit per-tag policies
    policies: HashMap<String, TagPolicy>,

    /// Policy used for tags without an explicit entry
    default_policy: TagPolicy,
}

impl PolicyTable {
    /// Create a table with the given fallback policy
    pub fn new(default_policy: TagPolicy) -> Self {
        debug!(%default_policy, "PolicyTable::new: called");
        Self {
            policies: HashMap::new(),
            default_policy,
        }
    }

    /// Set the policy for a tag (last writer wins)
    pub fn set(&mut self, tag: impl Into<String>, policy: TagPolicy) {
        let tag = tag.into();
        debug!(%tag, %policy, "PolicyTable::set: called");
        self.policies.insert(tag, policy);
    }

    /// Look up the policy for a tag, falling back to the default
    pub fn get(&self, tag: &str) -> TagPolicy {
        self.policies
            .get(tag)
            .copied()
            .unwrap_or(self.default_policy)
    }

    /// Replace the fallback policy
    pub fn set_default(&mut self, policy: TagPolicy) {
        debug!(%policy, "PolicyTable::set_default: called");
        self.default_policy = policy;
    }

    /// Get the fallback policy
    pub fn default_policy(&self) -> TagPolicy {
        self.default_policy
    }

    /// Number of explicit entries
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Check if the table has no explicit entries
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::new(TagPolicy::Shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_display_parse() {
        assert_eq!(TagPolicy::Exclusive.to_string(), "exclusive");
        assert_eq!("priority".parse::<TagPolicy>().unwrap(), TagPolicy::Priority);
        assert_eq!("SHARED".parse::<TagPolicy>().unwrap(), TagPolicy::Shared);
        assert!("invalid".parse::<TagPolicy>().is_err());
    }

    #[test]
    fn test_policy_serde() {
        let json = serde_json::to_string(&TagPolicy::Exclusive).unwrap();
        assert_eq!(json, "\"exclusive\"");

        let policy: TagPolicy = serde_json::from_str("\"priority\"").unwrap();
        assert_eq!(policy, TagPolicy::Priority);
    }

    #[test]
    fn test_set_then_get_returns_policy() {
        let mut table = PolicyTable::default();
        table.set("render", TagPolicy::Exclusive);
        assert_eq!(table.get("render"), TagPolicy::Exclusive);
    }

    #[test]
    fn test_unknown_tag_uses_default() {
        let table = PolicyTable::new(TagPolicy::Priority);
        assert_eq!(table.get("anything"), TagPolicy::Priority);
    }

    #[test]
    fn test_set_default_does_not_touch_entries() {
        let mut table = PolicyTable::default();
        table.set("io", TagPolicy::Exclusive);
        table.set_default(TagPolicy::Priority);

        assert_eq!(table.get("io"), TagPolicy::Exclusive);
        assert_eq!(table.get("other"), TagPolicy::Priority);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_last_writer_wins() {
        let mut table = PolicyTable::default();
        table.set("io", TagPolicy::Exclusive);
        table.set("io", TagPolicy::Shared);
        assert_eq!(table.get("io"), TagPolicy::Shared);
    }
}
