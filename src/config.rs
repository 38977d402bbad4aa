//! Configuration types for the coordinator

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::TagPolicy;

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Number of worker threads in the pool
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Admission policy for tags without an explicit entry
    #[serde(default)]
    pub default_policy: TagPolicy,

    /// Re-queue count after which a blocked task is forced through
    #[serde(default = "default_anti_starvation_limit")]
    pub anti_starvation_limit: u32,

    /// Whether execution durations are measured and reported
    #[serde(default = "default_profiling_enabled")]
    pub profiling_enabled: bool,
}

fn default_pool_size() -> usize {
    debug!("default_pool_size: called");
    let hardware = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    std::cmp::max(2, hardware / 2)
}

fn default_anti_starvation_limit() -> u32 {
    debug!("default_anti_starvation_limit: called");
    10
}

fn default_profiling_enabled() -> bool {
    debug!("default_profiling_enabled: called");
    true
}

impl Default for GateConfig {
    fn default() -> Self {
        debug!("GateConfig::default: called");
        Self {
            pool_size: default_pool_size(),
            default_policy: TagPolicy::Shared,
            anti_starvation_limit: default_anti_starvation_limit(),
            profiling_enabled: default_profiling_enabled(),
        }
    }
}

impl GateConfig {
    /// Create a config with a fixed pool size and defaults elsewhere
    pub fn with_pool_size(pool_size: usize) -> Self {
        debug!(%pool_size, "GateConfig::with_pool_size: called");
        Self {
            pool_size: pool_size.max(1),
            ..Default::default()
        }
    }
}
