//! Configuration model.
//!
//! Every section and field is optional in the file; missing pieces
//! fall back to the defaults below, so an empty document is a valid
//! configuration.

use std::collections::HashMap;

use serde::Deserialize;

use ensemble_scheduler::{SchedulingPolicy, TaskPriority};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnsembleConfig {
    pub scheduler: SchedulerSection,
    pub bus: BusSection,
    pub stores: StoresSection,
}

/// Scheduler tuning: concurrency cap, policy, preemption, aging, and
/// the declared resources and task groups.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerSection {
    pub max_concurrent_tasks: usize,
    pub policy: SchedulingPolicy,
    pub preemption_enabled: bool,
    pub aging: AgingSection,
    /// Resource name to capacity.
    pub resources: HashMap<String, u32>,
    pub groups: HashMap<String, GroupSection>,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            policy: SchedulingPolicy::default(),
            preemption_enabled: true,
            aging: AgingSection::default(),
            resources: HashMap::new(),
            groups: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgingSection {
    pub enabled: bool,
    pub waiting_time_threshold_ms: u64,
    pub boost: u32,
}

impl Default for AgingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            waiting_time_threshold_ms: 5_000,
            boost: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroupSection {
    pub priority: TaskPriority,
    pub max_concurrent: usize,
}

impl Default for GroupSection {
    fn default() -> Self {
        Self {
            priority: TaskPriority::Normal,
            max_concurrent: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusSection {
    /// Broadcast channel depth; lagging subscribers lose oldest first.
    pub capacity: usize,
}

impl Default for BusSection {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoresSection {
    /// Retained terminal executions before FIFO eviction.
    pub max_executions: usize,
}

impl Default for StoresSection {
    fn default() -> Self {
        Self {
            max_executions: 5_000,
        }
    }
}
