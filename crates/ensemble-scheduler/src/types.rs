//! Scheduler-facing types: priorities, policies, per-task directives.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Task priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl TaskPriority {
    /// Numeric level used for effective-priority arithmetic.
    pub fn level(&self) -> u32 {
        match self {
            TaskPriority::Low => 0,
            TaskPriority::Normal => 1,
            TaskPriority::High => 2,
            TaskPriority::Critical => 3,
        }
    }
}

/// Ready-queue selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingPolicy {
    /// First queued, first run.
    Fifo,
    /// Shortest estimated execution time first; unknown sorts last.
    Sjf,
    /// Earliest deadline first; unknown sorts last.
    Deadline,
    /// Highest effective priority first, FIFO ties (default).
    #[default]
    Priority,
}

/// Priority-aging knobs: a waiting task's effective priority is
/// boosted once it has waited longer than the threshold.
#[derive(Debug, Clone, Copy)]
pub struct AgingConfig {
    pub enabled: bool,
    pub waiting_time_threshold: Duration,
    pub boost: u32,
}

impl Default for AgingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            waiting_time_threshold: Duration::from_secs(5),
            boost: 1,
        }
    }
}

/// Concurrency cap for a named group of tasks.
#[derive(Debug, Clone, Copy)]
pub struct TaskGroup {
    pub priority: TaskPriority,
    pub max_concurrent: usize,
}

/// Capacity snapshot for one named resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceAllocation {
    pub capacity: u32,
    pub allocated: u32,
}

/// Per-task scheduling directives.
///
/// Carried on the lifecycle context under the `"scheduler"` attribute
/// key, or set ahead of submission through the admin API. Unset fields
/// leave the current record untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOptions {
    /// Stable scheduler identity; defaults to the execution id.
    pub task_id: Option<String>,
    pub priority: Option<TaskPriority>,
    pub execution_time_ms: Option<u64>,
    pub deadline: Option<DateTime<Utc>>,
    pub preemptible: Option<bool>,
    pub group: Option<String>,
    pub resources: Vec<String>,
}

/// Attribute key the scheduler reads its directives from.
pub const SCHEDULER_ATTRIBUTE: &str = "scheduler";

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_execution_time(mut self, estimate: Duration) -> Self {
        self.execution_time_ms = Some(estimate.as_millis() as u64);
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_preemptible(mut self, preemptible: bool) -> Self {
        self.preemptible = Some(preemptible);
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.push(resource.into());
        self
    }

    /// Parse directives from a lifecycle context attribute map.
    pub fn from_attributes(attributes: &Map<String, Value>) -> Self {
        let Some(raw) = attributes.get(SCHEDULER_ATTRIBUTE) else {
            return Self::default();
        };
        match serde_json::from_value(raw.clone()) {
            Ok(options) => options,
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed scheduler directives");
                Self::default()
            }
        }
    }

    /// Render directives as context attributes for task submission.
    pub fn into_attributes(self) -> Map<String, Value> {
        let mut attributes = Map::new();
        match serde_json::to_value(&self) {
            Ok(value) => {
                attributes.insert(SCHEDULER_ATTRIBUTE.to_string(), value);
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode scheduler directives");
            }
        }
        attributes
    }
}

/// Scheduler bookkeeping for one task id.
#[derive(Debug, Clone)]
pub struct SchedulerTaskState {
    pub task_id: String,
    pub priority: TaskPriority,
    pub execution_time: Option<Duration>,
    pub deadline: Option<DateTime<Utc>>,
    pub preemptible: bool,
    pub group: Option<String>,
    pub resources: Vec<String>,
    pub waiting_since: Instant,
    pub preempted: bool,
    pub(crate) pending: Option<DeferredTask>,
}

impl SchedulerTaskState {
    pub(crate) fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            priority: TaskPriority::Normal,
            execution_time: None,
            deadline: None,
            preemptible: true,
            group: None,
            resources: Vec::new(),
            waiting_since: Instant::now(),
            preempted: false,
            pending: None,
        }
    }

    pub(crate) fn apply_options(&mut self, options: &TaskOptions) {
        if let Some(priority) = options.priority {
            self.priority = priority;
        }
        if let Some(ms) = options.execution_time_ms {
            self.execution_time = Some(Duration::from_millis(ms));
        }
        if let Some(deadline) = options.deadline {
            self.deadline = Some(deadline);
        }
        if let Some(preemptible) = options.preemptible {
            self.preemptible = preemptible;
        }
        if let Some(group) = &options.group {
            self.group = Some(group.clone());
        }
        if !options.resources.is_empty() {
            self.resources = options.resources.clone();
        }
    }
}

/// A deferred submission handed back to the embedder once admitted.
#[derive(Debug, Clone)]
pub struct DeferredTask {
    pub task_id: String,
    pub task_type: String,
    pub input: Value,
    pub attributes: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_ordering_and_levels() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
        assert_eq!(TaskPriority::Low.level(), 0);
        assert_eq!(TaskPriority::Critical.level(), 3);
    }

    #[test]
    fn test_options_round_trip_through_attributes() {
        let options = TaskOptions::new()
            .with_task_id("t1")
            .with_priority(TaskPriority::High)
            .with_execution_time(Duration::from_millis(250))
            .with_group("batch")
            .with_resource("db");

        let attributes = options.into_attributes();
        let parsed = TaskOptions::from_attributes(&attributes);
        assert_eq!(parsed.task_id.as_deref(), Some("t1"));
        assert_eq!(parsed.priority, Some(TaskPriority::High));
        assert_eq!(parsed.execution_time_ms, Some(250));
        assert_eq!(parsed.group.as_deref(), Some("batch"));
        assert_eq!(parsed.resources, vec!["db".to_string()]);
    }

    #[test]
    fn test_malformed_directives_fall_back_to_defaults() {
        let mut attributes = Map::new();
        attributes.insert(SCHEDULER_ATTRIBUTE.to_string(), json!("not-an-object"));
        let parsed = TaskOptions::from_attributes(&attributes);
        assert!(parsed.task_id.is_none());
        assert!(parsed.priority.is_none());
    }

    #[test]
    fn test_apply_options_merges_only_set_fields() {
        let mut record = SchedulerTaskState::new("t1");
        record.apply_options(&TaskOptions::new().with_priority(TaskPriority::Low));
        record.apply_options(&TaskOptions::new().with_group("batch"));

        assert_eq!(record.priority, TaskPriority::Low);
        assert_eq!(record.group.as_deref(), Some("batch"));
        assert!(record.preemptible);
    }
}
