//! Task type definitions
//!
//! A task definition pairs an id with an async handler; a task
//! execution is the lifecycle record owned by the task engine until it
//! reaches a terminal status.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extension::CancellationToken;

/// Task execution lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// The unit of work behind a task definition.
///
/// Cancellation is cooperative: the handler is expected to poll the
/// token (or select on `cancelled()`) at its own suspension points.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, input: Value, cancellation: CancellationToken) -> Result<Value, String>;
}

/// Backoff shape for the retry policy metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Constant,
    Linear,
    Exponential,
}

/// Retry metadata attached to a task definition.
///
/// The engine itself never retries; this is consumed by the external
/// retry hook on the `task:onError` point.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the given retry attempt (1-based), capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let delay_ms = match self.backoff {
            BackoffStrategy::Constant => base_ms,
            BackoffStrategy::Linear => base_ms.saturating_mul(attempt as u64),
            BackoffStrategy::Exponential => {
                let shift = attempt.saturating_sub(1).min(20);
                base_ms.saturating_mul(1 << shift)
            }
        };
        Duration::from_millis(delay_ms).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Registered task definition.
///
/// Immutable once registered; re-registering the same id replaces it.
#[derive(Clone)]
pub struct TaskDefinition {
    pub id: String,
    pub handler: Arc<dyn TaskHandler>,
    pub retry_policy: Option<RetryPolicy>,
}

impl TaskDefinition {
    pub fn new(id: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            id: id.into(),
            handler,
            retry_policy: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("id", &self.id)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

/// Lifecycle record of a single task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: String,
    pub task_type: String,
    pub status: TaskStatus,
    pub input: Value,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub attempts: u32,
}

impl TaskExecution {
    pub fn new(task_type: impl Into<String>, input: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            status: TaskStatus::Running,
            input,
            result: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            attempts: 1,
        }
    }

    pub fn complete(&mut self, result: Option<Value>) {
        self.status = TaskStatus::Completed;
        self.result = result;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }

    pub fn cancel(&mut self, reason: impl Into<String>) {
        self.status = TaskStatus::Cancelled;
        self.error = Some(reason.into());
        self.finished_at = Some(Utc::now());
    }

    /// Park the execution without a terminal outcome (deferred
    /// admission); the scheduler re-launches it later.
    pub fn defer(&mut self) {
        self.status = TaskStatus::Pending;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_terminality() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn test_execution_outcome_transitions() {
        let mut execution = TaskExecution::new("demo", json!({"n": 1}));
        assert_eq!(execution.status, TaskStatus::Running);
        assert!(execution.finished_at.is_none());

        execution.complete(Some(json!("done")));
        assert_eq!(execution.status, TaskStatus::Completed);
        assert_eq!(execution.result, Some(json!("done")));
        assert!(execution.finished_at.is_some());

        let mut failed = TaskExecution::new("demo", Value::Null);
        failed.fail("handler exploded");
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("handler exploded"));
    }

    #[test]
    fn test_retry_policy_backoff_shapes() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff: BackoffStrategy::Exponential,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(450),
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        // capped
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(450));

        let linear = RetryPolicy {
            backoff: BackoffStrategy::Linear,
            ..policy.clone()
        };
        assert_eq!(linear.delay_for_attempt(3), Duration::from_millis(300));

        let constant = RetryPolicy {
            backoff: BackoffStrategy::Constant,
            ..policy
        };
        assert_eq!(constant.delay_for_attempt(4), Duration::from_millis(100));
    }
}
