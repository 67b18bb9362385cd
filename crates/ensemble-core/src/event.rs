//! Engine lifecycle events.
//!
//! The engines publish these after creates, transitions, and task
//! terminations. Publication is best-effort: a failing bus is logged
//! and never fails the operation that triggered it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::store::StoreError;

/// Lifecycle notification published to the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    ProcessCreated {
        instance_id: String,
        process_type: String,
        version: String,
        state: String,
        timestamp: DateTime<Utc>,
    },
    ProcessTransitioned {
        instance_id: String,
        process_type: String,
        event: String,
        from_state: String,
        to_state: String,
        timestamp: DateTime<Utc>,
    },
    TaskStarted {
        execution_id: String,
        task_type: String,
        timestamp: DateTime<Utc>,
    },
    TaskCompleted {
        execution_id: String,
        task_type: String,
        result: Option<Value>,
        timestamp: DateTime<Utc>,
    },
    TaskFailed {
        execution_id: String,
        task_type: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    TaskCancelled {
        execution_id: String,
        task_type: String,
        timestamp: DateTime<Utc>,
    },
    TaskDeferred {
        execution_id: String,
        task_type: String,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn process_created(
        instance_id: impl Into<String>,
        process_type: impl Into<String>,
        version: impl Into<String>,
        state: impl Into<String>,
    ) -> Self {
        Self::ProcessCreated {
            instance_id: instance_id.into(),
            process_type: process_type.into(),
            version: version.into(),
            state: state.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn process_transitioned(
        instance_id: impl Into<String>,
        process_type: impl Into<String>,
        event: impl Into<String>,
        from_state: impl Into<String>,
        to_state: impl Into<String>,
    ) -> Self {
        Self::ProcessTransitioned {
            instance_id: instance_id.into(),
            process_type: process_type.into(),
            event: event.into(),
            from_state: from_state.into(),
            to_state: to_state.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn task_started(execution_id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self::TaskStarted {
            execution_id: execution_id.into(),
            task_type: task_type.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn task_completed(
        execution_id: impl Into<String>,
        task_type: impl Into<String>,
        result: Option<Value>,
    ) -> Self {
        Self::TaskCompleted {
            execution_id: execution_id.into(),
            task_type: task_type.into(),
            result,
            timestamp: Utc::now(),
        }
    }

    pub fn task_failed(
        execution_id: impl Into<String>,
        task_type: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self::TaskFailed {
            execution_id: execution_id.into(),
            task_type: task_type.into(),
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn task_cancelled(execution_id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self::TaskCancelled {
            execution_id: execution_id.into(),
            task_type: task_type.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn task_deferred(execution_id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self::TaskDeferred {
            execution_id: execution_id.into(),
            task_type: task_type.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Pub/sub channel for lifecycle notifications.
///
/// Implementations live in `ensemble-stores`.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event to all active subscribers.
    async fn publish(&self, event: EngineEvent) -> Result<(), StoreError>;

    /// Subscribe to realtime events.
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}
