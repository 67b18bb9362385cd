//! Persistence collaborator traits.
//!
//! The core defines no on-disk format; checkpoints are delegated to
//! collaborators behind narrow save/load interfaces keyed by id.
//! Implementations are in the `ensemble-stores` crate.

use async_trait::async_trait;
use thiserror::Error;

use crate::process::ProcessInstance;
use crate::task::TaskExecution;

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("item not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Terminal task executions handed off for persistence.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn save(&self, execution: &TaskExecution) -> Result<(), StoreError>;

    async fn load(&self, execution_id: &str) -> Result<Option<TaskExecution>, StoreError>;

    async fn delete(&self, execution_id: &str) -> Result<bool, StoreError>;
}

/// Process instance checkpoints keyed by instance id.
#[async_trait]
pub trait ProcessStore: Send + Sync {
    async fn save(&self, instance: &ProcessInstance) -> Result<(), StoreError>;

    async fn load(&self, instance_id: &str) -> Result<Option<ProcessInstance>, StoreError>;

    async fn delete(&self, instance_id: &str) -> Result<bool, StoreError>;
}
