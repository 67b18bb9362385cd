//! ProcessStore in-memory implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use ensemble_core::process::ProcessInstance;
use ensemble_core::store::{ProcessStore, StoreError};

/// In-memory implementation for development and testing.
#[derive(Default)]
pub struct InMemoryProcessStore {
    instances: RwLock<HashMap<String, ProcessInstance>>,
}

impl InMemoryProcessStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessStore for InMemoryProcessStore {
    async fn save(&self, instance: &ProcessInstance) -> Result<(), StoreError> {
        let mut instances = self
            .instances
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        instances.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn load(&self, instance_id: &str) -> Result<Option<ProcessInstance>, StoreError> {
        let instances = self
            .instances
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(instances.get(instance_id).cloned())
    }

    async fn delete(&self, instance_id: &str) -> Result<bool, StoreError> {
        let mut instances = self
            .instances
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(instances.remove(instance_id).is_some())
    }
}
