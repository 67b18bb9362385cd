//! ExecutionStore in-memory implementation.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use ensemble_core::store::{ExecutionStore, StoreError};
use ensemble_core::task::TaskExecution;

const DEFAULT_IN_MEMORY_EXECUTION_LIMIT: usize = 5_000;

/// In-memory implementation for development and testing.
///
/// Bounded: when the limit is reached, the least recently saved
/// execution is evicted.
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<String, TaskExecution>>,
    order: RwLock<VecDeque<String>>,
    max_executions: usize,
}

impl InMemoryExecutionStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::with_max_executions(DEFAULT_IN_MEMORY_EXECUTION_LIMIT)
    }

    /// Create a new in-memory store with a hard capacity limit.
    pub fn with_max_executions(max_executions: usize) -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
            order: RwLock::new(VecDeque::new()),
            max_executions: max_executions.max(1),
        }
    }

    fn touch_order(order: &mut VecDeque<String>, execution_id: &str) {
        order.retain(|id| id != execution_id);
        order.push_back(execution_id.to_string());
    }
}

impl Default for InMemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn save(&self, execution: &TaskExecution) -> Result<(), StoreError> {
        let mut executions = self
            .executions
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut order = self
            .order
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        if !executions.contains_key(execution.id.as_str())
            && executions.len() >= self.max_executions
        {
            if let Some(oldest_id) = order.pop_front() {
                executions.remove(&oldest_id);
            }
        }
        executions.insert(execution.id.clone(), execution.clone());
        Self::touch_order(&mut order, execution.id.as_str());
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Option<TaskExecution>, StoreError> {
        let executions = self
            .executions
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(executions.get(execution_id).cloned())
    }

    async fn delete(&self, execution_id: &str) -> Result<bool, StoreError> {
        let mut executions = self
            .executions
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let removed = executions.remove(execution_id).is_some();
        if removed {
            let mut order = self
                .order
                .write()
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            order.retain(|id| id != execution_id);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_in_memory_execution_store_limit() {
        tokio_test::block_on(async {
            let store = InMemoryExecutionStore::with_max_executions(2);
            let e1 = TaskExecution::new("a", json!(1));
            let e2 = TaskExecution::new("b", json!(2));
            let e3 = TaskExecution::new("c", json!(3));
            store.save(&e1).await.unwrap();
            store.save(&e2).await.unwrap();
            store.save(&e3).await.unwrap();

            assert!(store.load(e1.id.as_str()).await.unwrap().is_none());
            assert!(store.load(e2.id.as_str()).await.unwrap().is_some());
            assert!(store.load(e3.id.as_str()).await.unwrap().is_some());
        });
    }

    #[test]
    fn test_delete_removes_execution() {
        tokio_test::block_on(async {
            let store = InMemoryExecutionStore::new();
            let execution = TaskExecution::new("a", json!(null));
            store.save(&execution).await.unwrap();

            assert!(store.delete(execution.id.as_str()).await.unwrap());
            assert!(!store.delete(execution.id.as_str()).await.unwrap());
            assert!(store.load(execution.id.as_str()).await.unwrap().is_none());
        });
    }
}
