//! # Ensemble Stores
//!
//! Minimal collaborator implementations for the Ensemble runtime.
//!
//! This crate provides:
//! - In-process EventBus (tokio broadcast)
//! - InMemory ExecutionStore
//! - InMemory ProcessStore

mod event_bus;
mod execution_store;
mod process_store;

pub use event_bus::BroadcastEventBus;
pub use execution_store::InMemoryExecutionStore;
pub use process_store::InMemoryProcessStore;

// Re-export core traits for convenience
pub use ensemble_core::event::{EngineEvent, EventBus};
pub use ensemble_core::store::{ExecutionStore, ProcessStore, StoreError};
