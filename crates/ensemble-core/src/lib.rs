//! # Ensemble Core
//!
//! Core abstractions for the Ensemble orchestration runtime.
//!
//! This crate contains:
//! - Extension point / hook chain pipeline definitions
//! - Process definition and instance types (versioned state machines)
//! - Task definition and execution lifecycle types
//! - Engine event and persistence collaborator traits
//!
//! This crate does NOT contain:
//! - The engines driving the lifecycle (see `ensemble-runtime`)
//! - The priority scheduler (see `ensemble-scheduler`, an extension)
//! - Store/bus implementations (see `ensemble-stores`)

pub mod error;
pub mod event;
pub mod extension;
pub mod process;
pub mod store;
pub mod task;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{CoreError, HookError};
    pub use crate::event::{EngineEvent, EventBus};
    pub use crate::extension::{
        CancellationToken, EventInterceptor, Extension, ExtensionPoint, ExtensionRegistry,
        HookContext, HookRegistration, LifecycleHook, ProcessHookData, TaskHookData,
    };
    pub use crate::process::{
        ProcessDefinition, ProcessInstance, StateMatcher, Transition, TransitionAction,
        TransitionGuard,
    };
    pub use crate::store::{ExecutionStore, ProcessStore, StoreError};
    pub use crate::task::{
        BackoffStrategy, RetryPolicy, TaskDefinition, TaskExecution, TaskHandler, TaskStatus,
    };
}

// Re-export key types at crate root
pub use error::{CoreError, HookError};
pub use event::{EngineEvent, EventBus};
pub use extension::{
    CancellationToken, Extension, ExtensionPoint, ExtensionRegistry, HookContext, LifecycleHook,
};
pub use process::{ProcessDefinition, ProcessInstance, Transition};
pub use store::{ExecutionStore, ProcessStore, StoreError};
pub use task::{TaskDefinition, TaskExecution, TaskHandler, TaskStatus};
