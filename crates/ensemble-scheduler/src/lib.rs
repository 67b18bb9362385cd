//! Priority scheduler extension for the Ensemble runtime.
//!
//! Registers hooks at the task lifecycle extension points to gate
//! admission, order the ready queue, preempt lower-priority work, and
//! hand drain-admitted submissions back to the embedder.

pub mod scheduler;
pub mod types;

pub use scheduler::{PriorityScheduler, DISPOSITION_ATTRIBUTE, SCHEDULER_EXTENSION};
pub use types::{
    AgingConfig, DeferredTask, ResourceAllocation, SchedulerTaskState, SchedulingPolicy,
    TaskGroup, TaskOptions, TaskPriority, SCHEDULER_ATTRIBUTE,
};
