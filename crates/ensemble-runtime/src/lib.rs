//! # Ensemble Runtime
//!
//! The engines driving the Ensemble orchestration core:
//! - [`ProcessEngine`]: versioned state machines and instance
//!   transitions, interceptable at the process extension points.
//! - [`TaskEngine`]: task registry, execution lifecycle, deferred
//!   scheduling, and cooperative cancellation.
//! - [`bootstrap`]: assembles engines, stores, bus, and the priority
//!   scheduler from configuration.

pub mod bootstrap;
pub mod process_engine;
pub mod task_engine;

pub use bootstrap::{bootstrap, Runtime};
pub use process_engine::ProcessEngine;
pub use task_engine::TaskEngine;
