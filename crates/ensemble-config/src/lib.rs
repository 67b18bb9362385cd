//! Configuration for the Ensemble runtime.
//!
//! YAML documents with serde defaults throughout: every section is
//! optional and an empty document configures a working runtime.

pub mod loader;
pub mod model;

pub use loader::{load_config, parse_config, ConfigError};
pub use model::{
    AgingSection, BusSection, EnsembleConfig, GroupSection, SchedulerSection, StoresSection,
};
