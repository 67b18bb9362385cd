//! Configuration loading and validation.

use std::path::Path;

use thiserror::Error;

use crate::model::EnsembleConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Load and validate a YAML configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<EnsembleConfig, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let config = parse_config(&raw)?;
    tracing::debug!(path = %path.display(), "loaded runtime configuration");
    Ok(config)
}

/// Parse and validate a YAML configuration document.
pub fn parse_config(raw: &str) -> Result<EnsembleConfig, ConfigError> {
    let config: EnsembleConfig = serde_yaml::from_str(raw)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &EnsembleConfig) -> Result<(), ConfigError> {
    if config.scheduler.max_concurrent_tasks == 0 {
        return Err(ConfigError::Invalid(
            "scheduler.max_concurrent_tasks must be at least 1".to_string(),
        ));
    }
    if config.bus.capacity == 0 {
        return Err(ConfigError::Invalid(
            "bus.capacity must be at least 1".to_string(),
        ));
    }
    if config.stores.max_executions == 0 {
        return Err(ConfigError::Invalid(
            "stores.max_executions must be at least 1".to_string(),
        ));
    }
    for (name, group) in &config.scheduler.groups {
        if group.max_concurrent == 0 {
            return Err(ConfigError::Invalid(format!(
                "group '{name}' must allow at least 1 concurrent task"
            )));
        }
    }
    for (name, capacity) in &config.scheduler.resources {
        if *capacity == 0 {
            return Err(ConfigError::Invalid(format!(
                "resource '{name}' must have capacity of at least 1"
            )));
        }
    }
    Ok(())
}
