//! Engine error taxonomy.

use thiserror::Error;

use crate::extension::ExtensionPoint;

/// Errors surfaced by the engines and the extension pipeline.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A registration was malformed (missing type, handler, states...).
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    /// Execute/transition was attempted against an unregistered type.
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// No transition matches the instance state and event.
    #[error("no transition from state '{state}' on event '{event}'")]
    InvalidTransition { state: String, event: String },

    /// An extension was registered before one of its dependencies.
    #[error("extension '{extension}' requires '{missing}' to be registered first")]
    Dependency { extension: String, missing: String },

    /// The task was cancelled before or while running.
    #[error("task cancelled: {0}")]
    Cancelled(String),

    /// A hook in a chain failed; carries the originating point.
    #[error("hook failed at {point}: {message}")]
    Hook {
        point: ExtensionPoint,
        message: String,
    },

    /// A store collaborator failed while checkpointing.
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
}

/// Failure returned by an individual lifecycle hook.
///
/// Kept as a plain message wrapper so plugin crates can fail a chain
/// without depending on the full engine taxonomy.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HookError {
    pub message: String,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
