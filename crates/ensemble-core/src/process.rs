//! Process type definitions
//!
//! A process definition is a versioned state machine; an instance is
//! the stateful record owned by the process engine and mutated only
//! through `transition`.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source state selector for a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateMatcher {
    /// Matches one exact state.
    State(String),
    /// Matches any state (`*`). Exact matches take precedence.
    Any,
}

impl StateMatcher {
    pub fn parse(raw: &str) -> Self {
        if raw == "*" {
            StateMatcher::Any
        } else {
            StateMatcher::State(raw.to_string())
        }
    }

    pub fn matches(&self, state: &str) -> bool {
        match self {
            StateMatcher::State(s) => s == state,
            StateMatcher::Any => true,
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, StateMatcher::State(_))
    }
}

impl fmt::Display for StateMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateMatcher::State(s) => f.write_str(s),
            StateMatcher::Any => f.write_str("*"),
        }
    }
}

/// Predicate evaluated against the instance before a transition fires.
pub type TransitionGuard = Arc<dyn Fn(&ProcessInstance) -> bool + Send + Sync>;

/// Side effect applied to the instance after the state change.
pub type TransitionAction = Arc<dyn Fn(&mut ProcessInstance) + Send + Sync>;

/// One edge of the state machine.
#[derive(Clone)]
pub struct Transition {
    pub from: StateMatcher,
    pub on: String,
    pub to: String,
    pub guard: Option<TransitionGuard>,
    pub action: Option<TransitionAction>,
}

impl Transition {
    pub fn new(from: impl AsRef<str>, on: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: StateMatcher::parse(from.as_ref()),
            on: on.into(),
            to: to.into(),
            guard: None,
            action: None,
        }
    }

    pub fn with_guard<F>(mut self, guard: F) -> Self
    where
        F: Fn(&ProcessInstance) -> bool + Send + Sync + 'static,
    {
        self.guard = Some(Arc::new(guard));
        self
    }

    pub fn with_action<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut ProcessInstance) + Send + Sync + 'static,
    {
        self.action = Some(Arc::new(action));
        self
    }

    /// Whether this transition applies to the instance for `event`.
    pub fn applies(&self, instance: &ProcessInstance, event: &str) -> bool {
        self.on == event
            && self.from.matches(&instance.state)
            && self.guard.as_ref().map_or(true, |g| g(instance))
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("from", &self.from)
            .field("on", &self.on)
            .field("to", &self.to)
            .field("guard", &self.guard.is_some())
            .field("action", &self.action.is_some())
            .finish()
    }
}

/// Versioned state machine definition.
///
/// Multiple versions of one type may coexist; the engine resolves
/// "latest" as the numerically highest semantic version.
#[derive(Debug, Clone)]
pub struct ProcessDefinition {
    pub process_type: String,
    pub version: Version,
    pub initial_state: String,
    pub transitions: Vec<Transition>,
}

impl ProcessDefinition {
    pub fn new(
        process_type: impl Into<String>,
        version: Version,
        initial_state: impl Into<String>,
    ) -> Self {
        Self {
            process_type: process_type.into(),
            version,
            initial_state: initial_state.into(),
            transitions: Vec::new(),
        }
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }
}

/// A live instance of a process definition.
///
/// Bound to the definition version used at creation; mutated only via
/// the process engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub id: String,
    pub process_type: String,
    pub version: Version,
    pub state: String,
    /// Opaque payload carried across transitions.
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessInstance {
    pub fn new(definition: &ProcessDefinition, data: Value) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            process_type: definition.process_type.clone(),
            version: definition.version.clone(),
            state: definition.initial_state.clone(),
            data,
            created_at: now,
            updated_at: now,
        }
    }
}
