//! Process engine
//!
//! Owns versioned process definitions and drives instances through
//! their state machines. Every create and transition flows through the
//! process extension points; a failing before-hook aborts the
//! operation with the instance untouched.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use semver::Version;
use serde_json::Value;
use tokio::sync::RwLock;

use ensemble_core::error::CoreError;
use ensemble_core::event::{EngineEvent, EventBus};
use ensemble_core::extension::{ExtensionPoint, ExtensionRegistry, HookContext, ProcessHookData};
use ensemble_core::process::{ProcessDefinition, ProcessInstance, Transition};
use ensemble_core::store::ProcessStore;

pub struct ProcessEngine {
    registry: Arc<ExtensionRegistry>,
    store: Arc<dyn ProcessStore>,
    bus: Arc<dyn EventBus>,
    /// Definitions keyed by type, then indexed by version.
    definitions: RwLock<HashMap<String, BTreeMap<Version, Arc<ProcessDefinition>>>>,
}

impl ProcessEngine {
    pub fn new(
        registry: Arc<ExtensionRegistry>,
        store: Arc<dyn ProcessStore>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            registry,
            store,
            bus,
            definitions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a process definition.
    ///
    /// Re-registering an existing `(type, version)` pair replaces the
    /// prior definition.
    pub async fn register_definition(&self, definition: ProcessDefinition) -> Result<(), CoreError> {
        if definition.process_type.is_empty() {
            return Err(CoreError::InvalidDefinition(
                "process definition requires a type".to_string(),
            ));
        }
        if definition.initial_state.is_empty() {
            return Err(CoreError::InvalidDefinition(format!(
                "process '{}' requires an initial state",
                definition.process_type
            )));
        }
        if definition.transitions.is_empty() {
            return Err(CoreError::InvalidDefinition(format!(
                "process '{}' requires at least one transition",
                definition.process_type
            )));
        }

        let mut definitions = self.definitions.write().await;
        let versions = definitions
            .entry(definition.process_type.clone())
            .or_default();
        tracing::info!(
            process_type = %definition.process_type,
            version = %definition.version,
            "registered process definition"
        );
        versions.insert(definition.version.clone(), Arc::new(definition));
        Ok(())
    }

    /// Resolve a definition: explicit version, or the numerically
    /// highest registered version when none is given.
    pub async fn definition(
        &self,
        process_type: &str,
        version: Option<&Version>,
    ) -> Option<Arc<ProcessDefinition>> {
        let definitions = self.definitions.read().await;
        let versions = definitions.get(process_type)?;
        match version {
            Some(version) => versions.get(version).cloned(),
            None => versions.values().next_back().cloned(),
        }
    }

    /// Create a new process instance in the definition's initial state.
    pub async fn create_process(
        &self,
        process_type: &str,
        data: Value,
        version: Option<&Version>,
    ) -> Result<ProcessInstance, CoreError> {
        let definition = self
            .definition(process_type, version)
            .await
            .ok_or_else(|| CoreError::UnknownType(process_type.to_string()))?;

        let ctx = HookContext::for_process(
            ExtensionPoint::ProcessBeforeCreate,
            ProcessHookData {
                instance_id: String::new(),
                process_type: definition.process_type.clone(),
                state: definition.initial_state.clone(),
                event: None,
                previous_state: None,
                data: data.clone(),
            },
        );
        self.registry
            .execute_point(ExtensionPoint::ProcessBeforeCreate, ctx)
            .await?;

        let instance = ProcessInstance::new(&definition, data);
        self.store.save(&instance).await?;
        tracing::info!(
            instance_id = %instance.id,
            process_type = %instance.process_type,
            state = %instance.state,
            "created process instance"
        );

        let ctx = HookContext::for_process(
            ExtensionPoint::ProcessAfterCreate,
            ProcessHookData {
                instance_id: instance.id.clone(),
                process_type: instance.process_type.clone(),
                state: instance.state.clone(),
                event: None,
                previous_state: None,
                data: instance.data.clone(),
            },
        );
        self.registry
            .execute_point(ExtensionPoint::ProcessAfterCreate, ctx)
            .await?;

        self.publish(EngineEvent::process_created(
            instance.id.clone(),
            instance.process_type.clone(),
            instance.version.to_string(),
            instance.state.clone(),
        ))
        .await;

        Ok(instance)
    }

    /// Apply `event` to the instance.
    ///
    /// A failing `process:beforeTransition` hook, or an event with no
    /// matching transition, leaves the instance untouched. Exact-state
    /// transitions win over wildcard ones for the same event.
    pub async fn transition(
        &self,
        instance: &mut ProcessInstance,
        event: &str,
    ) -> Result<(), CoreError> {
        let definition = self
            .definition(&instance.process_type, Some(&instance.version.clone()))
            .await
            .ok_or_else(|| CoreError::UnknownType(instance.process_type.clone()))?;

        let ctx = HookContext::for_process(
            ExtensionPoint::ProcessBeforeTransition,
            ProcessHookData {
                instance_id: instance.id.clone(),
                process_type: instance.process_type.clone(),
                state: instance.state.clone(),
                event: Some(event.to_string()),
                previous_state: None,
                data: instance.data.clone(),
            },
        );
        self.registry
            .execute_point(ExtensionPoint::ProcessBeforeTransition, ctx)
            .await?;

        let transition = Self::select_transition(&definition, instance, event).ok_or_else(|| {
            CoreError::InvalidTransition {
                state: instance.state.clone(),
                event: event.to_string(),
            }
        })?;

        let previous_state = instance.state.clone();
        instance.state = transition.to.clone();
        instance.updated_at = Utc::now();
        if let Some(action) = &transition.action {
            action(instance);
        }
        self.store.save(instance).await?;
        tracing::info!(
            instance_id = %instance.id,
            event = %event,
            from = %previous_state,
            to = %instance.state,
            "process transitioned"
        );

        let ctx = HookContext::for_process(
            ExtensionPoint::ProcessAfterTransition,
            ProcessHookData {
                instance_id: instance.id.clone(),
                process_type: instance.process_type.clone(),
                state: instance.state.clone(),
                event: Some(event.to_string()),
                previous_state: Some(previous_state.clone()),
                data: instance.data.clone(),
            },
        );
        self.registry
            .execute_point(ExtensionPoint::ProcessAfterTransition, ctx)
            .await?;

        self.publish(EngineEvent::process_transitioned(
            instance.id.clone(),
            instance.process_type.clone(),
            event,
            previous_state,
            instance.state.clone(),
        ))
        .await;

        Ok(())
    }

    /// Whether `event` has an applicable transition right now. Pure.
    pub async fn is_transition_valid(&self, instance: &ProcessInstance, event: &str) -> bool {
        let Some(definition) = self
            .definition(&instance.process_type, Some(&instance.version.clone()))
            .await
        else {
            return false;
        };
        definition
            .transitions
            .iter()
            .any(|t| t.applies(instance, event))
    }

    /// Events with an applicable transition from the current state.
    /// Pure; preserves definition order, deduplicated.
    pub async fn valid_transitions(&self, instance: &ProcessInstance) -> Vec<String> {
        let Some(definition) = self
            .definition(&instance.process_type, Some(&instance.version.clone()))
            .await
        else {
            return Vec::new();
        };
        let mut events = Vec::new();
        for transition in &definition.transitions {
            if transition.from.matches(&instance.state)
                && transition.guard.as_ref().map_or(true, |g| g(instance))
                && !events.contains(&transition.on)
            {
                events.push(transition.on.clone());
            }
        }
        events
    }

    pub async fn get_instance(&self, instance_id: &str) -> Result<Option<ProcessInstance>, CoreError> {
        Ok(self.store.load(instance_id).await?)
    }

    fn select_transition<'a>(
        definition: &'a ProcessDefinition,
        instance: &ProcessInstance,
        event: &str,
    ) -> Option<&'a Transition> {
        let mut wildcard = None;
        for transition in &definition.transitions {
            if !transition.applies(instance, event) {
                continue;
            }
            if transition.from.is_exact() {
                return Some(transition);
            }
            if wildcard.is_none() {
                wildcard = Some(transition);
            }
        }
        wildcard
    }

    /// Best-effort publication: interceptors may drop the event, and a
    /// failing bus is logged, never fatal to the operation.
    async fn publish(&self, event: EngineEvent) {
        let Some(event) = self.registry.intercept_event(event).await else {
            return;
        };
        if let Err(err) = self.bus.publish(event).await {
            tracing::warn!(error = %err, "event publication failed");
        }
    }
}
