//! Extension system
//!
//! Every lifecycle event in the runtime flows through a named
//! extension point. Extensions attach hooks to points; the registry
//! executes each point's chain sequentially, passing the context from
//! hook to hook and stopping on the first failure.
//!
//! Cross-cutting concerns (scheduling, circuit breaking, rate
//! limiting, retry, caching) are ordinary consumers of this contract.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::error::{CoreError, HookError};
use crate::event::EngineEvent;
use crate::task::TaskStatus;

// Cooperative cancellation signal shared between the task engine and
// running handlers. Registering an on-cancel callback is select-ing on
// `cancelled()`.
pub use tokio_util::sync::CancellationToken;

/// The closed vocabulary of interception sites.
///
/// Being an enum, unknown point names cannot be registered at all;
/// `as_str` renders the wire-facing names used in events and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionPoint {
    TaskBeforeExecution,
    TaskAfterCompletion,
    TaskOnError,
    ProcessBeforeCreate,
    ProcessAfterCreate,
    ProcessBeforeTransition,
    ProcessAfterTransition,
}

impl ExtensionPoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionPoint::TaskBeforeExecution => "task:beforeExecution",
            ExtensionPoint::TaskAfterCompletion => "task:afterCompletion",
            ExtensionPoint::TaskOnError => "task:onError",
            ExtensionPoint::ProcessBeforeCreate => "process:beforeCreate",
            ExtensionPoint::ProcessAfterCreate => "process:afterCreate",
            ExtensionPoint::ProcessBeforeTransition => "process:beforeTransition",
            ExtensionPoint::ProcessAfterTransition => "process:afterTransition",
        }
    }
}

impl fmt::Display for ExtensionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task-side fields available to task lifecycle points.
#[derive(Debug, Clone, Default)]
pub struct TaskHookData {
    pub execution_id: String,
    pub task_type: String,
    pub input: Value,
    pub attempt: u32,
}

/// Process-side fields available to process lifecycle points.
#[derive(Debug, Clone, Default)]
pub struct ProcessHookData {
    pub instance_id: String,
    pub process_type: String,
    pub state: String,
    pub event: Option<String>,
    pub previous_state: Option<String>,
    pub data: Value,
}

/// Lifecycle context handed down a hook chain.
///
/// A tagged, extensible record: the well-known field groups carry what
/// the engine knows at the point; `attributes` is an open map for
/// plugin-private keys. Hooks receive the previous hook's output by
/// value and return a possibly-modified copy.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub point: ExtensionPoint,
    pub task: Option<TaskHookData>,
    pub process: Option<ProcessHookData>,
    /// Present on the shared after-completion point when the handler
    /// (or an earlier hook) failed; hooks distinguish outcomes by it.
    pub error: Option<String>,
    /// Set by a before-execution hook to finish the execution without
    /// invoking the handler (deferred admission, cache hit, ...).
    pub skip_execution: bool,
    /// Result to record when `skip_execution` is set.
    pub skip_result: Option<Value>,
    /// Status to record when `skip_execution` is set; defaults to
    /// `Completed` when absent.
    pub skip_status: Option<TaskStatus>,
    /// Open map for plugin-private keys.
    pub attributes: Map<String, Value>,
}

impl HookContext {
    pub fn for_task(point: ExtensionPoint, task: TaskHookData) -> Self {
        Self {
            point,
            task: Some(task),
            process: None,
            error: None,
            skip_execution: false,
            skip_result: None,
            skip_status: None,
            attributes: Map::new(),
        }
    }

    pub fn for_process(point: ExtensionPoint, process: ProcessHookData) -> Self {
        Self {
            point,
            task: None,
            process: Some(process),
            error: None,
            skip_execution: false,
            skip_result: None,
            skip_status: None,
            attributes: Map::new(),
        }
    }

    /// Attach an error for the after-completion / on-error points.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Set a plugin-private attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

/// A handler attached to an extension point.
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    fn name(&self) -> &str {
        "hook"
    }

    /// Transform the context or fail the chain.
    async fn call(&self, ctx: HookContext) -> Result<HookContext, HookError>;
}

/// A `(point, hook)` pair with its chain priority.
///
/// Chains run in ascending priority; ties break by registration order.
#[derive(Clone)]
pub struct HookRegistration {
    pub point: ExtensionPoint,
    pub priority: i32,
    pub hook: Arc<dyn LifecycleHook>,
}

impl HookRegistration {
    pub fn new(point: ExtensionPoint, priority: i32, hook: Arc<dyn LifecycleHook>) -> Self {
        Self {
            point,
            priority,
            hook,
        }
    }
}

/// A named bundle of hook registrations with declared dependencies.
pub struct Extension {
    pub name: String,
    pub dependencies: Vec<String>,
    pub registrations: Vec<HookRegistration>,
}

impl Extension {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            registrations: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    pub fn with_hook(
        mut self,
        point: ExtensionPoint,
        priority: i32,
        hook: Arc<dyn LifecycleHook>,
    ) -> Self {
        self.registrations
            .push(HookRegistration::new(point, priority, hook));
        self
    }
}

/// Side filter applied to engine events before bus publication.
///
/// Unordered and independent of the point pipeline; returning `None`
/// drops the event.
pub trait EventInterceptor: Send + Sync {
    fn intercept(&self, event: EngineEvent) -> Option<EngineEvent>;
}

#[derive(Clone)]
struct ChainEntry {
    priority: i32,
    seq: u64,
    extension: String,
    hook: Arc<dyn LifecycleHook>,
}

/// Registry of extension points, hook chains, and event interceptors.
#[derive(Default)]
pub struct ExtensionRegistry {
    chains: RwLock<HashMap<ExtensionPoint, Vec<ChainEntry>>>,
    registered: RwLock<Vec<String>>,
    interceptors: RwLock<Vec<Arc<dyn EventInterceptor>>>,
    seq: AtomicU64,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent; later calls for the same point are no-ops.
    pub async fn register_extension_point(&self, point: ExtensionPoint) {
        self.chains.write().await.entry(point).or_default();
    }

    /// Register an extension, splicing its hooks into the point chains.
    ///
    /// Fails with `CoreError::Dependency` when a declared dependency
    /// has not been registered yet; nothing is added in that case.
    pub async fn register_extension(&self, extension: Extension) -> Result<(), CoreError> {
        {
            let registered = self.registered.read().await;
            for dep in &extension.dependencies {
                if !registered.iter().any(|name| name == dep) {
                    return Err(CoreError::Dependency {
                        extension: extension.name.clone(),
                        missing: dep.clone(),
                    });
                }
            }
        }

        let mut chains = self.chains.write().await;
        for registration in extension.registrations {
            let entry = ChainEntry {
                priority: registration.priority,
                seq: self.seq.fetch_add(1, Ordering::SeqCst),
                extension: extension.name.clone(),
                hook: registration.hook,
            };
            let chain = chains.entry(registration.point).or_default();
            chain.push(entry);
            chain.sort_by_key(|e| (e.priority, e.seq));
        }
        drop(chains);

        self.registered.write().await.push(extension.name);
        Ok(())
    }

    /// Names of registered extensions, in registration order.
    pub async fn registered_extensions(&self) -> Vec<String> {
        self.registered.read().await.clone()
    }

    /// Run the chain for `point`, threading the context through it.
    ///
    /// Strictly sequential: each hook awaits the previous one and
    /// receives its output. The first failure stops the chain and is
    /// returned as `CoreError::Hook`; rollback is the caller's
    /// responsibility. An empty chain returns the context unchanged.
    pub async fn execute_point(
        &self,
        point: ExtensionPoint,
        mut ctx: HookContext,
    ) -> Result<HookContext, CoreError> {
        let chain: Vec<ChainEntry> = {
            let chains = self.chains.read().await;
            match chains.get(&point) {
                Some(chain) => chain.clone(),
                None => return Ok(ctx),
            }
        };

        for entry in chain {
            tracing::debug!(
                point = %point,
                extension = %entry.extension,
                hook = entry.hook.name(),
                "running lifecycle hook"
            );
            ctx = entry.hook.call(ctx).await.map_err(|err| {
                tracing::warn!(
                    point = %point,
                    extension = %entry.extension,
                    hook = entry.hook.name(),
                    error = %err,
                    "lifecycle hook failed, aborting chain"
                );
                CoreError::Hook {
                    point,
                    message: err.message,
                }
            })?;
        }
        Ok(ctx)
    }

    /// Register a side event filter.
    pub async fn register_interceptor(&self, interceptor: Arc<dyn EventInterceptor>) {
        self.interceptors.write().await.push(interceptor);
    }

    /// Apply all interceptors to an event; `None` means dropped.
    pub async fn intercept_event(&self, event: EngineEvent) -> Option<EngineEvent> {
        let interceptors = self.interceptors.read().await.clone();
        let mut event = event;
        for interceptor in interceptors {
            event = interceptor.intercept(event)?;
        }
        Some(event)
    }
}
