//! Task engine
//!
//! Owns task definitions and execution lifecycle records. Every
//! execution runs the `task:beforeExecution` chain first; a hook may
//! finish the execution without invoking the handler (deferred
//! admission, cache hit). Terminal outcomes always flow through
//! `task:afterCompletion`, success or failure, exactly once.
//!
//! Cancellation is cooperative: cancelling a running execution signals
//! its token; the status still comes from the handler's own outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use ensemble_core::error::CoreError;
use ensemble_core::event::{EngineEvent, EventBus};
use ensemble_core::extension::{
    CancellationToken, ExtensionPoint, ExtensionRegistry, HookContext, TaskHookData,
};
use ensemble_core::store::ExecutionStore;
use ensemble_core::task::{TaskDefinition, TaskExecution, TaskStatus};

/// Context attribute carrying the execution id. Stamped by the engine
/// before the before-execution chain so a deferred execution keeps its
/// identity when it is relaunched, and its Pending checkpoint resolves
/// to a terminal record under the same id.
pub const EXECUTION_ID_ATTRIBUTE: &str = "execution_id";

pub struct TaskEngine {
    registry: Arc<ExtensionRegistry>,
    store: Arc<dyn ExecutionStore>,
    bus: Arc<dyn EventBus>,
    definitions: RwLock<HashMap<String, TaskDefinition>>,
    /// Cancellation tokens of in-flight executions, keyed by id.
    running: Mutex<HashMap<String, CancellationToken>>,
    /// Pending deferred schedules, keyed by schedule id.
    scheduled: Mutex<HashMap<String, CancellationToken>>,
}

impl TaskEngine {
    pub fn new(
        registry: Arc<ExtensionRegistry>,
        store: Arc<dyn ExecutionStore>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            registry,
            store,
            bus,
            definitions: RwLock::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            scheduled: Mutex::new(HashMap::new()),
        }
    }

    /// Register a task definition; re-registering an id replaces it.
    pub async fn register_task_definition(&self, definition: TaskDefinition) -> Result<(), CoreError> {
        if definition.id.is_empty() {
            return Err(CoreError::InvalidDefinition(
                "task definition requires an id".to_string(),
            ));
        }
        tracing::info!(task_type = %definition.id, "registered task definition");
        self.definitions
            .write()
            .await
            .insert(definition.id.clone(), definition);
        Ok(())
    }

    /// Execute a registered task to a terminal (or deferred) record.
    pub async fn execute(&self, task_type: &str, input: Value) -> Result<TaskExecution, CoreError> {
        self.execute_with_attributes(task_type, input, Map::new())
            .await
    }

    /// Execute with caller-supplied context attributes (scheduling
    /// directives and other plugin-private keys).
    pub async fn execute_with_attributes(
        &self,
        task_type: &str,
        input: Value,
        attributes: Map<String, Value>,
    ) -> Result<TaskExecution, CoreError> {
        let definition = self
            .definitions
            .read()
            .await
            .get(task_type)
            .cloned()
            .ok_or_else(|| CoreError::UnknownType(task_type.to_string()))?;

        let mut execution = TaskExecution::new(task_type, input.clone());
        if let Some(id) = attributes
            .get(EXECUTION_ID_ATTRIBUTE)
            .and_then(Value::as_str)
        {
            // Relaunch of a parked execution; keep its identity.
            execution.id = id.to_string();
        }
        let token = CancellationToken::new();
        self.running
            .lock()
            .insert(execution.id.clone(), token.clone());

        let mut ctx = HookContext::for_task(
            ExtensionPoint::TaskBeforeExecution,
            TaskHookData {
                execution_id: execution.id.clone(),
                task_type: execution.task_type.clone(),
                input: input.clone(),
                attempt: execution.attempts,
            },
        );
        ctx.attributes = attributes.clone();
        ctx.attributes.insert(
            EXECUTION_ID_ATTRIBUTE.to_string(),
            Value::String(execution.id.clone()),
        );

        let ctx = match self
            .registry
            .execute_point(ExtensionPoint::TaskBeforeExecution, ctx)
            .await
        {
            Ok(ctx) => ctx,
            Err(err) => {
                // The chain failed before the handler ran; terminate
                // the execution so cleanup hooks still observe it.
                self.running.lock().remove(&execution.id);
                execution.fail(err.to_string());
                self.finish(&execution, attributes).await;
                return Err(err);
            }
        };

        if ctx.skip_execution {
            self.running.lock().remove(&execution.id);
            let status = ctx.skip_status.unwrap_or(TaskStatus::Completed);
            match status {
                TaskStatus::Pending => {
                    // Deferred admission: parked, not terminal. No
                    // after-completion chain until it actually ends.
                    execution.defer();
                    self.checkpoint(&execution).await;
                    self.publish(EngineEvent::task_deferred(
                        execution.id.clone(),
                        execution.task_type.clone(),
                    ))
                    .await;
                    tracing::debug!(execution_id = %execution.id, "execution deferred");
                    return Ok(execution);
                }
                TaskStatus::Cancelled => execution.cancel(
                    ctx.error
                        .clone()
                        .unwrap_or_else(|| "cancelled by lifecycle hook".to_string()),
                ),
                TaskStatus::Failed => execution.fail(
                    ctx.error
                        .clone()
                        .unwrap_or_else(|| "failed by lifecycle hook".to_string()),
                ),
                TaskStatus::Completed | TaskStatus::Running => {
                    execution.complete(ctx.skip_result.clone())
                }
            }
            self.finish(&execution, ctx.attributes).await;
            return Ok(execution);
        }

        if token.is_cancelled() {
            self.running.lock().remove(&execution.id);
            execution.cancel("cancelled before start");
            self.finish(&execution, ctx.attributes).await;
            return Err(CoreError::Cancelled(execution.id));
        }

        self.publish(EngineEvent::task_started(
            execution.id.clone(),
            execution.task_type.clone(),
        ))
        .await;

        // Hooks may have rewritten the input.
        let handler_input = ctx
            .task
            .as_ref()
            .map(|t| t.input.clone())
            .unwrap_or(input);
        let outcome = definition.handler.run(handler_input, token.clone()).await;
        self.running.lock().remove(&execution.id);

        match outcome {
            Ok(value) => execution.complete(Some(value)),
            Err(err) => {
                if token.is_cancelled() {
                    execution.cancel(err);
                } else {
                    execution.fail(err);
                }
            }
        }

        if execution.status == TaskStatus::Failed {
            self.run_on_error(&execution, ctx.attributes.clone()).await;
        }
        self.finish(&execution, ctx.attributes).await;
        Ok(execution)
    }

    /// Commit to executing the task at `at`; past times fire
    /// immediately. Returns a schedule id usable with [`cancel`].
    ///
    /// [`cancel`]: TaskEngine::cancel
    pub async fn schedule(
        self: &Arc<Self>,
        task_type: &str,
        input: Value,
        at: DateTime<Utc>,
    ) -> Result<String, CoreError> {
        self.schedule_with_attributes(task_type, input, Map::new(), at)
            .await
    }

    pub async fn schedule_with_attributes(
        self: &Arc<Self>,
        task_type: &str,
        input: Value,
        attributes: Map<String, Value>,
        at: DateTime<Utc>,
    ) -> Result<String, CoreError> {
        if !self.definitions.read().await.contains_key(task_type) {
            return Err(CoreError::UnknownType(task_type.to_string()));
        }

        let schedule_id = uuid::Uuid::new_v4().to_string();
        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let token = CancellationToken::new();
        self.scheduled
            .lock()
            .insert(schedule_id.clone(), token.clone());
        tracing::debug!(schedule_id = %schedule_id, task_type = %task_type, ?delay, "task scheduled");

        let engine = Arc::clone(self);
        let id = schedule_id.clone();
        let task_type = task_type.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            engine.scheduled.lock().remove(&id);
            if token.is_cancelled() {
                return;
            }
            if let Err(err) = engine
                .execute_with_attributes(&task_type, input, attributes)
                .await
            {
                tracing::warn!(schedule_id = %id, error = %err, "scheduled execution failed");
            }
        });

        Ok(schedule_id)
    }

    /// Cancel a schedule or a running execution by id.
    ///
    /// A scheduled-but-unstarted task is removed and never runs. A
    /// running execution gets its token signalled; the status still
    /// transitions through the handler's own outcome. Unknown ids
    /// return false.
    pub fn cancel(&self, id: &str) -> bool {
        if let Some(token) = self.scheduled.lock().remove(id) {
            token.cancel();
            tracing::info!(schedule_id = %id, "scheduled task cancelled");
            return true;
        }
        if let Some(token) = self.running.lock().get(id) {
            token.cancel();
            tracing::info!(execution_id = %id, "running execution signalled for cancellation");
            return true;
        }
        false
    }

    pub async fn get_execution(&self, execution_id: &str) -> Result<Option<TaskExecution>, CoreError> {
        Ok(self.store.load(execution_id).await?)
    }

    /// Ids of executions currently holding a live token.
    pub fn running_executions(&self) -> Vec<String> {
        self.running.lock().keys().cloned().collect()
    }

    /// Run the terminal chain, checkpoint, and publish. Chain and
    /// collaborator failures here are logged, never re-raised, so the
    /// caller still receives the terminal record.
    async fn finish(&self, execution: &TaskExecution, attributes: Map<String, Value>) {
        let mut ctx = HookContext::for_task(
            ExtensionPoint::TaskAfterCompletion,
            TaskHookData {
                execution_id: execution.id.clone(),
                task_type: execution.task_type.clone(),
                input: execution.input.clone(),
                attempt: execution.attempts,
            },
        );
        ctx.error = execution.error.clone();
        ctx.attributes = attributes;
        if let Err(err) = self
            .registry
            .execute_point(ExtensionPoint::TaskAfterCompletion, ctx)
            .await
        {
            tracing::warn!(
                execution_id = %execution.id,
                error = %err,
                "after-completion chain failed"
            );
        }

        self.checkpoint(execution).await;

        let event = match execution.status {
            TaskStatus::Completed => EngineEvent::task_completed(
                execution.id.clone(),
                execution.task_type.clone(),
                execution.result.clone(),
            ),
            TaskStatus::Failed => EngineEvent::task_failed(
                execution.id.clone(),
                execution.task_type.clone(),
                execution.error.clone().unwrap_or_default(),
            ),
            TaskStatus::Cancelled => EngineEvent::task_cancelled(
                execution.id.clone(),
                execution.task_type.clone(),
            ),
            TaskStatus::Pending | TaskStatus::Running => return,
        };
        self.publish(event).await;
    }

    async fn run_on_error(&self, execution: &TaskExecution, attributes: Map<String, Value>) {
        let mut ctx = HookContext::for_task(
            ExtensionPoint::TaskOnError,
            TaskHookData {
                execution_id: execution.id.clone(),
                task_type: execution.task_type.clone(),
                input: execution.input.clone(),
                attempt: execution.attempts,
            },
        );
        ctx.error = execution.error.clone();
        ctx.attributes = attributes;
        if let Err(err) = self
            .registry
            .execute_point(ExtensionPoint::TaskOnError, ctx)
            .await
        {
            tracing::warn!(execution_id = %execution.id, error = %err, "on-error chain failed");
        }
    }

    async fn checkpoint(&self, execution: &TaskExecution) {
        if let Err(err) = self.store.save(execution).await {
            tracing::error!(execution_id = %execution.id, error = %err, "execution checkpoint failed");
        }
    }

    async fn publish(&self, event: EngineEvent) {
        let Some(event) = self.registry.intercept_event(event).await else {
            return;
        };
        if let Err(err) = self.bus.publish(event).await {
            tracing::warn!(error = %err, "event publication failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ensemble_core::error::HookError;
    use ensemble_core::extension::{Extension, LifecycleHook};
    use ensemble_core::task::TaskHandler;
    use ensemble_stores::{BroadcastEventBus, InMemoryExecutionStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Doubler;

    #[async_trait]
    impl TaskHandler for Doubler {
        async fn run(&self, input: Value, _cancellation: CancellationToken) -> Result<Value, String> {
            let n = input.get("n").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!({"n": n * 2}))
        }
    }

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TaskHandler for CountingHandler {
        async fn run(&self, _input: Value, _cancellation: CancellationToken) -> Result<Value, String> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    struct Exploding;

    #[async_trait]
    impl TaskHandler for Exploding {
        async fn run(&self, _input: Value, _cancellation: CancellationToken) -> Result<Value, String> {
            Err("boom".to_string())
        }
    }

    struct WaitForCancel;

    #[async_trait]
    impl TaskHandler for WaitForCancel {
        async fn run(&self, _input: Value, cancellation: CancellationToken) -> Result<Value, String> {
            cancellation.cancelled().await;
            Err("cancelled".to_string())
        }
    }

    fn engine_with_registry(registry: Arc<ExtensionRegistry>) -> Arc<TaskEngine> {
        Arc::new(TaskEngine::new(
            registry,
            Arc::new(InMemoryExecutionStore::new()),
            Arc::new(BroadcastEventBus::default()),
        ))
    }

    fn engine() -> Arc<TaskEngine> {
        engine_with_registry(Arc::new(ExtensionRegistry::new()))
    }

    #[tokio::test]
    async fn test_execute_runs_handler_and_persists_terminal_record() {
        let engine = engine();
        engine
            .register_task_definition(TaskDefinition::new("double", Arc::new(Doubler)))
            .await
            .expect("register");

        let execution = engine
            .execute("double", json!({"n": 21}))
            .await
            .expect("execute");
        assert_eq!(execution.status, TaskStatus::Completed);
        assert_eq!(execution.result, Some(json!({"n": 42})));
        assert!(execution.finished_at.is_some());
        assert!(engine.running_executions().is_empty());

        let stored = engine
            .get_execution(&execution.id)
            .await
            .expect("load")
            .expect("stored");
        assert_eq!(stored.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_unknown_type_is_rejected() {
        let engine = engine();
        assert!(matches!(
            engine.execute("missing", Value::Null).await,
            Err(CoreError::UnknownType(_))
        ));
        assert!(matches!(
            engine.schedule("missing", Value::Null, Utc::now()).await,
            Err(CoreError::UnknownType(_))
        ));
    }

    #[tokio::test]
    async fn test_handler_failure_is_a_failed_record_not_an_error() {
        struct CountOnError {
            count: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl LifecycleHook for CountOnError {
            async fn call(&self, ctx: HookContext) -> Result<HookContext, HookError> {
                assert!(ctx.error.is_some());
                self.count.fetch_add(1, Ordering::SeqCst);
                Ok(ctx)
            }
        }

        let registry = Arc::new(ExtensionRegistry::new());
        let on_error_calls = Arc::new(AtomicUsize::new(0));
        registry
            .register_extension(Extension::new("error-counter").with_hook(
                ExtensionPoint::TaskOnError,
                0,
                Arc::new(CountOnError {
                    count: on_error_calls.clone(),
                }),
            ))
            .await
            .expect("register extension");

        let engine = engine_with_registry(registry);
        engine
            .register_task_definition(TaskDefinition::new("explode", Arc::new(Exploding)))
            .await
            .expect("register");

        let execution = engine
            .execute("explode", Value::Null)
            .await
            .expect("execute returns the record");
        assert_eq!(execution.status, TaskStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("boom"));
        assert_eq!(on_error_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_skip_execution_bypasses_handler() {
        struct CacheHit;

        #[async_trait]
        impl LifecycleHook for CacheHit {
            async fn call(&self, mut ctx: HookContext) -> Result<HookContext, HookError> {
                ctx.skip_execution = true;
                ctx.skip_result = Some(json!("cached"));
                Ok(ctx)
            }
        }

        let registry = Arc::new(ExtensionRegistry::new());
        registry
            .register_extension(Extension::new("cache").with_hook(
                ExtensionPoint::TaskBeforeExecution,
                0,
                Arc::new(CacheHit),
            ))
            .await
            .expect("register extension");

        let engine = engine_with_registry(registry);
        let invocations = Arc::new(AtomicUsize::new(0));
        engine
            .register_task_definition(TaskDefinition::new(
                "counted",
                Arc::new(CountingHandler {
                    count: invocations.clone(),
                }),
            ))
            .await
            .expect("register");

        let execution = engine
            .execute("counted", Value::Null)
            .await
            .expect("execute");
        assert_eq!(execution.status, TaskStatus::Completed);
        assert_eq!(execution.result, Some(json!("cached")));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_before_hook_failure_terminates_exactly_once() {
        struct Reject;

        #[async_trait]
        impl LifecycleHook for Reject {
            async fn call(&self, _ctx: HookContext) -> Result<HookContext, HookError> {
                Err(HookError::new("circuit open"))
            }
        }

        struct CountCompletions {
            count: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl LifecycleHook for CountCompletions {
            async fn call(&self, ctx: HookContext) -> Result<HookContext, HookError> {
                self.count.fetch_add(1, Ordering::SeqCst);
                Ok(ctx)
            }
        }

        let registry = Arc::new(ExtensionRegistry::new());
        let completions = Arc::new(AtomicUsize::new(0));
        registry
            .register_extension(
                Extension::new("breaker")
                    .with_hook(ExtensionPoint::TaskBeforeExecution, 0, Arc::new(Reject))
                    .with_hook(
                        ExtensionPoint::TaskAfterCompletion,
                        0,
                        Arc::new(CountCompletions {
                            count: completions.clone(),
                        }),
                    ),
            )
            .await
            .expect("register extension");

        let engine = engine_with_registry(registry);
        let invocations = Arc::new(AtomicUsize::new(0));
        engine
            .register_task_definition(TaskDefinition::new(
                "counted",
                Arc::new(CountingHandler {
                    count: invocations.clone(),
                }),
            ))
            .await
            .expect("register");

        let err = engine
            .execute("counted", Value::Null)
            .await
            .expect_err("chain failure propagates");
        assert!(matches!(err, CoreError::Hook { .. }));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert!(engine.running_executions().is_empty());
    }

    #[tokio::test]
    async fn test_token_cancelled_during_before_chain_skips_handler() {
        struct CancelSelf {
            engine: Arc<TaskEngine>,
        }

        #[async_trait]
        impl LifecycleHook for CancelSelf {
            async fn call(&self, ctx: HookContext) -> Result<HookContext, HookError> {
                let id = ctx
                    .task
                    .as_ref()
                    .map(|t| t.execution_id.clone())
                    .unwrap_or_default();
                assert!(self.engine.cancel(&id));
                Ok(ctx)
            }
        }

        struct CountCompletions {
            count: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl LifecycleHook for CountCompletions {
            async fn call(&self, ctx: HookContext) -> Result<HookContext, HookError> {
                self.count.fetch_add(1, Ordering::SeqCst);
                Ok(ctx)
            }
        }

        let registry = Arc::new(ExtensionRegistry::new());
        let engine = engine_with_registry(registry.clone());
        let completions = Arc::new(AtomicUsize::new(0));
        registry
            .register_extension(
                Extension::new("canceller")
                    .with_hook(
                        ExtensionPoint::TaskBeforeExecution,
                        0,
                        Arc::new(CancelSelf {
                            engine: engine.clone(),
                        }),
                    )
                    .with_hook(
                        ExtensionPoint::TaskAfterCompletion,
                        0,
                        Arc::new(CountCompletions {
                            count: completions.clone(),
                        }),
                    ),
            )
            .await
            .expect("register extension");

        let invocations = Arc::new(AtomicUsize::new(0));
        engine
            .register_task_definition(TaskDefinition::new(
                "counted",
                Arc::new(CountingHandler {
                    count: invocations.clone(),
                }),
            ))
            .await
            .expect("register");

        let err = engine
            .execute("counted", Value::Null)
            .await
            .expect_err("cancelled before the handler");
        let CoreError::Cancelled(execution_id) = err else {
            panic!("unexpected error: {err}");
        };

        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        let stored = engine
            .get_execution(&execution_id)
            .await
            .expect("load")
            .expect("stored");
        assert_eq!(stored.status, TaskStatus::Cancelled);
        assert!(engine.running_executions().is_empty());
    }

    #[tokio::test]
    async fn test_relaunched_execution_keeps_its_identity() {
        struct DeferOnce {
            deferred: Arc<std::sync::atomic::AtomicBool>,
        }

        #[async_trait]
        impl LifecycleHook for DeferOnce {
            async fn call(&self, mut ctx: HookContext) -> Result<HookContext, HookError> {
                if !self.deferred.swap(true, Ordering::SeqCst) {
                    ctx.skip_execution = true;
                    ctx.skip_status = Some(TaskStatus::Pending);
                }
                Ok(ctx)
            }
        }

        let registry = Arc::new(ExtensionRegistry::new());
        registry
            .register_extension(Extension::new("admission").with_hook(
                ExtensionPoint::TaskBeforeExecution,
                0,
                Arc::new(DeferOnce {
                    deferred: Arc::new(std::sync::atomic::AtomicBool::new(false)),
                }),
            ))
            .await
            .expect("register extension");

        let engine = engine_with_registry(registry);
        engine
            .register_task_definition(TaskDefinition::new("double", Arc::new(Doubler)))
            .await
            .expect("register");

        let parked = engine
            .execute("double", json!({"n": 4}))
            .await
            .expect("execute");
        assert_eq!(parked.status, TaskStatus::Pending);

        // relaunch the parked execution the way the admission pump
        // would: same attributes, same execution id
        let mut attributes = Map::new();
        attributes.insert(EXECUTION_ID_ATTRIBUTE.to_string(), json!(parked.id));
        let finished = engine
            .execute_with_attributes("double", json!({"n": 4}), attributes)
            .await
            .expect("relaunch");
        assert_eq!(finished.id, parked.id);
        assert_eq!(finished.status, TaskStatus::Completed);

        // the Pending checkpoint resolved under the caller's id
        let stored = engine
            .get_execution(&parked.id)
            .await
            .expect("load")
            .expect("stored");
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.result, Some(json!({"n": 8})));
    }

    #[tokio::test]
    async fn test_cancelling_a_schedule_prevents_the_handler() {
        let engine = engine();
        let invocations = Arc::new(AtomicUsize::new(0));
        engine
            .register_task_definition(TaskDefinition::new(
                "counted",
                Arc::new(CountingHandler {
                    count: invocations.clone(),
                }),
            ))
            .await
            .expect("register");

        let schedule_id = engine
            .schedule(
                "counted",
                Value::Null,
                Utc::now() + chrono::Duration::milliseconds(150),
            )
            .await
            .expect("schedule");

        assert!(engine.cancel(&schedule_id));
        assert!(!engine.cancel(&schedule_id));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_past_schedule_fires_immediately() {
        let engine = engine();
        let invocations = Arc::new(AtomicUsize::new(0));
        engine
            .register_task_definition(TaskDefinition::new(
                "counted",
                Arc::new(CountingHandler {
                    count: invocations.clone(),
                }),
            ))
            .await
            .expect("register");

        engine
            .schedule(
                "counted",
                Value::Null,
                Utc::now() - chrono::Duration::seconds(5),
            )
            .await
            .expect("schedule");

        let mut waited = Duration::ZERO;
        while invocations.load(Ordering::SeqCst) == 0 && waited < Duration::from_secs(2) {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += Duration::from_millis(20);
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_of_running_execution_is_cooperative() {
        let engine = engine();
        engine
            .register_task_definition(TaskDefinition::new("wait", Arc::new(WaitForCancel)))
            .await
            .expect("register");

        let worker = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute("wait", Value::Null).await })
        };

        let mut waited = Duration::ZERO;
        let execution_id = loop {
            if let Some(id) = engine.running_executions().pop() {
                break id;
            }
            assert!(waited < Duration::from_secs(2), "execution never started");
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        };

        assert!(engine.cancel(&execution_id));
        let execution = worker.await.expect("join").expect("execute");
        assert_eq!(execution.status, TaskStatus::Cancelled);
        assert!(!engine.cancel(&execution_id));
    }
}
