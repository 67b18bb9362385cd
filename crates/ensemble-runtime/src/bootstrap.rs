//! Runtime assembly.
//!
//! Builds the registry, engines, stores, bus, and scheduler from a
//! configuration and wires the scheduler's admission stream back into
//! the task engine so drain-admitted tasks are relaunched.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use ensemble_config::EnsembleConfig;
use ensemble_core::error::CoreError;
use ensemble_core::extension::{ExtensionPoint, ExtensionRegistry};
use ensemble_scheduler::{AgingConfig, PriorityScheduler, TaskGroup};
use ensemble_stores::{BroadcastEventBus, InMemoryExecutionStore, InMemoryProcessStore};

use crate::process_engine::ProcessEngine;
use crate::task_engine::TaskEngine;

const EXTENSION_POINTS: [ExtensionPoint; 7] = [
    ExtensionPoint::TaskBeforeExecution,
    ExtensionPoint::TaskAfterCompletion,
    ExtensionPoint::TaskOnError,
    ExtensionPoint::ProcessBeforeCreate,
    ExtensionPoint::ProcessAfterCreate,
    ExtensionPoint::ProcessBeforeTransition,
    ExtensionPoint::ProcessAfterTransition,
];

/// An assembled runtime: engines, registry, bus, and scheduler.
pub struct Runtime {
    pub registry: Arc<ExtensionRegistry>,
    pub bus: Arc<BroadcastEventBus>,
    pub process_engine: Arc<ProcessEngine>,
    pub task_engine: Arc<TaskEngine>,
    pub scheduler: Arc<PriorityScheduler>,
    admission_pump: Mutex<Option<JoinHandle<()>>>,
}

impl Runtime {
    /// Stop the background relaunch pump. Engines stay usable; tasks
    /// admitted by later drains are no longer relaunched.
    pub fn shutdown(&self) {
        if let Some(pump) = self.admission_pump.lock().take() {
            pump.abort();
            tracing::info!("admission pump stopped");
        }
    }
}

/// Assemble a runtime from configuration.
pub async fn bootstrap(config: EnsembleConfig) -> Result<Runtime, CoreError> {
    let bus = Arc::new(BroadcastEventBus::new(config.bus.capacity));
    let registry = Arc::new(ExtensionRegistry::new());
    for point in EXTENSION_POINTS {
        registry.register_extension_point(point).await;
    }

    let scheduler = Arc::new(PriorityScheduler::with_max_concurrent(
        config.scheduler.max_concurrent_tasks,
    ));
    scheduler.set_scheduling_policy(config.scheduler.policy);
    scheduler.enable_preemption(config.scheduler.preemption_enabled);
    scheduler.configure_aging(AgingConfig {
        enabled: config.scheduler.aging.enabled,
        waiting_time_threshold: Duration::from_millis(
            config.scheduler.aging.waiting_time_threshold_ms,
        ),
        boost: config.scheduler.aging.boost,
    });
    for (name, capacity) in &config.scheduler.resources {
        scheduler.define_resource(name, *capacity);
    }
    for (name, group) in &config.scheduler.groups {
        scheduler.create_task_group(
            name,
            TaskGroup {
                priority: group.priority,
                max_concurrent: group.max_concurrent,
            },
        );
    }
    registry.register_extension(scheduler.extension()).await?;

    let process_engine = Arc::new(ProcessEngine::new(
        registry.clone(),
        Arc::new(InMemoryProcessStore::new()),
        bus.clone(),
    ));
    let task_engine = Arc::new(TaskEngine::new(
        registry.clone(),
        Arc::new(InMemoryExecutionStore::with_max_executions(
            config.stores.max_executions,
        )),
        bus.clone(),
    ));

    let admission_pump = spawn_admission_pump(&scheduler, &task_engine);
    tracing::info!(
        max_concurrent = config.scheduler.max_concurrent_tasks,
        policy = ?config.scheduler.policy,
        "runtime assembled"
    );

    Ok(Runtime {
        registry,
        bus,
        process_engine,
        task_engine,
        scheduler,
        admission_pump: Mutex::new(admission_pump),
    })
}

/// Relaunch drain-admitted tasks through the task engine. Each launch
/// runs on its own spawned task so a long handler cannot stall later
/// admissions.
fn spawn_admission_pump(
    scheduler: &Arc<PriorityScheduler>,
    task_engine: &Arc<TaskEngine>,
) -> Option<JoinHandle<()>> {
    let mut launches = scheduler.admission_stream()?;
    let engine = Arc::clone(task_engine);
    Some(tokio::spawn(async move {
        while let Some(launch) = launches.recv().await {
            tracing::debug!(task_id = %launch.task_id, "relaunching admitted task");
            let engine = engine.clone();
            tokio::spawn(async move {
                if let Err(err) = engine
                    .execute_with_attributes(&launch.task_type, launch.input, launch.attributes)
                    .await
                {
                    tracing::warn!(
                        task_id = %launch.task_id,
                        error = %err,
                        "relaunch of admitted task failed"
                    );
                }
            });
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ensemble_core::extension::CancellationToken;
    use ensemble_core::task::{TaskDefinition, TaskHandler, TaskStatus};
    use ensemble_scheduler::SCHEDULER_EXTENSION;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::watch;

    struct GatedHandler {
        gate: watch::Receiver<bool>,
        finished: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TaskHandler for GatedHandler {
        async fn run(&self, _input: Value, _cancellation: CancellationToken) -> Result<Value, String> {
            let mut gate = self.gate.clone();
            gate.wait_for(|open| *open)
                .await
                .map_err(|e| e.to_string())?;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_bootstrap_registers_scheduler_extension() {
        let runtime = bootstrap(EnsembleConfig::default()).await.expect("bootstrap");
        assert_eq!(
            runtime.registry.registered_extensions().await,
            vec![SCHEDULER_EXTENSION.to_string()]
        );
        runtime.shutdown();
    }

    #[tokio::test]
    async fn test_deferred_task_is_relaunched_after_capacity_frees() {
        let mut config = EnsembleConfig::default();
        config.scheduler.max_concurrent_tasks = 1;
        let runtime = bootstrap(config).await.expect("bootstrap");

        let (open_gate, gate) = watch::channel(false);
        let finished = Arc::new(AtomicUsize::new(0));
        runtime
            .task_engine
            .register_task_definition(TaskDefinition::new(
                "gated",
                Arc::new(GatedHandler {
                    gate,
                    finished: finished.clone(),
                }),
            ))
            .await
            .expect("register");

        let first = {
            let engine = runtime.task_engine.clone();
            tokio::spawn(async move { engine.execute("gated", json!({"seq": 1})).await })
        };

        let mut waited = Duration::ZERO;
        while runtime.scheduler.running_tasks().is_empty() {
            assert!(waited < Duration::from_secs(2), "first task never admitted");
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }

        // capacity is 1, so the second submission parks as pending
        let second = runtime
            .task_engine
            .execute("gated", json!({"seq": 2}))
            .await
            .expect("execute");
        assert_eq!(second.status, TaskStatus::Pending);
        assert_eq!(runtime.scheduler.queued_tasks().len(), 1);

        open_gate.send(true).expect("gate");
        let first = first.await.expect("join").expect("execute");
        assert_eq!(first.status, TaskStatus::Completed);

        // the drain relaunches the parked task through the pump
        let mut waited = Duration::ZERO;
        while finished.load(Ordering::SeqCst) < 2 {
            assert!(waited < Duration::from_secs(2), "deferred task never ran");
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }
        assert!(runtime.scheduler.queued_tasks().is_empty());

        // the parked record resolves to a terminal state under the id
        // the caller got back
        let mut waited = Duration::ZERO;
        loop {
            let stored = runtime
                .task_engine
                .get_execution(&second.id)
                .await
                .expect("load")
                .expect("stored");
            if stored.status == TaskStatus::Completed {
                break;
            }
            assert!(waited < Duration::from_secs(2), "parked record never resolved");
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }

        runtime.shutdown();
    }
}
