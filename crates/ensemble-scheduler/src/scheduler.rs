//! Priority scheduler
//!
//! Admission control, ordering, and preemption for task executions.
//! The scheduler is an ordinary extension: it intercepts
//! `task:beforeExecution` to decide admission and
//! `task:afterCompletion` to release capacity and drain the ready
//! queue. Deferral is signalled through context flags, never errors.
//!
//! All bookkeeping lives behind one mutex; every check-then-update
//! (admission, preemption, drain) is a single critical section.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

use ensemble_core::error::HookError;
use ensemble_core::extension::{Extension, ExtensionPoint, HookContext, LifecycleHook};
use ensemble_core::task::TaskStatus;

use crate::types::{
    AgingConfig, DeferredTask, ResourceAllocation, SchedulerTaskState, SchedulingPolicy,
    TaskGroup, TaskOptions, TaskPriority,
};

/// Extension name the scheduler registers under.
pub const SCHEDULER_EXTENSION: &str = "priority-scheduler";

/// Context attribute set on deferred executions.
pub const DISPOSITION_ATTRIBUTE: &str = "scheduler_disposition";

const DEFAULT_MAX_CONCURRENT: usize = 4;

#[derive(Debug)]
struct Resource {
    capacity: u32,
    allocated: u32,
}

struct SchedulerState {
    tasks: HashMap<String, SchedulerTaskState>,
    /// Running task ids in admission order (deterministic tie-break).
    running: Vec<String>,
    ready: VecDeque<String>,
    completed: Vec<String>,
    resources: HashMap<String, Resource>,
    groups: HashMap<String, TaskGroup>,
    max_concurrent: usize,
    policy: SchedulingPolicy,
    preemption_enabled: bool,
    aging: AgingConfig,
}

impl SchedulerState {
    fn new(max_concurrent: usize) -> Self {
        Self {
            tasks: HashMap::new(),
            running: Vec::new(),
            ready: VecDeque::new(),
            completed: Vec::new(),
            resources: HashMap::new(),
            groups: HashMap::new(),
            max_concurrent: max_concurrent.max(1),
            policy: SchedulingPolicy::default(),
            preemption_enabled: true,
            aging: AgingConfig::default(),
        }
    }

    fn is_running(&self, task_id: &str) -> bool {
        self.running.iter().any(|id| id == task_id)
    }

    fn priority_of(&self, task_id: &str) -> TaskPriority {
        self.tasks
            .get(task_id)
            .map(|t| t.priority)
            .unwrap_or_default()
    }

    fn effective_priority(&self, task_id: &str) -> u32 {
        let Some(record) = self.tasks.get(task_id) else {
            return TaskPriority::Normal.level();
        };
        let base = record.priority.level();
        if self.aging.enabled
            && record.waiting_since.elapsed() > self.aging.waiting_time_threshold
        {
            base + self.aging.boost
        } else {
            base
        }
    }

    fn group_ok(&self, task_id: &str) -> bool {
        let Some(group) = self.tasks.get(task_id).and_then(|t| t.group.clone()) else {
            return true;
        };
        // Unknown groups are unconstrained.
        let Some(config) = self.groups.get(&group) else {
            return true;
        };
        let members = self
            .running
            .iter()
            .filter(|id| {
                self.tasks
                    .get(*id)
                    .map_or(false, |t| t.group.as_deref() == Some(group.as_str()))
            })
            .count();
        members < config.max_concurrent
    }

    fn resources_ok(&self, task_id: &str) -> bool {
        let Some(record) = self.tasks.get(task_id) else {
            return true;
        };
        record.resources.iter().all(|name| {
            // Undefined resources are unconstrained.
            self.resources
                .get(name)
                .map_or(true, |r| r.allocated < r.capacity)
        })
    }

    fn admit(&mut self, task_id: &str) {
        let resources = self
            .tasks
            .get(task_id)
            .map(|t| t.resources.clone())
            .unwrap_or_default();
        for name in resources {
            if let Some(resource) = self.resources.get_mut(&name) {
                resource.allocated += 1;
            }
        }
        if let Some(record) = self.tasks.get_mut(task_id) {
            record.preempted = false;
            record.waiting_since = Instant::now();
        }
        self.running.push(task_id.to_string());
    }

    fn release(&mut self, task_id: &str) {
        self.running.retain(|id| id != task_id);
        let resources = self
            .tasks
            .get(task_id)
            .map(|t| t.resources.clone())
            .unwrap_or_default();
        for name in resources {
            if let Some(resource) = self.resources.get_mut(&name) {
                resource.allocated = resource.allocated.saturating_sub(1);
            }
        }
    }

    /// Preempt the lowest-priority preemptible running task strictly
    /// below `below`, optionally restricted to holders of `resource`.
    fn preempt_lowest(&mut self, below: TaskPriority, resource: Option<&str>) -> Option<String> {
        let victim = self
            .running
            .iter()
            .filter_map(|id| self.tasks.get(id).map(|t| (id.clone(), t)))
            .filter(|(_, t)| t.preemptible && t.priority < below)
            .filter(|(_, t)| {
                resource.map_or(true, |name| t.resources.iter().any(|r| r == name))
            })
            .min_by_key(|(_, t)| t.priority)
            .map(|(id, _)| id)?;

        self.release(&victim);
        let victim_priority = self.priority_of(&victim);
        if let Some(record) = self.tasks.get_mut(&victim) {
            record.preempted = true;
            record.waiting_since = Instant::now();
        }
        if victim_priority == TaskPriority::Critical {
            self.ready.push_front(victim.clone());
        } else {
            self.ready.push_back(victim.clone());
        }
        tracing::info!(task_id = %victim, "task preempted");
        Some(victim)
    }

    /// Constraint-checked admission for non-critical tasks.
    fn try_admit(&mut self, task_id: &str) -> bool {
        if !self.group_ok(task_id) || !self.resources_ok(task_id) {
            return false;
        }
        if self.running.len() < self.max_concurrent {
            self.admit(task_id);
            return true;
        }
        // HIGH may take a slot from a strictly lower preemptible task.
        let priority = self.priority_of(task_id);
        if priority == TaskPriority::High
            && self.preemption_enabled
            && self.preempt_lowest(priority, None).is_some()
        {
            self.admit(task_id);
            return true;
        }
        false
    }

    /// CRITICAL admission: preempt until a slot (and any required
    /// resource capacity) frees. Resource capacity is never exceeded;
    /// a critical task blocked on a non-preemptible resource holder is
    /// deferred to the queue front instead.
    fn force_admit(&mut self, task_id: &str) -> bool {
        while self.running.len() >= self.max_concurrent {
            if self.preempt_lowest(TaskPriority::Critical, None).is_none() {
                break;
            }
        }
        let resources = self
            .tasks
            .get(task_id)
            .map(|t| t.resources.clone())
            .unwrap_or_default();
        for name in &resources {
            loop {
                let full = self
                    .resources
                    .get(name)
                    .map_or(false, |r| r.allocated >= r.capacity);
                if !full {
                    break;
                }
                if self
                    .preempt_lowest(TaskPriority::Critical, Some(name))
                    .is_none()
                {
                    break;
                }
            }
        }
        if !self.resources_ok(task_id) {
            return false;
        }
        self.admit(task_id);
        true
    }

    /// Index into the ready queue of the next task per the policy,
    /// ignoring entries in `skip`.
    fn select_next(&self, skip: &HashSet<String>) -> Option<usize> {
        let candidates = self
            .ready
            .iter()
            .enumerate()
            .filter(|(_, id)| !skip.contains(*id));
        match self.policy {
            SchedulingPolicy::Fifo => candidates.map(|(i, _)| i).next(),
            SchedulingPolicy::Sjf => candidates
                .min_by_key(|(i, id)| {
                    let estimate = self
                        .tasks
                        .get(*id)
                        .and_then(|t| t.execution_time)
                        .map(|d| d.as_millis())
                        .unwrap_or(u128::MAX);
                    (estimate, *i)
                })
                .map(|(i, _)| i),
            SchedulingPolicy::Deadline => candidates
                .min_by_key(|(i, id)| {
                    let deadline = self
                        .tasks
                        .get(*id)
                        .and_then(|t| t.deadline)
                        .map(|d| d.timestamp_millis())
                        .unwrap_or(i64::MAX);
                    (deadline, *i)
                })
                .map(|(i, _)| i),
            SchedulingPolicy::Priority => candidates
                .max_by_key(|(i, id)| (self.effective_priority(id), std::cmp::Reverse(*i)))
                .map(|(i, _)| i),
        }
    }

    /// Admit queued tasks while capacity lasts; returns the deferred
    /// submissions to hand back to the embedder.
    ///
    /// A candidate held back by its group cap or by an exhausted
    /// resource does not stall the queue: it stays ready and the scan
    /// moves on to the next task the policy would pick.
    fn drain(&mut self) -> Vec<DeferredTask> {
        let mut launched = Vec::new();
        let mut blocked = HashSet::new();
        while self.running.len() < self.max_concurrent {
            let Some(idx) = self.select_next(&blocked) else {
                break;
            };
            let task_id = self.ready[idx].clone();
            if !self.group_ok(&task_id) || !self.resources_ok(&task_id) {
                blocked.insert(task_id);
                continue;
            }
            self.ready.remove(idx);
            self.admit(&task_id);
            tracing::debug!(task_id = %task_id, "queued task admitted");
            if let Some(pending) = self.tasks.get_mut(&task_id).and_then(|t| t.pending.take()) {
                launched.push(pending);
            }
        }
        launched
    }

    fn record_completion(&mut self, task_id: &str, priority: TaskPriority) {
        if priority == TaskPriority::Critical {
            self.completed.insert(0, task_id.to_string());
        } else {
            self.completed.push(task_id.to_string());
        }
    }
}

/// The priority scheduler extension.
pub struct PriorityScheduler {
    state: Mutex<SchedulerState>,
    admission_tx: mpsc::UnboundedSender<DeferredTask>,
    admission_rx: Mutex<Option<mpsc::UnboundedReceiver<DeferredTask>>>,
}

impl PriorityScheduler {
    pub fn new() -> Self {
        Self::with_max_concurrent(DEFAULT_MAX_CONCURRENT)
    }

    pub fn with_max_concurrent(max_concurrent: usize) -> Self {
        let (admission_tx, admission_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(SchedulerState::new(max_concurrent)),
            admission_tx,
            admission_rx: Mutex::new(Some(admission_rx)),
        }
    }

    /// The extension to register with the engine's registry.
    ///
    /// Admission runs ahead of application hooks; release/drain runs
    /// after them.
    pub fn extension(self: &Arc<Self>) -> Extension {
        Extension::new(SCHEDULER_EXTENSION)
            .with_hook(
                ExtensionPoint::TaskBeforeExecution,
                -100,
                Arc::new(AdmissionHook {
                    scheduler: Arc::clone(self),
                }),
            )
            .with_hook(
                ExtensionPoint::TaskAfterCompletion,
                100,
                Arc::new(CompletionHook {
                    scheduler: Arc::clone(self),
                }),
            )
    }

    /// Receiver of deferred submissions admitted by a drain. The
    /// embedder re-submits each one; taking the stream twice yields
    /// `None`.
    pub fn admission_stream(&self) -> Option<mpsc::UnboundedReceiver<DeferredTask>> {
        self.admission_rx.lock().take()
    }

    fn scheduler_task_id(ctx: &HookContext) -> Option<String> {
        let task = ctx.task.as_ref()?;
        let options = TaskOptions::from_attributes(&ctx.attributes);
        Some(options.task_id.unwrap_or_else(|| task.execution_id.clone()))
    }

    /// Admission decision; deferral is a context flag, never an error.
    pub fn before_execution(&self, mut ctx: HookContext) -> HookContext {
        let Some(task) = ctx.task.clone() else {
            return ctx;
        };
        let options = TaskOptions::from_attributes(&ctx.attributes);
        let task_id = options
            .task_id
            .clone()
            .unwrap_or_else(|| task.execution_id.clone());
        // Pin the scheduler identity into the stored attributes so the
        // relaunch maps back to the same record.
        let mut deferred_attributes = ctx.attributes.clone();
        let mut pinned = options.clone();
        pinned.task_id = Some(task_id.clone());
        for (key, value) in pinned.into_attributes() {
            deferred_attributes.insert(key, value);
        }
        let deferred = DeferredTask {
            task_id: task_id.clone(),
            task_type: task.task_type.clone(),
            input: task.input.clone(),
            attributes: deferred_attributes,
        };

        let mut state = self.state.lock();
        {
            let record = state
                .tasks
                .entry(task_id.clone())
                .or_insert_with(|| SchedulerTaskState::new(task_id.as_str()));
            record.apply_options(&options);
            record.pending = Some(deferred);
        }

        if state.is_running(&task_id) {
            // Resubmission of a drain-admitted task; pass through.
            if let Some(record) = state.tasks.get_mut(&task_id) {
                record.preempted = false;
            }
            return ctx;
        }

        let priority = state.priority_of(&task_id);
        let admitted = if priority == TaskPriority::Critical {
            state.force_admit(&task_id)
        } else {
            state.try_admit(&task_id)
        };

        if admitted {
            tracing::debug!(task_id = %task_id, ?priority, "task admitted");
            ctx
        } else {
            if priority == TaskPriority::Critical {
                state.ready.push_front(task_id.clone());
            } else {
                state.ready.push_back(task_id.clone());
            }
            tracing::debug!(task_id = %task_id, ?priority, "task deferred");
            ctx.skip_execution = true;
            ctx.skip_status = Some(TaskStatus::Pending);
            ctx.attributes
                .insert(DISPOSITION_ATTRIBUTE.to_string(), json!("deferred"));
            // A failed forced admission may have evicted victims
            // without filling the slot; backfill it.
            let launches = state.drain();
            drop(state);
            self.send_launches(launches);
            ctx
        }
    }

    /// Release capacity for a terminated execution and drain.
    pub fn after_completion(&self, ctx: HookContext) -> HookContext {
        let Some(task_id) = Self::scheduler_task_id(&ctx) else {
            return ctx;
        };
        let launches = {
            let mut state = self.state.lock();
            let Some(record) = state.tasks.get(&task_id) else {
                return ctx;
            };
            let priority = record.priority;
            let preempted = record.preempted;

            if state.is_running(&task_id) {
                state.release(&task_id);
                state.record_completion(&task_id, priority);
                state.tasks.remove(&task_id);
            } else if preempted {
                // Ghost completion: the preempted handler ran to the
                // end anyway. Retire the queue entry instead of
                // re-launching it.
                state.ready.retain(|id| id != &task_id);
                state.record_completion(&task_id, priority);
                state.tasks.remove(&task_id);
            } else {
                return ctx;
            }
            state.drain()
        };
        self.send_launches(launches);
        ctx
    }

    fn send_launches(&self, launches: Vec<DeferredTask>) {
        for launch in launches {
            if self.admission_tx.send(launch).is_err() {
                tracing::debug!("no admission consumer; deferred launch dropped");
            }
        }
    }

    // Administrative / introspection API. Synchronous; touches only
    // scheduler-owned state.

    /// Unknown ids get a fresh default record rather than failing.
    pub fn set_task_priority(&self, task_id: &str, priority: TaskPriority) {
        let mut state = self.state.lock();
        state
            .tasks
            .entry(task_id.to_string())
            .or_insert_with(|| SchedulerTaskState::new(task_id))
            .priority = priority;
    }

    pub fn set_task_options(&self, task_id: &str, options: &TaskOptions) {
        let mut state = self.state.lock();
        state
            .tasks
            .entry(task_id.to_string())
            .or_insert_with(|| SchedulerTaskState::new(task_id))
            .apply_options(options);
    }

    pub fn set_scheduling_policy(&self, policy: SchedulingPolicy) {
        self.state.lock().policy = policy;
    }

    pub fn set_max_concurrent_tasks(&self, max_concurrent: usize) {
        self.state.lock().max_concurrent = max_concurrent.max(1);
    }

    pub fn enable_preemption(&self, enabled: bool) {
        self.state.lock().preemption_enabled = enabled;
    }

    pub fn configure_aging(&self, aging: AgingConfig) {
        self.state.lock().aging = aging;
    }

    pub fn define_resource(&self, resource_id: &str, capacity: u32) {
        self.state.lock().resources.insert(
            resource_id.to_string(),
            Resource {
                capacity,
                allocated: 0,
            },
        );
    }

    pub fn create_task_group(&self, group_id: &str, group: TaskGroup) {
        self.state.lock().groups.insert(group_id.to_string(), group);
    }

    pub fn running_tasks(&self) -> Vec<String> {
        self.state.lock().running.clone()
    }

    pub fn queued_tasks(&self) -> Vec<String> {
        self.state.lock().ready.iter().cloned().collect()
    }

    /// Completion order; CRITICAL completions are prepended.
    pub fn execution_order(&self) -> Vec<String> {
        self.state.lock().completed.clone()
    }

    pub fn resource_allocations(&self) -> HashMap<String, ResourceAllocation> {
        self.state
            .lock()
            .resources
            .iter()
            .map(|(id, r)| {
                (
                    id.clone(),
                    ResourceAllocation {
                        capacity: r.capacity,
                        allocated: r.allocated,
                    },
                )
            })
            .collect()
    }

    pub fn task_state(&self, task_id: &str) -> Option<SchedulerTaskState> {
        self.state.lock().tasks.get(task_id).cloned()
    }
}

impl Default for PriorityScheduler {
    fn default() -> Self {
        Self::new()
    }
}

struct AdmissionHook {
    scheduler: Arc<PriorityScheduler>,
}

#[async_trait]
impl LifecycleHook for AdmissionHook {
    fn name(&self) -> &str {
        "scheduler-admission"
    }

    async fn call(&self, ctx: HookContext) -> Result<HookContext, HookError> {
        Ok(self.scheduler.before_execution(ctx))
    }
}

struct CompletionHook {
    scheduler: Arc<PriorityScheduler>,
}

#[async_trait]
impl LifecycleHook for CompletionHook {
    fn name(&self) -> &str {
        "scheduler-completion"
    }

    async fn call(&self, ctx: HookContext) -> Result<HookContext, HookError> {
        Ok(self.scheduler.after_completion(ctx))
    }
}
