//! Caller-facing orchestrator.
//!
//! Wires the event bus, agent registry, scheduler actor, worker pool,
//! health monitor and workflow engine together. Constructing an
//! `Orchestrator` starts the scheduler and event dispatcher; `start` adds
//! the workers and the health supervisor, `stop` removes them again.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::agent::{AgentId, SharedAgent};
use crate::config::Config;
use crate::core::context::Context;
use crate::core::task::{Task, TaskId, TaskRequest};
use crate::orchestration::events::{EventBus, EventKind, OrchestratorEvent};
use crate::orchestration::health::{ConnectivityProbe, HealthConfig, HealthMonitor, HealthReport};
use crate::orchestration::metrics::Metrics;
use crate::orchestration::pool::WorkerPool;
use crate::orchestration::registry::AgentRegistry;
use crate::orchestration::scheduler::{SchedulerHandle, SchedulerSettings};
use crate::workflow::{
    templates, ExecutionId, Workflow, WorkflowEngine, WorkflowExecution, WorkflowId, WorkflowStep,
};
use crate::{Error, Result};

/// Overall state, as returned by [`Orchestrator::get_system_status`].
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub is_running: bool,
    pub registered_agents: Vec<AgentId>,
    pub queue_size: usize,
    pub pending_tasks: usize,
    pub running_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
    pub workflows: usize,
    pub workers: usize,
    pub metrics: Metrics,
    pub health: Option<HealthReport>,
}

/// One agent's registration and task counts.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub agent_id: AgentId,
    pub agent_type: String,
    pub is_initialized: bool,
    pub capabilities: Vec<String>,
    pub tasks_running: usize,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub error_rate: f64,
    pub last_activity: Option<DateTime<Utc>>,
}

struct RunState {
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    health: JoinHandle<()>,
}

pub struct Orchestrator {
    config: Config,
    events: EventBus,
    registry: AgentRegistry,
    scheduler: SchedulerHandle,
    engine: WorkflowEngine,
    health: HealthMonitor,
    probe: Option<Arc<dyn ConnectivityProbe>>,
    /// Stops the scheduler and dispatcher when the orchestrator is dropped.
    shutdown: CancellationToken,
    run: Mutex<Option<RunState>>,
}

impl Orchestrator {
    /// Build an orchestrator. Must be called inside a Tokio runtime.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let shutdown = CancellationToken::new();
        let events = EventBus::new();
        events.spawn_dispatcher(shutdown.clone());

        let registry = AgentRegistry::new(events.clone());
        let (scheduler, _actor) = SchedulerHandle::spawn(
            SchedulerSettings::from(&config),
            registry.clone(),
            events.clone(),
            shutdown.clone(),
        );
        let engine = WorkflowEngine::new(scheduler.clone(), events.clone());

        for kind in [
            EventKind::TaskCompleted,
            EventKind::TaskFailed,
            EventKind::TaskCancelled,
        ] {
            let engine = engine.clone();
            events.on_async(kind, move |event| {
                let engine = engine.clone();
                async move {
                    match event.task_id() {
                        Some(task_id) => engine.on_task_terminal(task_id).await,
                        None => Ok(()),
                    }
                }
            });
        }

        let health = HealthMonitor::new(
            HealthConfig::from(&config),
            registry.clone(),
            scheduler.clone(),
            None,
        );

        Ok(Self {
            config,
            events,
            registry,
            scheduler,
            engine,
            health,
            probe: None,
            shutdown,
            run: Mutex::new(None),
        })
    }

    /// Attach the database connectivity check used by `start` and the
    /// health monitor.
    pub fn with_connectivity_probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.health = HealthMonitor::new(
            HealthConfig::from(&self.config),
            self.registry.clone(),
            self.scheduler.clone(),
            Some(Arc::clone(&probe)),
        );
        self.probe = Some(probe);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start the worker pool and health monitor.
    ///
    /// # Errors
    /// `DatabaseUnavailable` if a connectivity probe is attached and
    /// reports the database as down. Starting twice is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut run = self.run.lock().await;
        if run.is_some() {
            warn!("orchestrator already running");
            return Ok(());
        }

        if let Some(probe) = &self.probe {
            if !probe.is_connected().await {
                error!("database connectivity check failed, not starting");
                return Err(Error::DatabaseUnavailable);
            }
        }
        if self.config.load_builtin_templates {
            self.engine.load_templates(templates::builtin()).await?;
        }

        let cancel = self.shutdown.child_token();
        let workers = WorkerPool::spawn(
            self.config.max_concurrent_tasks,
            self.scheduler.clone(),
            self.registry.clone(),
            self.config.poll_interval,
            cancel.clone(),
        );
        let health = self.health.clone().spawn(cancel.clone());
        *run = Some(RunState {
            cancel,
            workers,
            health,
        });

        info!(workers = self.config.max_concurrent_tasks, "orchestrator started");
        Ok(())
    }

    /// Stop workers and the health monitor, then clean up every agent.
    ///
    /// Agent calls still in flight are abandoned. Task state and
    /// workflows stay queryable.
    pub async fn stop(&self) {
        let Some(state) = self.run.lock().await.take() else {
            return;
        };
        info!("stopping orchestrator");
        state.cancel.cancel();

        for worker in state.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "worker ended abnormally");
            }
        }
        if let Err(e) = state.health.await {
            error!(error = %e, "health monitor ended abnormally");
        }

        self.registry.cleanup_all().await;
        info!("orchestrator stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.run.lock().await.is_some()
    }

    // Agents

    pub async fn register_agent(&self, agent: SharedAgent) -> Result<AgentId> {
        self.registry.register(agent).await
    }

    pub async fn unregister_agent(&self, agent_id: &AgentId) -> Result<()> {
        self.registry.unregister(agent_id).await
    }

    /// `None` if the agent is not registered.
    pub async fn get_agent_status(&self, agent_id: &AgentId) -> Result<Option<AgentStatus>> {
        let Some(handle) = self.registry.handle(agent_id).await else {
            return Ok(None);
        };
        let stats = self.scheduler.agent_stats(agent_id.clone()).await?;
        Ok(Some(AgentStatus {
            agent_id: handle.id,
            agent_type: handle.agent_type,
            is_initialized: handle.initialized,
            capabilities: handle.capabilities,
            tasks_running: stats.running,
            tasks_completed: stats.completed,
            tasks_failed: stats.failed,
            error_rate: stats.error_rate,
            last_activity: handle.last_activity,
        }))
    }

    // Tasks

    pub async fn submit_task(&self, request: TaskRequest) -> Result<TaskId> {
        self.scheduler.submit(request).await
    }

    /// Snapshot of a task, including finished ones.
    pub async fn get_task_status(&self, task_id: TaskId) -> Result<Option<Task>> {
        self.scheduler.get(task_id).await
    }

    pub async fn cancel_task(&self, task_id: TaskId) -> Result<bool> {
        self.scheduler.cancel(task_id).await
    }

    // Workflows

    pub async fn create_workflow(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        steps: Vec<WorkflowStep>,
    ) -> Result<WorkflowId> {
        self.engine.create_workflow(name, description, steps).await
    }

    pub async fn execute_workflow(
        &self,
        workflow_id: WorkflowId,
        context: Context,
    ) -> Result<ExecutionId> {
        self.engine.execute_workflow(workflow_id, context).await
    }

    pub async fn pause_workflow(&self, workflow_id: WorkflowId) -> Result<bool> {
        self.engine.pause_workflow(workflow_id).await
    }

    pub async fn resume_workflow(&self, workflow_id: WorkflowId) -> Result<bool> {
        self.engine.resume_workflow(workflow_id).await
    }

    pub async fn get_workflow(&self, workflow_id: WorkflowId) -> Option<Workflow> {
        self.engine.get_workflow(workflow_id).await
    }

    pub async fn find_workflow(&self, name: &str) -> Option<WorkflowId> {
        self.engine.find_by_name(name).await
    }

    pub async fn get_execution(&self, execution_id: &ExecutionId) -> Option<WorkflowExecution> {
        self.engine.execution(execution_id).await
    }

    /// Wait up to `limit` for an execution to complete or fail.
    pub async fn wait_for_execution(
        &self,
        execution_id: &ExecutionId,
        limit: Duration,
    ) -> Result<WorkflowExecution> {
        tokio::time::timeout(limit, self.engine.wait_for_execution(execution_id))
            .await
            .map_err(|_| Error::Timeout(limit))?
    }

    // Events

    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&OrchestratorEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.events.on(kind, handler);
    }

    pub fn on_async<F, Fut>(&self, kind: EventKind, handler: F)
    where
        F: Fn(OrchestratorEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.events.on_async(kind, handler);
    }

    // Status

    /// Run a health cycle now, outside the periodic schedule.
    pub async fn health_check(&self) -> Result<HealthReport> {
        self.health.check().await
    }

    pub async fn get_system_status(&self) -> Result<SystemStatus> {
        let snapshot = self.scheduler.snapshot().await?;
        let workers = match self.run.lock().await.as_ref() {
            Some(state) => state.workers.len(),
            None => 0,
        };
        Ok(SystemStatus {
            is_running: workers > 0,
            registered_agents: self.registry.ids().await,
            queue_size: snapshot.queue_depth,
            pending_tasks: snapshot.pending,
            running_tasks: snapshot.running,
            completed_tasks: snapshot.completed,
            failed_tasks: snapshot.failed,
            cancelled_tasks: snapshot.cancelled,
            workflows: self.engine.workflow_count().await,
            workers,
            metrics: snapshot.metrics,
            health: self.health.latest().await,
        })
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
