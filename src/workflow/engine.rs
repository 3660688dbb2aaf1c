//! Workflow engine.
//!
//! Stores workflow definitions, expands an execution into scheduler tasks
//! and rolls task outcomes back up into the execution and the workflow.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, error, info, warn};

use crate::core::context::Context;
use crate::core::dag::StepGraph;
use crate::core::task::{TaskId, TaskRequest, TaskStatus};
use crate::orchestration::events::{EventBus, OrchestratorEvent};
use crate::orchestration::scheduler::SchedulerHandle;
use crate::workflow::templates::WorkflowTemplate;
use crate::workflow::{
    ExecutionId, StepTask, Workflow, WorkflowExecution, WorkflowId, WorkflowStatus, WorkflowStep,
};
use crate::{Error, Result};

#[derive(Clone)]
pub struct WorkflowEngine {
    workflows: Arc<RwLock<HashMap<WorkflowId, Workflow>>>,
    executions: Arc<RwLock<HashMap<ExecutionId, WorkflowExecution>>>,
    /// Which execution generated a task.
    task_index: Arc<RwLock<HashMap<TaskId, ExecutionId>>>,
    /// Signalled whenever an execution reaches a terminal outcome.
    finished: Arc<Notify>,
    scheduler: SchedulerHandle,
    events: EventBus,
}

impl WorkflowEngine {
    pub fn new(scheduler: SchedulerHandle, events: EventBus) -> Self {
        Self {
            workflows: Arc::new(RwLock::new(HashMap::new())),
            executions: Arc::new(RwLock::new(HashMap::new())),
            task_index: Arc::new(RwLock::new(HashMap::new())),
            finished: Arc::new(Notify::new()),
            scheduler,
            events,
        }
    }

    /// Validate and store a workflow. Nothing is scheduled.
    ///
    /// # Errors
    /// `InvalidWorkflow` for duplicate step ids, unknown or self
    /// dependencies and dependency cycles.
    pub async fn create_workflow(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        steps: Vec<WorkflowStep>,
    ) -> Result<WorkflowId> {
        StepGraph::build(&steps)?;
        let workflow = Workflow::new(name, description, steps);
        let id = workflow.id;
        info!(
            workflow_id = %id.short(),
            name = %workflow.name,
            steps = workflow.steps.len(),
            "workflow created"
        );
        self.workflows.write().await.insert(id, workflow);
        Ok(id)
    }

    /// Register templates, skipping names that already exist.
    pub async fn load_templates(&self, templates: Vec<WorkflowTemplate>) -> Result<Vec<WorkflowId>> {
        let mut ids = Vec::with_capacity(templates.len());
        for template in templates {
            if let Some(existing) = self.find_by_name(&template.name).await {
                debug!(name = %template.name, "template already loaded");
                ids.push(existing);
                continue;
            }
            ids.push(
                self.create_workflow(template.name, template.description, template.steps)
                    .await?,
            );
        }
        Ok(ids)
    }

    pub async fn get_workflow(&self, id: WorkflowId) -> Option<Workflow> {
        self.workflows.read().await.get(&id).cloned()
    }

    pub async fn find_by_name(&self, name: &str) -> Option<WorkflowId> {
        self.workflows
            .read()
            .await
            .values()
            .find(|w| w.name == name)
            .map(|w| w.id)
    }

    pub async fn workflow_count(&self) -> usize {
        self.workflows.read().await.len()
    }

    pub async fn execution(&self, id: &ExecutionId) -> Option<WorkflowExecution> {
        self.executions.read().await.get(id).cloned()
    }

    /// Wait until an execution is completed or failed.
    pub async fn wait_for_execution(&self, id: &ExecutionId) -> Result<WorkflowExecution> {
        loop {
            let notified = self.finished.notified();
            let execution = self
                .execution(id)
                .await
                .ok_or_else(|| Error::Validation(format!("unknown execution: {id}")))?;
            if execution.status.is_terminal() {
                return Ok(execution);
            }
            notified.await;
        }
    }

    /// Expand a workflow into scheduler tasks.
    ///
    /// Steps are submitted in dependency order; each step's context is the
    /// workflow context overlaid with the step context. If a submission
    /// fails, the tasks already submitted are cancelled, the workflow is
    /// marked failed and the error returned.
    pub async fn execute_workflow(&self, id: WorkflowId, context: Context) -> Result<ExecutionId> {
        let workflow = self
            .get_workflow(id)
            .await
            .ok_or(Error::WorkflowNotFound(id))?;
        let graph = StepGraph::build(&workflow.steps)?;
        // A pause only holds the execution it was issued against.
        self.scheduler.resume_workflow(id).await?;

        let execution_id = self.register_execution(id).await;
        if let Some(workflow) = self.workflows.write().await.get_mut(&id) {
            workflow.status = WorkflowStatus::Running;
            workflow.started_at = Some(Utc::now());
            workflow.completed_at = None;
            workflow.context = context.clone();
        }

        let mut task_ids: HashMap<&str, TaskId> = HashMap::with_capacity(graph.len());

        for step in graph.execution_order() {
            match self.submit_step(step, &context, &task_ids, id, &execution_id).await {
                Ok(task_id) => {
                    task_ids.insert(step.id.as_str(), task_id);
                    self.task_index
                        .write()
                        .await
                        .insert(task_id, execution_id.clone());
                    if let Some(execution) = self.executions.write().await.get_mut(&execution_id) {
                        execution.steps.push(StepTask {
                            step_id: step.id.clone(),
                            task_id,
                        });
                    }
                }
                Err(e) => {
                    error!(
                        workflow_id = %id.short(),
                        step = %step.id,
                        error = %e,
                        "workflow submission failed"
                    );
                    self.abort_execution(id, &execution_id, task_ids.values().copied())
                        .await;
                    return Err(e);
                }
            }
        }

        info!(
            workflow_id = %id.short(),
            execution_id = %execution_id,
            tasks = task_ids.len(),
            "workflow started"
        );
        self.events.emit(OrchestratorEvent::WorkflowStarted {
            workflow_id: id,
            execution_id: execution_id.clone(),
        });

        // Tasks may have finished before they were indexed.
        self.refresh_execution(&execution_id).await?;
        Ok(execution_id)
    }

    async fn register_execution(&self, workflow_id: WorkflowId) -> ExecutionId {
        let mut executions = self.executions.write().await;
        let mut at = Utc::now();
        let mut execution_id = ExecutionId::new(workflow_id, at);
        while executions.contains_key(&execution_id) {
            at += ChronoDuration::milliseconds(1);
            execution_id = ExecutionId::new(workflow_id, at);
        }
        executions.insert(
            execution_id.clone(),
            WorkflowExecution {
                id: execution_id.clone(),
                workflow_id,
                steps: Vec::new(),
                status: WorkflowStatus::Running,
                started_at: at,
                completed_at: None,
            },
        );
        execution_id
    }

    async fn submit_step(
        &self,
        step: &WorkflowStep,
        context: &Context,
        task_ids: &HashMap<&str, TaskId>,
        workflow_id: WorkflowId,
        execution_id: &ExecutionId,
    ) -> Result<TaskId> {
        let dependencies = step
            .dependencies
            .iter()
            .map(|dep| {
                task_ids.get(dep.as_str()).copied().ok_or_else(|| {
                    Error::InvalidWorkflow(format!("step {} submitted before {}", step.id, dep))
                })
            })
            .collect::<Result<Vec<TaskId>>>()?;

        let metadata = Context::new()
            .with("workflow_id", workflow_id.to_string())
            .with("execution_id", execution_id.to_string())
            .with("step_id", step.id.clone());

        let request = TaskRequest::new(step.task_type.clone(), step.agent_id.clone())
            .with_context(context.merged(&step.context))
            .with_priority(step.priority)
            .depends_on(dependencies)
            .with_metadata(metadata)
            .in_workflow(workflow_id);
        self.scheduler.submit(request).await
    }

    async fn abort_execution(
        &self,
        workflow_id: WorkflowId,
        execution_id: &ExecutionId,
        submitted: impl Iterator<Item = TaskId>,
    ) {
        for task_id in submitted {
            if let Err(e) = self
                .scheduler
                .cancel_with_reason(task_id, "workflow submission failed".to_string())
                .await
            {
                warn!(task_id = %task_id, error = %e, "could not cancel workflow task");
            }
        }
        let now = Utc::now();
        if let Some(execution) = self.executions.write().await.get_mut(execution_id) {
            execution.status = WorkflowStatus::Failed;
            execution.completed_at = Some(now);
        }
        if let Some(workflow) = self.workflows.write().await.get_mut(&workflow_id) {
            workflow.status = WorkflowStatus::Failed;
            workflow.completed_at = Some(now);
        }
        if let Err(e) = self.scheduler.resume_workflow(workflow_id).await {
            warn!(workflow_id = %workflow_id.short(), error = %e, "could not release workflow gate");
        }
        self.finished.notify_waiters();
    }

    /// Hold back the queued tasks of a running workflow.
    pub async fn pause_workflow(&self, id: WorkflowId) -> Result<bool> {
        {
            let mut workflows = self.workflows.write().await;
            match workflows.get_mut(&id) {
                Some(workflow) if workflow.status == WorkflowStatus::Running => {
                    workflow.status = WorkflowStatus::Paused;
                }
                _ => return Ok(false),
            }
        }
        self.scheduler.pause_workflow(id).await?;
        info!(workflow_id = %id.short(), "workflow paused");
        self.events
            .emit(OrchestratorEvent::WorkflowPaused { workflow_id: id });
        Ok(true)
    }

    pub async fn resume_workflow(&self, id: WorkflowId) -> Result<bool> {
        {
            let mut workflows = self.workflows.write().await;
            match workflows.get_mut(&id) {
                Some(workflow) if workflow.status == WorkflowStatus::Paused => {
                    workflow.status = WorkflowStatus::Running;
                }
                _ => return Ok(false),
            }
        }
        self.scheduler.resume_workflow(id).await?;
        info!(workflow_id = %id.short(), "workflow resumed");
        self.events
            .emit(OrchestratorEvent::WorkflowResumed { workflow_id: id });
        Ok(true)
    }

    /// React to a task reaching a terminal state.
    pub async fn on_task_terminal(&self, task_id: TaskId) -> Result<()> {
        let execution_id = self.task_index.read().await.get(&task_id).cloned();
        match execution_id {
            Some(execution_id) => self.refresh_execution(&execution_id).await,
            None => Ok(()),
        }
    }

    /// Recompute an execution's outcome from its tasks.
    ///
    /// Any failed or cancelled step fails the execution, all completed
    /// steps complete it; otherwise it stays running. A terminal outcome is
    /// recorded and announced once.
    pub async fn refresh_execution(&self, execution_id: &ExecutionId) -> Result<()> {
        let (workflow_id, steps) = {
            let executions = self.executions.read().await;
            match executions.get(execution_id) {
                Some(execution) if !execution.status.is_terminal() => {
                    (execution.workflow_id, execution.steps.clone())
                }
                _ => return Ok(()),
            }
        };

        let mut failed_steps = Vec::new();
        let mut all_completed = true;
        for step in &steps {
            let status = self.scheduler.get(step.task_id).await?.map(|t| t.status);
            match status {
                Some(TaskStatus::Completed) => {}
                Some(TaskStatus::Failed) | Some(TaskStatus::Cancelled) => {
                    failed_steps.push(step.step_id.clone())
                }
                _ => all_completed = false,
            }
        }

        let outcome = if !failed_steps.is_empty() {
            WorkflowStatus::Failed
        } else if all_completed {
            WorkflowStatus::Completed
        } else {
            return Ok(());
        };

        let now = Utc::now();
        {
            let mut executions = self.executions.write().await;
            match executions.get_mut(execution_id) {
                Some(execution) if !execution.status.is_terminal() => {
                    execution.status = outcome;
                    execution.completed_at = Some(now);
                }
                _ => return Ok(()),
            }
        }
        if let Some(workflow) = self.workflows.write().await.get_mut(&workflow_id) {
            workflow.status = outcome;
            workflow.completed_at = Some(now);
        }
        // The rollup overwrites a Paused status, so the gate goes with it.
        self.scheduler.resume_workflow(workflow_id).await?;
        self.finished.notify_waiters();

        if outcome == WorkflowStatus::Completed {
            info!(workflow_id = %workflow_id.short(), execution_id = %execution_id, "workflow completed");
            self.events.emit(OrchestratorEvent::WorkflowCompleted {
                workflow_id,
                execution_id: execution_id.clone(),
            });
        } else {
            warn!(
                workflow_id = %workflow_id.short(),
                execution_id = %execution_id,
                failed_steps = ?failed_steps,
                "workflow failed"
            );
            self.events.emit(OrchestratorEvent::WorkflowFailed {
                workflow_id,
                execution_id: execution_id.clone(),
                failed_steps,
            });
        }
        Ok(())
    }
}
