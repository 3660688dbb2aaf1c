//! Task scheduler.
//!
//! The scheduler is an actor: a single Tokio task owns the task table, the
//! priority queue, the running set and the metrics, and every change
//! happens in response to a [`Command`] sent through a [`SchedulerHandle`].
//! Dependency checks therefore always see current state.
//!
//! Workers ask for work with [`SchedulerHandle::next_task`]. A request that
//! cannot be served right away is parked and answered as soon as a task
//! becomes ready, so blocked tasks are only re-examined when something
//! changes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::{AgentId, AgentResult};
use crate::config::Config;
use crate::core::task::{Task, TaskId, TaskRequest, TaskStatus};
use crate::orchestration::events::{EventBus, OrchestratorEvent};
use crate::orchestration::metrics::{AgentTaskStats, Metrics};
use crate::orchestration::queue::{QueueEntry, Readiness, TaskQueue};
use crate::orchestration::registry::AgentRegistry;
use crate::orchestration::retry::{RetryDecision, RetryPolicy};
use crate::util::panic_message;
use crate::workflow::WorkflowId;
use crate::{Error, Result};

/// Capacity of the command channel.
const COMMAND_BUFFER: usize = 256;

/// Defaults applied to submitted tasks.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub task_timeout: Duration,
    pub default_max_retries: u32,
    pub retry_delay: Duration,
}

impl From<&Config> for SchedulerSettings {
    fn from(config: &Config) -> Self {
        Self {
            task_timeout: config.task_timeout,
            default_max_retries: config.default_max_retries,
            retry_delay: config.retry_delay,
        }
    }
}

/// How an agent call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded(AgentResult),
    /// Unsuccessful result, returned error, panic or timeout.
    Failed {
        error: String,
        result: Option<AgentResult>,
    },
}

impl Outcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Outcome::Failed {
            error: error.into(),
            result: None,
        }
    }
}

/// Point-in-time counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    /// Entries in the priority queue.
    pub queue_depth: usize,
    /// Pending tasks, including those waiting out a retry delay.
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub metrics: Metrics,
}

enum Command {
    Submit {
        request: TaskRequest,
        reply: oneshot::Sender<Result<TaskId>>,
    },
    Next {
        worker_id: usize,
        reply: oneshot::Sender<Task>,
    },
    Finish {
        task_id: TaskId,
        outcome: Outcome,
    },
    Requeue {
        task_id: TaskId,
    },
    Cancel {
        task_id: TaskId,
        reason: Option<String>,
        reply: oneshot::Sender<bool>,
    },
    Get {
        task_id: TaskId,
        reply: oneshot::Sender<Option<Task>>,
    },
    Snapshot {
        reply: oneshot::Sender<SchedulerSnapshot>,
    },
    AgentStats {
        agent_id: AgentId,
        reply: oneshot::Sender<AgentTaskStats>,
    },
    PauseWorkflow {
        workflow_id: WorkflowId,
    },
    ResumeWorkflow {
        workflow_id: WorkflowId,
    },
}

/// Cloneable client of the scheduler actor.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
    registry: AgentRegistry,
}

impl SchedulerHandle {
    /// Start the actor. It runs until every handle is dropped or `shutdown`
    /// fires.
    pub fn spawn(
        settings: SchedulerSettings,
        registry: AgentRegistry,
        events: EventBus,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let actor = Scheduler::new(rx, tx.downgrade(), settings, events);
        let join = tokio::spawn(actor.run(shutdown));
        (Self { tx, registry }, join)
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| Error::SchedulerClosed)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| Error::SchedulerClosed)
    }

    /// Queue a task and return its id.
    ///
    /// # Errors
    /// - `NotRegistered` if the target agent is unknown
    /// - `DependencyNotFound` if a dependency is unknown, failed or cancelled
    pub async fn submit(&self, request: TaskRequest) -> Result<TaskId> {
        if !self.registry.contains(&request.agent_id).await {
            return Err(Error::NotRegistered(request.agent_id));
        }
        self.request(|reply| Command::Submit { request, reply })
            .await?
    }

    /// Wait up to `wait` for a ready task. The returned task is already
    /// marked running.
    pub async fn next_task(&self, worker_id: usize, wait: Duration) -> Result<Option<Task>> {
        let (reply, mut rx) = oneshot::channel();
        self.send(Command::Next { worker_id, reply }).await?;
        match timeout(wait, &mut rx).await {
            Ok(Ok(task)) => Ok(Some(task)),
            Ok(Err(_)) => Err(Error::SchedulerClosed),
            Err(_) => {
                // Closing first means a task is either already here or will
                // be handed to someone else.
                rx.close();
                Ok(rx.try_recv().ok())
            }
        }
    }

    /// Report how an attempt ended.
    pub async fn finish(&self, task_id: TaskId, outcome: Outcome) -> Result<()> {
        self.send(Command::Finish { task_id, outcome }).await
    }

    /// Cancel a pending or running task. `false` if unknown or terminal.
    pub async fn cancel(&self, task_id: TaskId) -> Result<bool> {
        self.request(|reply| Command::Cancel {
            task_id,
            reason: None,
            reply,
        })
        .await
    }

    pub async fn cancel_with_reason(&self, task_id: TaskId, reason: String) -> Result<bool> {
        self.request(|reply| Command::Cancel {
            task_id,
            reason: Some(reason),
            reply,
        })
        .await
    }

    pub async fn get(&self, task_id: TaskId) -> Result<Option<Task>> {
        self.request(|reply| Command::Get { task_id, reply }).await
    }

    pub async fn snapshot(&self) -> Result<SchedulerSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn agent_stats(&self, agent_id: AgentId) -> Result<AgentTaskStats> {
        self.request(|reply| Command::AgentStats { agent_id, reply })
            .await
    }

    /// Hold back queued tasks of a workflow.
    pub async fn pause_workflow(&self, workflow_id: WorkflowId) -> Result<()> {
        self.send(Command::PauseWorkflow { workflow_id }).await
    }

    pub async fn resume_workflow(&self, workflow_id: WorkflowId) -> Result<()> {
        self.send(Command::ResumeWorkflow { workflow_id }).await
    }
}

struct Waiter {
    worker_id: usize,
    reply: oneshot::Sender<Task>,
}

struct Scheduler {
    rx: mpsc::Receiver<Command>,
    /// Weak so that pending retry timers do not keep the actor alive.
    requeue_tx: mpsc::WeakSender<Command>,
    settings: SchedulerSettings,
    retry: RetryPolicy,
    events: EventBus,
    tasks: HashMap<TaskId, Task>,
    dependents: HashMap<TaskId, Vec<TaskId>>,
    queue: TaskQueue,
    running: HashSet<TaskId>,
    waiters: VecDeque<Waiter>,
    paused: HashSet<WorkflowId>,
    metrics: Metrics,
    next_sequence: u64,
}

/// Whether the task behind `entry` may start now.
fn readiness(
    tasks: &HashMap<TaskId, Task>,
    paused: &HashSet<WorkflowId>,
    entry: &QueueEntry,
) -> Readiness {
    let Some(task) = tasks.get(&entry.task_id) else {
        return Readiness::Discard;
    };
    if task.status != TaskStatus::Pending {
        return Readiness::Discard;
    }
    if task.workflow_id.is_some_and(|wf| paused.contains(&wf)) {
        return Readiness::Blocked;
    }
    let deps_done = task.dependencies.iter().all(|dep| {
        tasks
            .get(dep)
            .is_some_and(|t| t.status == TaskStatus::Completed)
    });
    if deps_done {
        Readiness::Ready
    } else {
        Readiness::Blocked
    }
}

impl Scheduler {
    fn new(
        rx: mpsc::Receiver<Command>,
        requeue_tx: mpsc::WeakSender<Command>,
        settings: SchedulerSettings,
        events: EventBus,
    ) -> Self {
        Self {
            rx,
            requeue_tx,
            settings,
            retry: RetryPolicy::new(settings.retry_delay),
            events,
            tasks: HashMap::new(),
            dependents: HashMap::new(),
            queue: TaskQueue::new(),
            running: HashSet::new(),
            waiters: VecDeque::new(),
            paused: HashSet::new(),
            metrics: Metrics::default(),
            next_sequence: 0,
        }
    }

    async fn run(mut self, shutdown: CancellationToken) {
        debug!("scheduler started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(command) => {
                        self.handle(command);
                        self.dispatch();
                    }
                    None => break,
                }
            }
        }
        debug!(tasks = self.tasks.len(), "scheduler stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Submit { request, reply } => {
                let _ = reply.send(self.submit(request));
            }
            Command::Next { worker_id, reply } => {
                self.waiters.push_back(Waiter { worker_id, reply });
            }
            Command::Finish { task_id, outcome } => self.finish(task_id, outcome),
            Command::Requeue { task_id } => self.requeue(task_id),
            Command::Cancel {
                task_id,
                reason,
                reply,
            } => {
                let _ = reply.send(self.cancel(task_id, reason));
            }
            Command::Get { task_id, reply } => {
                let _ = reply.send(self.tasks.get(&task_id).cloned());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::AgentStats { agent_id, reply } => {
                let _ = reply.send(self.agent_stats(&agent_id));
            }
            Command::PauseWorkflow { workflow_id } => {
                debug!(workflow_id = %workflow_id, "holding back workflow tasks");
                self.paused.insert(workflow_id);
            }
            Command::ResumeWorkflow { workflow_id } => {
                debug!(workflow_id = %workflow_id, "releasing workflow tasks");
                self.paused.remove(&workflow_id);
            }
        }
    }

    fn submit(&mut self, request: TaskRequest) -> Result<TaskId> {
        for dep in &request.dependencies {
            let usable = self.tasks.get(dep).is_some_and(|t| {
                matches!(
                    t.status,
                    TaskStatus::Pending | TaskStatus::Running | TaskStatus::Completed
                )
            });
            if !usable {
                return Err(Error::DependencyNotFound(*dep));
            }
        }

        self.next_sequence += 1;
        let task = Task::from_request(
            request,
            self.next_sequence,
            self.settings.task_timeout,
            self.settings.default_max_retries,
        );
        let task_id = task.id;

        for dep in &task.dependencies {
            self.dependents.entry(*dep).or_default().push(task_id);
        }
        self.queue.push(QueueEntry::for_task(&task));

        info!(
            task_id = %task_id.short(),
            task_type = %task.task_type,
            agent_id = %task.agent_id,
            priority = %task.priority,
            "task submitted"
        );
        self.events.emit(OrchestratorEvent::TaskSubmitted {
            task_id,
            agent_id: task.agent_id.clone(),
            priority: task.priority,
        });
        self.tasks.insert(task_id, task);
        Ok(task_id)
    }

    /// Hand ready tasks to parked workers.
    fn dispatch(&mut self) {
        loop {
            self.waiters.retain(|w| !w.reply.is_closed());
            if self.waiters.is_empty() {
                return;
            }

            let (tasks, paused) = (&self.tasks, &self.paused);
            let Some(entry) = self.queue.pop_ready(|e| readiness(tasks, paused, e)) else {
                return;
            };
            let Some(waiter) = self.waiters.pop_front() else {
                self.queue.push(entry);
                return;
            };
            let Some(task) = self.tasks.get_mut(&entry.task_id) else {
                continue;
            };

            task.start();
            let agent_id = task.agent_id.clone();
            match waiter.reply.send(task.clone()) {
                Ok(()) => {
                    self.running.insert(entry.task_id);
                    debug!(
                        task_id = %entry.task_id.short(),
                        worker = waiter.worker_id,
                        "task dispatched"
                    );
                    self.events.emit(OrchestratorEvent::TaskStarted {
                        task_id: entry.task_id,
                        agent_id,
                    });
                }
                Err(_) => {
                    // The worker gave up waiting; put the task back.
                    task.reset_for_retry();
                    self.queue.push(entry);
                }
            }
        }
    }

    fn finish(&mut self, task_id: TaskId, outcome: Outcome) {
        self.running.remove(&task_id);
        let Some(task) = self.tasks.get_mut(&task_id) else {
            warn!(task_id = %task_id, "result for unknown task");
            return;
        };
        if task.status != TaskStatus::Running {
            debug!(task_id = %task_id.short(), status = %task.status, "ignoring late result");
            return;
        }
        self.metrics.record_attempt();

        match outcome {
            Outcome::Succeeded(result) => {
                task.complete(result);
                let elapsed = task.execution_time().unwrap_or_default();
                self.metrics.record_completed(&task.agent_id, elapsed);

                if let Some(callback) = task.callback.clone() {
                    let snapshot = task.clone();
                    if let Err(panic) =
                        std::panic::catch_unwind(AssertUnwindSafe(|| callback.call(&snapshot)))
                    {
                        error!(
                            task_id = %task_id,
                            panic = %panic_message(panic.as_ref()),
                            "task callback panicked"
                        );
                    }
                }

                info!(
                    task_id = %task_id.short(),
                    agent_id = %task.agent_id,
                    elapsed = ?elapsed,
                    "task completed"
                );
                self.events.emit(OrchestratorEvent::TaskCompleted {
                    task_id,
                    agent_id: task.agent_id.clone(),
                    execution_time: elapsed.as_secs_f64(),
                });
            }
            Outcome::Failed { error, result } => {
                if result.is_some() {
                    task.result = result;
                }
                match self.retry.on_failure(task, error.clone()) {
                    RetryDecision::Retry { attempt, delay } => {
                        warn!(
                            task_id = %task_id.short(),
                            attempt,
                            max_retries = task.max_retries,
                            error = %error,
                            "task attempt failed, retrying"
                        );
                        self.metrics.record_retry();
                        self.schedule_requeue(task_id, delay);
                    }
                    RetryDecision::Exhausted { attempts } => {
                        error!(
                            task_id = %task_id.short(),
                            agent_id = %task.agent_id,
                            attempts,
                            error = %error,
                            "task failed"
                        );
                        let agent_id = task.agent_id.clone();
                        self.metrics.record_failed(&agent_id);
                        self.events.emit(OrchestratorEvent::TaskFailed {
                            task_id,
                            agent_id,
                            error,
                        });
                        self.cancel_dependents(task_id);
                    }
                }
            }
        }
    }

    fn schedule_requeue(&self, task_id: TaskId, delay: Duration) {
        let tx = self.requeue_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::Requeue { task_id }).await;
            }
        });
    }

    fn requeue(&mut self, task_id: TaskId) {
        let Some(task) = self.tasks.get(&task_id) else {
            return;
        };
        // Cancelled while waiting out the delay.
        if task.status != TaskStatus::Pending {
            return;
        }
        self.queue.push(QueueEntry::for_task(task));
        debug!(task_id = %task_id.short(), attempt = task.retry_count, "task requeued");
        self.events.emit(OrchestratorEvent::TaskRetry {
            task_id,
            attempt: task.retry_count,
            error: task.error.clone(),
        });
    }

    fn cancel(&mut self, task_id: TaskId, reason: Option<String>) -> bool {
        if !self.mark_cancelled(task_id, reason) {
            return false;
        }
        info!(task_id = %task_id.short(), "task cancelled");
        self.cancel_dependents(task_id);
        true
    }

    fn mark_cancelled(&mut self, task_id: TaskId, reason: Option<String>) -> bool {
        let Some(task) = self.tasks.get_mut(&task_id) else {
            return false;
        };
        if !task.cancel(reason.clone()) {
            return false;
        }
        self.queue.remove(task_id);
        self.running.remove(&task_id);
        self.metrics.record_cancelled();
        self.events
            .emit(OrchestratorEvent::TaskCancelled { task_id, reason });
        true
    }

    /// Cancel every pending task that transitively depends on `root`.
    fn cancel_dependents(&mut self, root: TaskId) {
        let mut stack = vec![root];
        while let Some(parent) = stack.pop() {
            let children = self.dependents.get(&parent).cloned().unwrap_or_default();
            for child in children {
                let pending = self
                    .tasks
                    .get(&child)
                    .is_some_and(|t| t.status == TaskStatus::Pending);
                if !pending {
                    continue;
                }
                let reason = format!("dependency {} did not complete", parent.short());
                if self.mark_cancelled(child, Some(reason)) {
                    info!(task_id = %child.short(), dependency = %parent.short(), "dependent task cancelled");
                    stack.push(child);
                }
            }
        }
    }

    fn snapshot(&self) -> SchedulerSnapshot {
        let mut snapshot = SchedulerSnapshot {
            queue_depth: self.queue.len(),
            metrics: self.metrics.clone(),
            ..Default::default()
        };
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => snapshot.pending += 1,
                TaskStatus::Running => snapshot.running += 1,
                TaskStatus::Completed => snapshot.completed += 1,
                TaskStatus::Failed => snapshot.failed += 1,
                TaskStatus::Cancelled => snapshot.cancelled += 1,
            }
        }
        snapshot
    }

    fn agent_stats(&self, agent_id: &AgentId) -> AgentTaskStats {
        let mut stats = AgentTaskStats {
            error_rate: self.metrics.agent_error_rate(agent_id),
            ..Default::default()
        };
        for task in self.tasks.values().filter(|t| &t.agent_id == agent_id) {
            match task.status {
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                _ => {}
            }
        }
        stats
    }
}
