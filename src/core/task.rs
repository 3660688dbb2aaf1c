//! Task data model.
//!
//! Tasks are the atomic units of work handed to agents. Each task tracks
//! its priority, dependencies, retry budget, timing and last result.

use crate::agent::{AgentId, AgentResult};
use crate::core::context::Context;
use crate::util::duration_secs;
use crate::workflow::WorkflowId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Task status in its lifecycle.
///
/// ```text
/// Pending -> Running -> Completed | Failed | Cancelled
///    ^          |
///    +----------+  (failure with retries left)
/// ```
///
/// A pending task may also be cancelled directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, waiting for a worker or for its dependencies.
    #[default]
    Pending,
    /// Inside an agent call.
    Running,
    /// Finished successfully.
    Completed,
    /// Failed with no retries left.
    Failed,
    /// Cancelled by a caller or because a dependency can never complete.
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Pending)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Scheduling priority. Higher values run first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl TaskPriority {
    pub fn value(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "LOW"),
            TaskPriority::Normal => write!(f, "NORMAL"),
            TaskPriority::High => write!(f, "HIGH"),
            TaskPriority::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Hook invoked once a task completes successfully.
#[derive(Clone)]
pub struct TaskCallback(Arc<dyn Fn(&Task) + Send + Sync>);

impl TaskCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Task) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, task: &Task) {
        (self.0)(task)
    }
}

impl std::fmt::Debug for TaskCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TaskCallback(..)")
    }
}

/// Everything a caller supplies when submitting a task.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub task_type: String,
    pub agent_id: AgentId,
    pub context: Context,
    pub priority: TaskPriority,
    /// Falls back to the configured `task_timeout`.
    pub timeout: Option<Duration>,
    /// Falls back to the configured `default_max_retries`.
    pub max_retries: Option<u32>,
    pub dependencies: Vec<TaskId>,
    pub callback: Option<TaskCallback>,
    pub metadata: Context,
    pub workflow_id: Option<WorkflowId>,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<String>, agent_id: impl Into<AgentId>) -> Self {
        Self {
            task_type: task_type.into(),
            agent_id: agent_id.into(),
            context: Context::new(),
            priority: TaskPriority::Normal,
            timeout: None,
            max_retries: None,
            dependencies: Vec::new(),
            callback: None,
            metadata: Context::new(),
            workflow_id: None,
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn depends_on(mut self, dependencies: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies.extend(dependencies);
        self
    }

    pub fn with_callback<F>(mut self, f: F) -> Self
    where
        F: Fn(&Task) + Send + Sync + 'static,
    {
        self.callback = Some(TaskCallback::new(f));
        self
    }

    pub fn with_metadata(mut self, metadata: Context) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn in_workflow(mut self, workflow_id: WorkflowId) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }
}

/// A unit of work bound to one agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub agent_id: AgentId,
    pub context: Context,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Result of the most recent attempt.
    pub result: Option<AgentResult>,
    /// Error text of the most recent failed attempt.
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub dependencies: Vec<TaskId>,
    #[serde(skip)]
    pub callback: Option<TaskCallback>,
    pub metadata: Context,
    pub workflow_id: Option<WorkflowId>,
    /// Submission order, used to break priority ties.
    pub sequence: u64,
}

impl Task {
    /// Build a pending task from a request.
    pub fn from_request(
        request: TaskRequest,
        sequence: u64,
        default_timeout: Duration,
        default_max_retries: u32,
    ) -> Self {
        Self {
            id: TaskId::new(),
            task_type: request.task_type,
            agent_id: request.agent_id,
            context: request.context,
            priority: request.priority,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retry_count: 0,
            max_retries: request.max_retries.unwrap_or(default_max_retries),
            timeout: request.timeout.unwrap_or(default_timeout),
            dependencies: request.dependencies,
            callback: request.callback,
            metadata: request.metadata,
            workflow_id: request.workflow_id,
            sequence,
        }
    }

    fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    /// Pending -> Running; records the start time.
    pub fn start(&mut self) -> bool {
        if !self.transition(TaskStatus::Running) {
            return false;
        }
        self.started_at = Some(Utc::now());
        true
    }

    /// Running -> Completed.
    pub fn complete(&mut self, result: AgentResult) -> bool {
        if !self.transition(TaskStatus::Completed) {
            return false;
        }
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(Utc::now());
        true
    }

    /// Running -> Pending for another attempt.
    pub fn reset_for_retry(&mut self) -> bool {
        if !self.transition(TaskStatus::Pending) {
            return false;
        }
        self.started_at = None;
        true
    }

    /// Running -> Failed. The error text stays in `error`.
    pub fn fail(&mut self) -> bool {
        if !self.transition(TaskStatus::Failed) {
            return false;
        }
        self.completed_at = Some(Utc::now());
        true
    }

    /// Pending | Running -> Cancelled.
    pub fn cancel(&mut self, reason: Option<String>) -> bool {
        if !self.transition(TaskStatus::Cancelled) {
            return false;
        }
        if reason.is_some() {
            self.error = reason;
        }
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall time of the last attempt, once it has finished.
    pub fn execution_time(&self) -> Option<Duration> {
        let started = self.started_at?;
        let finished = self.completed_at?;
        (finished - started).to_std().ok()
    }
}
