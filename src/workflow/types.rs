//! Core workflow type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentId;
use crate::core::context::Context;
use crate::core::task::{TaskId, TaskPriority};

/// Unique identifier for a workflow definition.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    /// Create a new unique workflow identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkflowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identifier of one run of a workflow: `<workflow id>_<unix millis>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn new(workflow_id: WorkflowId, at: DateTime<Utc>) -> Self {
        Self(format!("{}_{}", workflow_id, at.timestamp_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a workflow in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Workflow created but not yet started
    #[default]
    Pending,
    /// Workflow is actively executing
    Running,
    /// Workflow execution paused
    Paused,
    /// Workflow completed successfully
    Completed,
    /// Workflow failed with error
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Pending => write!(f, "pending"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Paused => write!(f, "paused"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One node of a workflow graph.
///
/// `dependencies` name sibling steps, not task ids; they are translated to
/// concrete task ids when the workflow executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub agent_id: AgentId,
    pub task_type: String,
    #[serde(default)]
    pub context: Context,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub priority: TaskPriority,
}

impl WorkflowStep {
    pub fn new(
        id: impl Into<String>,
        agent_id: impl Into<AgentId>,
        task_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            task_type: task_type.into(),
            context: Context::new(),
            dependencies: Vec::new(),
            priority: TaskPriority::Normal,
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

    pub fn depends_on<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(steps.into_iter().map(Into::into));
        self
    }
}

/// A named graph of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub description: String,
    pub steps: Vec<WorkflowStep>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Context shared by every step of the latest execution.
    pub context: Context,
    pub metadata: Context,
}

impl Workflow {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        steps: Vec<WorkflowStep>,
    ) -> Self {
        Self {
            id: WorkflowId::new(),
            name: name.into(),
            description: description.into(),
            steps,
            status: WorkflowStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            context: Context::new(),
            metadata: Context::new(),
        }
    }

    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }
}

/// The concrete task generated for a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTask {
    pub step_id: String,
    pub task_id: TaskId,
}

/// Book-keeping for one execution of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    /// Generated tasks, in submission order.
    pub steps: Vec<StepTask>,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    pub fn task_for(&self, step_id: &str) -> Option<TaskId> {
        self.steps
            .iter()
            .find(|s| s.step_id == step_id)
            .map(|s| s.task_id)
    }

    pub fn task_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.steps.iter().map(|s| s.task_id)
    }
}
