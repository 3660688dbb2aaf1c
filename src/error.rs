use thiserror::Error;

use crate::agent::AgentId;
use crate::core::task::TaskId;
use crate::workflow::WorkflowId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Agent not registered: {0}")]
    NotRegistered(AgentId),

    #[error("Dependency not found or not in a valid state: {0}")]
    DependencyNotFound(TaskId),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Scheduler is no longer running")]
    SchedulerClosed,

    #[error("Database connectivity check failed")]
    DatabaseUnavailable,
}

pub type Result<T> = std::result::Result<T, Error>;
